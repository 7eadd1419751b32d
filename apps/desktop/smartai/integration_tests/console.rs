use crate::helpers::offline_bus;

use smartai::console::{self, PROMPT};

/// **VALUE**: Verifies a scripted console session end to end.
///
/// **WHY THIS MATTERS**: The console is the operator surface; a broken loop
/// leaves the controller running with no way to drive it.
///
/// **BUG THIS CATCHES**: Would catch errors ending the session, or commands
/// after `quit` still running.
#[tokio::test]
async fn given_scripted_input_when_console_runs_then_outputs_and_stops_at_quit() {
    // GIVEN
    let bus = offline_bus();
    let dir = tempfile::tempdir().unwrap();
    let input: &[u8] = b"vpn on\nbogus\n\nstats\nquit\nvpn off\n";
    let mut output = Vec::new();

    // WHEN
    console::run(&bus, dir.path(), input, &mut output).await.unwrap();

    // THEN
    let text = String::from_utf8(output).unwrap();
    assert!(text.contains("\"queued\""), "vpn on should report queued: {text}");
    assert!(text.contains("error: unknown command 'bogus'"), "got: {text}");
    assert!(text.contains("\"totalQueued\": 1"), "got: {text}");
    assert!(!text.contains("\"totalQueued\": 2"));
    assert_eq!(text.matches(PROMPT).count(), 5);
    bus.shutdown().await;
}

/// **VALUE**: Verifies end of input ends the session without error.
///
/// **BUG THIS CATCHES**: Would catch a closed stdin spinning the loop.
#[tokio::test]
async fn given_closed_input_when_console_runs_then_returns_ok() {
    // GIVEN
    let bus = offline_bus();
    let dir = tempfile::tempdir().unwrap();
    let input: &[u8] = b"";
    let mut output = Vec::new();

    // WHEN
    let result = console::run(&bus, dir.path(), input, &mut output).await;

    // THEN
    assert!(result.is_ok());
    bus.shutdown().await;
}
