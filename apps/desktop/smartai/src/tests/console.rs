// Unit tests for console command parsing

use crate::console::ConsoleCommand;
use crate::error::SmartaiError;

use serde_json::json;

fn parse(line: &str) -> Result<ConsoleCommand, SmartaiError> {
    line.parse()
}

/// **VALUE**: Verifies the plain commands map to their variants.
///
/// **WHY THIS MATTERS**: The console is the only way to pull data and send
/// commands without the window UI.
///
/// **BUG THIS CATCHES**: Would catch a renamed or dropped command keyword.
#[test]
fn given_plain_commands_when_parsed_then_map_to_variants() {
    // GIVEN / WHEN / THEN
    assert_eq!(parse("data").unwrap(), ConsoleCommand::Data);
    assert_eq!(parse("STATUS").unwrap(), ConsoleCommand::Status);
    assert_eq!(parse("  stats ").unwrap(), ConsoleCommand::Stats);
    assert_eq!(parse("scan").unwrap(), ConsoleCommand::Scan);
    assert_eq!(parse("export").unwrap(), ConsoleCommand::Export);
    assert_eq!(parse("?").unwrap(), ConsoleCommand::Help);
    assert_eq!(parse("exit").unwrap(), ConsoleCommand::Quit);
}

/// **VALUE**: Verifies on/off switches accept the usual spellings.
///
/// **WHY THIS MATTERS**: `vpn` and `emergency` change live protection state;
/// a misread switch sends the opposite command.
///
/// **BUG THIS CATCHES**: Would catch a missing switch defaulting to `true`.
#[test]
fn given_switch_commands_when_parsed_then_read_state() {
    // GIVEN / WHEN / THEN
    assert_eq!(parse("vpn on").unwrap(), ConsoleCommand::Vpn(true));
    assert_eq!(parse("vpn OFF").unwrap(), ConsoleCommand::Vpn(false));
    assert_eq!(parse("emergency enable").unwrap(), ConsoleCommand::Emergency(true));
    assert_eq!(parse("emergency 0").unwrap(), ConsoleCommand::Emergency(false));

    assert!(matches!(parse("vpn"), Err(SmartaiError::Input { .. })));
    assert!(matches!(parse("vpn maybe"), Err(SmartaiError::Input { .. })));
}

/// **VALUE**: Verifies `block` takes a numeric pid and a free-text reason.
///
/// **WHY THIS MATTERS**: Reasons are written by the operator and contain spaces.
///
/// **BUG THIS CATCHES**: Would catch a reason truncated to its first word, or
/// a non-numeric pid reaching the engine.
#[test]
fn given_block_command_when_parsed_then_reason_keeps_spaces() {
    // GIVEN / WHEN
    let with_reason = parse("block 4242 suspicious outbound traffic").unwrap();
    let bare = parse("block 7").unwrap();

    // THEN
    assert_eq!(
        with_reason,
        ConsoleCommand::Block {
            pid: 4242,
            reason: Some("suspicious outbound traffic".to_string()),
        }
    );
    assert_eq!(bare, ConsoleCommand::Block { pid: 7, reason: None });
    assert!(matches!(parse("block abc"), Err(SmartaiError::Input { .. })));
    assert!(matches!(parse("block"), Err(SmartaiError::Input { .. })));
}

/// **VALUE**: Verifies unknown words and stray arguments are rejected.
///
/// **BUG THIS CATCHES**: Would catch `scan now` silently running a scan or
/// an unknown word being treated as `help`.
#[test]
fn given_unknown_or_extra_input_when_parsed_then_input_error() {
    // GIVEN / WHEN
    let unknown = parse("reboot");
    let extra = parse("scan now");
    let empty = parse("   ");

    // THEN
    match unknown {
        Err(SmartaiError::Input { message, .. }) => assert!(message.contains("reboot")),
        other => panic!("expected input error, got {other:?}"),
    }
    assert!(matches!(extra, Err(SmartaiError::Input { .. })));
    assert!(matches!(empty, Err(SmartaiError::Input { .. })));
}

/// **VALUE**: Verifies VPN activation takes an optional profile name.
///
/// **BUG THIS CATCHES**: Would catch a missing profile being rejected, or extra
/// words being folded into the profile.
#[test]
fn given_activate_vpn_when_parsed_then_profile_optional() {
    // GIVEN / WHEN / THEN
    assert_eq!(
        parse("activate-vpn office").unwrap(),
        ConsoleCommand::ActivateVpn {
            profile: Some("office".to_string()),
        }
    );
    assert_eq!(
        parse("activate-vpn").unwrap(),
        ConsoleCommand::ActivateVpn { profile: None }
    );
    assert!(matches!(parse("activate-vpn office home"), Err(SmartaiError::Input { .. })));
}

/// **VALUE**: Verifies a firewall rule is read as JSON from the rest of the line.
///
/// **WHY THIS MATTERS**: Rules are passed to the engine untouched; spaces inside
/// string values must survive parsing.
///
/// **BUG THIS CATCHES**: Would catch the rule being split on whitespace or
/// malformed JSON reaching the engine.
#[test]
fn given_firewall_command_when_parsed_then_rule_is_json() {
    // GIVEN / WHEN
    let parsed = parse(r#"firewall {"action": "deny", "name": "block  smb", "port": 445}"#).unwrap();

    // THEN
    assert_eq!(
        parsed,
        ConsoleCommand::Firewall {
            rule: json!({"action": "deny", "name": "block  smb", "port": 445}),
        }
    );
    assert!(matches!(parse("firewall"), Err(SmartaiError::Input { .. })));
    assert!(matches!(parse("firewall {deny"), Err(SmartaiError::Input { .. })));
}
