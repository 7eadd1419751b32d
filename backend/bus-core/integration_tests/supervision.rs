use crate::helpers::{TestBus, WAIT, fast_settings, recv, wait_for_event};

use bus_core::error::bus::BusError;
use bus_core::health::{LinkState, ProcessStatus};
use bus_core::message::MessageBody;
use bus_core::ui::UiEvent;
use bus_core::worker::WorkerIdentity::{Engine, Inference};

use std::time::Duration;

use tokio::time::sleep;

fn crash_count(event: &UiEvent) -> Option<u32> {
    match event {
        UiEvent::ComponentCrashed {
            worker: Engine,
            retry_count,
            ..
        } => Some(*retry_count),
        _ => None,
    }
}

/// **VALUE**: Verifies the restart policy counts crashes and resets on reconnect.
///
/// **WHY THIS MATTERS**: A worker that recovers must get its full retry budget back;
/// otherwise a few crashes spread over days would eventually disable it.
///
/// **BUG THIS CATCHES**: Would catch:
/// - Crashed workers not being relaunched
/// - Retry counts not increasing per crash
/// - The count surviving a successful reconnect
#[tokio::test]
async fn given_two_crashes_when_worker_reconnects_then_counts_one_two_then_reset() {
    // GIVEN: A bus allowing 3 retries
    let mut test = TestBus::start(fast_settings(3)).await;
    let mut events = test.bus.ui_events();
    test.bus.spawn_workers().await.unwrap();
    test.next_launch(Engine).await;

    // WHEN: The engine crashes twice, then the third launch connects
    test.launcher.exit(Engine, 1);
    let first = wait_for_event(&mut events, |e| crash_count(e).is_some()).await;
    test.next_launch(Engine).await;

    test.launcher.exit(Engine, 139);
    let second = wait_for_event(&mut events, |e| crash_count(e).is_some()).await;
    let third = test.next_launch(Engine).await;

    let _client = third.connect().await;
    let connected = wait_for_event(&mut events, |e| {
        matches!(
            e,
            UiEvent::HealthChanged {
                worker: Engine,
                link: LinkState::Connected,
                ..
            }
        )
    })
    .await;

    // THEN: Counts 1 then 2, reset to 0 on connect, three launches
    assert_eq!(crash_count(&first), Some(1));
    assert_eq!(crash_count(&second), Some(2));
    assert!(matches!(connected, UiEvent::HealthChanged { retry_count: 0, .. }));
    assert_eq!(test.launcher.launch_count(Engine), 3);
    assert_eq!(test.launcher.launch_count(Inference), 1);

    let status = test.bus.component_status().await.unwrap();
    let engine = status.iter().find(|s| s.worker == Engine).unwrap();
    assert_eq!(engine.restart_count, 0);
    assert_eq!(engine.process_status, ProcessStatus::Running);
    assert!(engine.healthy);
}

/// **VALUE**: Verifies the restart budget is finite.
///
/// **WHY THIS MATTERS**: A worker that crashes on startup forever must not spin
/// the machine; the operator gets a fatal error instead.
///
/// **BUG THIS CATCHES**: Would catch an off-by-one in the retry limit or restarts
/// continuing after exhaustion.
#[tokio::test]
async fn given_max_one_retry_when_worker_crashes_twice_then_fatal_and_no_more_launches() {
    // GIVEN: One retry allowed
    let mut test = TestBus::start(fast_settings(1)).await;
    let mut events = test.bus.ui_events();
    test.bus.spawn_workers().await.unwrap();
    test.next_launch(Engine).await;

    // WHEN: Crashing twice
    test.launcher.exit(Engine, 1);
    test.next_launch(Engine).await;
    test.launcher.exit(Engine, 1);

    // THEN: Fatal max-retries error for the engine
    let fatal = wait_for_event(&mut events, |e| matches!(e, UiEvent::Fatal { .. })).await;
    match fatal {
        UiEvent::Fatal {
            worker, category, ..
        } => {
            assert_eq!(worker, Some(Engine));
            assert_eq!(category, "max_retries_exceeded");
        }
        _ => unreachable!(),
    }

    // AND: No third launch; status is Failed
    sleep(Duration::from_millis(150)).await;
    assert_eq!(test.launcher.launch_count(Engine), 2);
    let status = test.bus.component_status().await.unwrap();
    let engine = status.iter().find(|s| s.worker == Engine).unwrap();
    assert_eq!(engine.process_status, ProcessStatus::Failed);
}

/// **VALUE**: Verifies a clean exit is not treated as a crash.
///
/// **WHY THIS MATTERS**: Workers exit 0 when asked to stop; restarting them would
/// fight the operator.
///
/// **BUG THIS CATCHES**: Would catch every exit consuming the restart budget.
#[tokio::test]
async fn given_worker_exits_with_zero_when_observed_then_not_restarted() {
    let mut test = TestBus::start(fast_settings(3)).await;
    test.bus.spawn_workers().await.unwrap();
    test.next_launch(Inference).await;

    test.launcher.exit(Inference, 0);
    sleep(Duration::from_millis(150)).await;

    assert_eq!(test.launcher.launch_count(Inference), 1);
    let status = test.bus.component_status().await.unwrap();
    let inference = status.iter().find(|s| s.worker == Inference).unwrap();
    assert_eq!(inference.process_status, ProcessStatus::Stopped);
    assert_eq!(inference.restart_count, 0);
}

/// **VALUE**: Verifies in-flight requests are cancelled when their worker crashes.
///
/// **WHY THIS MATTERS**: The reply can never arrive; callers should learn that now,
/// not after the full timeout.
///
/// **BUG THIS CATCHES**: Would catch crash handling that leaves pending requests
/// to time out.
#[tokio::test]
async fn given_pending_request_when_worker_crashes_then_worker_restarting_error() {
    // GIVEN: A request the engine received but has not answered
    let mut test = TestBus::start(fast_settings(3)).await;
    let mut client = test.spawn_and_connect(Engine).await;
    let bus = test.bus.clone();
    let request = tokio::spawn(async move {
        bus.request(Engine, MessageBody::FullScan {}, Duration::from_secs(30))
            .await
    });
    recv(&mut client).await;

    // WHEN: The engine crashes
    test.launcher.exit(Engine, 2);

    // THEN: The request fails promptly with WorkerRestarting
    let result = tokio::time::timeout(WAIT, request).await.unwrap().unwrap();
    assert!(matches!(
        result,
        Err(BusError::WorkerRestarting { worker: Engine, .. })
    ));
    assert!(!test.bus.is_connected(Engine));
}

/// **VALUE**: Verifies a dropped connection from a live process leads to a restart
/// once the reconnect budget is spent.
///
/// **WHY THIS MATTERS**: A worker whose socket died but whose process hangs around
/// would otherwise stay disconnected forever.
///
/// **BUG THIS CATCHES**: Would catch disconnects being ignored while the process runs.
#[tokio::test]
async fn given_connection_lost_when_worker_never_reconnects_then_relaunched() {
    // GIVEN: A connected engine with one retry
    let mut test = TestBus::start(fast_settings(1)).await;
    let mut events = test.bus.ui_events();
    let client = test.spawn_and_connect(Engine).await;

    // WHEN: Its socket closes and it never comes back
    client.close().await;

    // THEN: Marked disconnected, then relaunched
    wait_for_event(&mut events, |e| {
        matches!(
            e,
            UiEvent::HealthChanged {
                worker: Engine,
                link: LinkState::Disconnected,
                ..
            }
        )
    })
    .await;
    let relaunch = test.next_launch(Engine).await;
    assert!(relaunch.generation > 1);
    assert_eq!(test.launcher.launch_count(Engine), 2);
}
