use crate::helpers::{TestBus, WAIT, block_process, fast_settings, recv, spawn_responder, wait_for_event};

use bus_core::bus::BusSettings;
use bus_core::error::bus::BusError;
use bus_core::message::{Envelope, MessageBody, MessageKind};
use bus_core::transport::OUTBOUND_BUFFER;
use bus_core::ui::UiEvent;
use bus_core::worker::WorkerIdentity::{Engine, Inference};

use std::time::Duration;

use serde_json::json;
use tokio::sync::mpsc;
use tokio::time::{sleep, timeout};

fn status(status: &str) -> MessageBody {
    MessageBody::CoreStatus {
        status: status.to_string(),
        detail: None,
    }
}

/// **VALUE**: Verifies a request is answered by the matching reply.
///
/// **WHY THIS MATTERS**: Commands like "full scan" return their result this way.
///
/// **BUG THIS CATCHES**: Would catch:
/// - The correlation id not being attached to the outgoing request
/// - Replies being dispatched as ordinary messages instead of resolving the request
#[tokio::test]
async fn given_connected_worker_when_request_sent_then_reply_returned() {
    // GIVEN: An engine that answers every request with "scanned"
    let mut test = TestBus::start(fast_settings(5)).await;
    let client = test.spawn_and_connect(Engine).await;
    let _worker = spawn_responder(client, Duration::ZERO, |_| Some(status("scanned")));

    // WHEN: Requesting a full scan
    let reply = test
        .bus
        .request(Engine, MessageBody::FullScan {}, WAIT)
        .await
        .expect("request should succeed");

    // THEN: The reply carries the answer and the request's id
    assert_eq!(reply.body, status("scanned"));
    let stats = test.bus.statistics().await.unwrap();
    assert_eq!(reply.request_id, Some(stats.last_request_id));
    assert_eq!(stats.in_flight, 0);
}

/// **VALUE**: Verifies timeouts and that a late reply is discarded.
///
/// **WHY THIS MATTERS**: A caller that gave up must not see the reply later, and the
/// reply must not leak into app state as if it were unsolicited data.
///
/// **BUG THIS CATCHES**: Would catch:
/// - Requests never timing out
/// - Late replies resolving nothing but still being dispatched to subscribers or state
#[tokio::test]
async fn given_slow_worker_when_request_times_out_then_late_reply_discarded() {
    // GIVEN: An engine that answers after 250ms and a CORE_STATUS subscriber
    let mut test = TestBus::start(fast_settings(5)).await;
    let client = test.spawn_and_connect(Engine).await;
    let _worker = spawn_responder(client, Duration::from_millis(250), |_| Some(status("late")));

    let (seen_tx, mut seen_rx) = mpsc::unbounded_channel();
    test.bus
        .subscribe(MessageKind::CoreStatus, move |from, _| {
            let _ = seen_tx.send(from);
            Ok(())
        })
        .await
        .unwrap();

    // WHEN: Requesting with a 200ms timeout
    let result = test
        .bus
        .request(Engine, MessageBody::FullScan {}, Duration::from_millis(200))
        .await;

    // THEN: Timeout
    match result {
        Err(BusError::Timeout {
            worker, timeout_ms, ..
        }) => {
            assert_eq!(worker, Engine);
            assert_eq!(timeout_ms, 200);
        }
        other => panic!("expected timeout, got {other:?}"),
    }

    // AND: The late reply reaches nobody
    sleep(Duration::from_millis(200)).await;
    assert!(seen_rx.try_recv().is_err());
    assert_eq!(test.bus.snapshot().await.core_status, None);
    assert_eq!(test.bus.statistics().await.unwrap().in_flight, 0);
}

/// **VALUE**: Verifies that a request to a disconnected worker fails immediately.
///
/// **WHY THIS MATTERS**: Requests are never queued; waiting out the timeout would
/// only delay the error.
///
/// **BUG THIS CATCHES**: Would catch requests silently entering the offline queue.
#[tokio::test]
async fn given_disconnected_worker_when_request_sent_then_send_failed() {
    let test = TestBus::start(fast_settings(5)).await;

    let result = test.bus.request(Inference, MessageBody::FullScan {}, WAIT).await;

    assert!(matches!(
        result,
        Err(BusError::SendFailed {
            worker: Inference,
            ..
        })
    ));
    assert_eq!(test.bus.statistics().await.unwrap().total_queued, 0);
}

/// **VALUE**: Verifies the offline queue flushes in order on connect.
///
/// **WHY THIS MATTERS**: Commands issued while the engine restarts must still be
/// applied, in the order they were issued.
///
/// **BUG THIS CATCHES**: Would catch:
/// - Sends to a disconnected worker being dropped
/// - Flushing out of order or only on the next send
#[tokio::test]
async fn given_messages_sent_while_disconnected_when_worker_connects_then_flushed_in_order() {
    // GIVEN: Three sends to an engine that has not connected yet
    let mut test = TestBus::start(fast_settings(5)).await;
    for pid in 1..=3 {
        assert!(!test.bus.send(Engine, block_process(pid)).await);
    }
    let stats = test.bus.statistics().await.unwrap();
    assert_eq!(stats.queued.get(&Engine), Some(&3));

    // WHEN: The engine connects
    let mut client = test.spawn_and_connect(Engine).await;

    // THEN: It receives them in order and the queue is empty
    let mut pids = Vec::new();
    for _ in 0..3 {
        match recv(&mut client).await.body {
            MessageBody::BlockProcess { pid, .. } => pids.push(pid),
            other => panic!("unexpected {other:?}"),
        }
    }
    assert_eq!(pids, vec![1, 2, 3]);
    assert_eq!(test.bus.statistics().await.unwrap().total_queued, 0);

    // AND: Subsequent sends go straight through
    assert!(test.bus.send(Engine, block_process(4)).await);
    assert!(matches!(
        recv(&mut client).await.body,
        MessageBody::BlockProcess { pid: 4, .. }
    ));
}

/// **VALUE**: Verifies a backlog larger than the socket buffer drains fully and in
/// order, with later sends held behind it.
///
/// **WHY THIS MATTERS**: A worker that was down for a while comes back to hundreds of
/// queued commands; only part of them fits the outbound buffer at once.
///
/// **BUG THIS CATCHES**: Would catch:
/// - The flush giving up when the buffer fills, stranding the rest while connected
/// - New sends overtaking messages still in the queue
#[tokio::test]
async fn given_backlog_larger_than_outbound_buffer_when_worker_connects_then_all_delivered_in_order() {
    // GIVEN: More queued messages than one channel buffers
    let total = (OUTBOUND_BUFFER + 150) as u32;
    let mut test = TestBus::start(fast_settings(5)).await;
    for pid in 0..total {
        assert!(!test.bus.send(Inference, block_process(pid)).await);
    }

    // WHEN: Inference connects and another command follows right away
    let mut client = test.spawn_and_connect(Inference).await;
    test.bus.send(Inference, block_process(9999)).await;

    // THEN: Every message arrives, oldest first, the new one last
    let mut pids = Vec::new();
    for _ in 0..=total {
        match recv(&mut client).await.body {
            MessageBody::BlockProcess { pid, .. } => pids.push(pid),
            other => panic!("unexpected {other:?}"),
        }
    }
    let mut expected: Vec<u32> = (0..total).collect();
    expected.push(9999);
    assert_eq!(pids, expected);

    // AND: Nothing is left queued for a connected worker
    let stats = test.bus.statistics().await.unwrap();
    assert_eq!(stats.total_queued, 0);
}

/// **VALUE**: Verifies an unbounded request timeout does not take the bus down.
///
/// **WHY THIS MATTERS**: Every command and status read goes through the one bus
/// actor; if it dies, the app is left without workers.
///
/// **BUG THIS CATCHES**: Would catch deadline arithmetic overflowing inside the actor.
#[tokio::test]
async fn given_maximum_timeout_when_request_sent_then_bus_keeps_serving() {
    // GIVEN: A connected inference worker that never answers
    let mut test = TestBus::start(fast_settings(5)).await;
    let _client = test.spawn_and_connect(Inference).await;

    // WHEN: A request with `Duration::MAX` is outstanding
    let outcome = timeout(
        Duration::from_millis(200),
        test.bus.request(Inference, MessageBody::FullScan {}, Duration::MAX),
    )
    .await;

    // THEN: It is simply still waiting, and the bus answers other calls
    assert!(outcome.is_err(), "request should still be pending");
    let stats = test.bus.statistics().await.unwrap();
    assert_eq!(stats.in_flight, 1);
    assert!(test.bus.is_connected(Inference));
}

/// **VALUE**: Verifies broadcast is best effort and never queues.
///
/// **WHY THIS MATTERS**: Emergency mode must reach whoever is up right now; replaying
/// it minutes later to a restarted worker would be wrong.
///
/// **BUG THIS CATCHES**: Would catch broadcast enqueueing for missing workers or
/// stopping at the first failure.
#[tokio::test]
async fn given_one_worker_connected_when_broadcast_then_delivered_there_only() {
    // GIVEN: Only the engine connected
    let mut test = TestBus::start(fast_settings(5)).await;
    let mut events = test.bus.ui_events();
    let mut client = test.spawn_and_connect(Engine).await;

    // WHEN: Broadcasting emergency mode
    let report = test
        .bus
        .broadcast(MessageBody::EmergencyMode { enable: true })
        .await;

    // THEN: Engine got it, inference did not, nothing queued, UI told
    assert!(report.delivered_to(Engine));
    assert!(!report.delivered_to(Inference));
    assert!(!report.all_delivered());
    assert!(matches!(
        recv(&mut client).await.body,
        MessageBody::EmergencyMode { enable: true }
    ));
    assert_eq!(test.bus.statistics().await.unwrap().total_queued, 0);
    wait_for_event(&mut events, |e| matches!(e, UiEvent::Broadcast { .. })).await;
}

/// **VALUE**: Verifies inbound data updates state, reaches subscribers and the UI.
///
/// **WHY THIS MATTERS**: This is how engine telemetry reaches the dashboard.
///
/// **BUG THIS CATCHES**: Would catch:
/// - Subscribers for one kind receiving another
/// - A panicking subscriber taking down the bus
/// - State not being updated before the UI push
#[tokio::test]
async fn given_subscribers_when_worker_sends_data_then_state_updated_and_handlers_run() {
    // GIVEN: A panicking MESH_ALERT subscriber and a recording SYSTEM_DATA subscriber
    let mut test = TestBus::start(fast_settings(5)).await;
    let mut events = test.bus.ui_events();
    let mut client = test.spawn_and_connect(Engine).await;

    test.bus
        .subscribe(MessageKind::MeshAlert, |_, _| panic!("subscriber bug"))
        .await
        .unwrap();
    let (seen_tx, mut seen_rx) = mpsc::unbounded_channel();
    test.bus
        .subscribe(MessageKind::SystemData, move |from, envelope| {
            let _ = seen_tx.send((from, envelope.kind()));
            Ok(())
        })
        .await
        .unwrap();

    // WHEN: The engine sends a mesh alert and then system data
    client
        .send(&Envelope::new(MessageBody::MeshAlert {
            threat_level: "high".to_string(),
            recommendation: None,
        }))
        .await
        .unwrap();
    client
        .send(&Envelope::new(MessageBody::SystemData {
            system_stats: json!({"cpu": 17}),
            vpn_status: json!({"connected": false}),
            current_ip: Some("192.0.2.10".to_string()),
            real_ip: None,
        }))
        .await
        .unwrap();

    // THEN: The recording subscriber ran for system data only
    let seen = timeout(WAIT, seen_rx.recv()).await.unwrap().unwrap();
    assert_eq!(seen, (Engine, MessageKind::SystemData));

    // AND: The UI got a core-data push with the new snapshot
    let event = wait_for_event(&mut events, |e| {
        matches!(e, UiEvent::CoreData { snapshot } if snapshot.current_ip.is_some())
    })
    .await;
    if let UiEvent::CoreData { snapshot } = event {
        assert_eq!(snapshot.system_stats, json!({"cpu": 17}));
        assert_eq!(snapshot.alerts.len(), 1);
    }
    assert_eq!(
        test.bus.snapshot().await.current_ip.as_deref(),
        Some("192.0.2.10")
    );
}

/// **VALUE**: Verifies unsubscribe.
///
/// **WHY THIS MATTERS**: UI views subscribe and unsubscribe as they open and close.
///
/// **BUG THIS CATCHES**: Would catch handlers surviving unsubscribe.
#[tokio::test]
async fn given_subscription_when_unsubscribed_then_removed() {
    let test = TestBus::start(BusSettings::default()).await;
    let id = test
        .bus
        .subscribe(MessageKind::AiAnalysis, |_, _| Ok(()))
        .await
        .unwrap();
    assert_eq!(test.bus.statistics().await.unwrap().subscribers, 1);

    assert!(test.bus.unsubscribe(id).await);
    assert!(!test.bus.unsubscribe(id).await);
    assert_eq!(test.bus.statistics().await.unwrap().subscribers, 0);
}

/// **VALUE**: Verifies shutdown fails in-flight requests and stops the bus.
///
/// **WHY THIS MATTERS**: Closing the app must not leave callers waiting forever.
///
/// **BUG THIS CATCHES**: Would catch pending requests outliving the bus.
#[tokio::test]
async fn given_in_flight_request_when_shutdown_then_request_fails_with_shutdown() {
    // GIVEN: A request the engine reads but never answers
    let mut test = TestBus::start(fast_settings(5)).await;
    let mut client = test.spawn_and_connect(Engine).await;
    let bus = test.bus.clone();
    let request = tokio::spawn(async move { bus.request(Engine, MessageBody::FullScan {}, WAIT).await });
    recv(&mut client).await;

    // WHEN: Shutting down
    test.bus.shutdown().await;

    // THEN: Shutdown error, and the bus refuses further work
    let result = request.await.unwrap();
    assert!(matches!(result, Err(BusError::Shutdown { .. })));
    assert!(matches!(
        test.bus.request(Engine, MessageBody::FullScan {}, WAIT).await,
        Err(BusError::Actor { .. })
    ));
    assert!(!test.bus.is_connected(Engine));
}
