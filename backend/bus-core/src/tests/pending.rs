use crate::bus::pending::{PendingRequests, Resolution};
use crate::error::bus::BusError;
use crate::message::{Envelope, MessageBody};
use crate::worker::WorkerIdentity::{Engine, Inference};

use common::ErrorLocation;

use std::panic::Location;
use std::time::{Duration, Instant};

use tokio::sync::oneshot;

fn reply(id: u64) -> Envelope {
    Envelope::new(MessageBody::CoreStatus {
        status: "ok".to_string(),
        detail: None,
    })
    .with_request_id(id)
}

/// **VALUE**: Verifies correlation ids are strictly increasing.
///
/// **WHY THIS MATTERS**: A reused id would hand one caller another caller's reply.
///
/// **BUG THIS CATCHES**: Would catch an id counter that restarts or repeats.
#[test]
fn given_table_when_ids_drawn_then_strictly_increasing() {
    let mut pending = PendingRequests::new();
    let ids: Vec<u64> = (0..5).map(|_| pending.next_id()).collect();
    assert!(ids.windows(2).all(|w| w[0] < w[1]));
    assert_eq!(pending.last_id(), ids[4]);
}

/// **VALUE**: Verifies a reply is delivered exactly once.
///
/// **WHY THIS MATTERS**: A duplicate reply must not resolve anything a second time.
///
/// **BUG THIS CATCHES**: Would catch entries left in the table after resolution.
#[test]
fn given_pending_request_when_resolved_twice_then_second_is_unknown() {
    // GIVEN: One in-flight request to the engine
    let mut pending = PendingRequests::new();
    let id = pending.next_id();
    let (tx, mut rx) = oneshot::channel();
    pending.insert(id, Engine, Duration::from_secs(5), tx);

    // WHEN: The reply arrives twice
    let first = pending.resolve(id, Engine, reply(id));
    let second = pending.resolve(id, Engine, reply(id));

    // THEN: Delivered once, the caller got it, table empty
    assert_eq!(first, Resolution::Delivered);
    assert_eq!(second, Resolution::Unknown);
    assert!(matches!(rx.try_recv(), Ok(Ok(_))));
    assert!(pending.is_empty());
}

/// **VALUE**: Verifies that a reply from the wrong worker is refused.
///
/// **WHY THIS MATTERS**: Ids are global; a confused worker echoing another's id
/// must not complete a request it never received.
///
/// **BUG THIS CATCHES**: Would catch resolution keyed on id alone.
#[test]
fn given_request_to_engine_when_inference_replies_then_wrong_worker_and_still_pending() {
    // GIVEN: A request to the engine
    let mut pending = PendingRequests::new();
    let id = pending.next_id();
    let (tx, _rx) = oneshot::channel();
    pending.insert(id, Engine, Duration::from_secs(5), tx);

    // WHEN: Inference answers with the same id
    let outcome = pending.resolve(id, Inference, reply(id));

    // THEN: Rejected, entry kept
    assert_eq!(outcome, Resolution::WrongWorker { expected: Engine });
    assert_eq!(pending.len(), 1);
}

/// **VALUE**: Verifies that an expired request cannot be resolved afterwards.
///
/// **WHY THIS MATTERS**: Late replies must be discarded once the caller saw a timeout.
///
/// **BUG THIS CATCHES**: Would catch the timer path not removing the entry.
#[test]
fn given_expired_request_when_late_reply_arrives_then_unknown() {
    // GIVEN: A request that timed out
    let mut pending = PendingRequests::new();
    let id = pending.next_id();
    let (tx, mut rx) = oneshot::channel();
    pending.insert(id, Engine, Duration::from_millis(200), tx);

    let entry = pending.expire(id).expect("entry should be present");
    PendingRequests::fail(
        entry,
        BusError::Timeout {
            worker: Engine,
            request_id: id,
            timeout_ms: 200,
            location: ErrorLocation::from(Location::caller()),
        },
    );

    // WHEN: The reply shows up late
    let late = pending.resolve(id, Engine, reply(id));

    // THEN: Discarded; the caller saw a timeout
    assert_eq!(late, Resolution::Unknown);
    assert!(pending.expire(id).is_none());
    assert!(matches!(rx.try_recv(), Ok(Err(BusError::Timeout { .. }))));
}

/// **VALUE**: Verifies per-worker cancellation.
///
/// **WHY THIS MATTERS**: A crashed engine cancels its own requests, not inference's.
///
/// **BUG THIS CATCHES**: Would catch cancel_for failing every request.
#[test]
fn given_requests_to_both_workers_when_engine_cancelled_then_only_engine_fails() {
    // GIVEN: Two engine requests and one inference request
    let mut pending = PendingRequests::new();
    let mut engine_rx = Vec::new();
    for _ in 0..2 {
        let id = pending.next_id();
        let (tx, rx) = oneshot::channel();
        pending.insert(id, Engine, Duration::from_secs(5), tx);
        engine_rx.push(rx);
    }
    let inference_id = pending.next_id();
    let (tx, mut inference_rx) = oneshot::channel();
    pending.insert(inference_id, Inference, Duration::from_secs(5), tx);

    // WHEN: Cancelling the engine
    let cancelled = pending.cancel_for(Engine, |entry| BusError::WorkerRestarting {
        worker: entry.target,
        request_id: entry.id,
        location: ErrorLocation::from(Location::caller()),
    });

    // THEN: Two cancelled with WorkerRestarting, inference still pending
    assert_eq!(cancelled, 2);
    for mut rx in engine_rx {
        assert!(matches!(
            rx.try_recv(),
            Ok(Err(BusError::WorkerRestarting { worker: Engine, .. }))
        ));
    }
    assert!(inference_rx.try_recv().is_err());
    assert_eq!(pending.len(), 1);
}

/// **VALUE**: Verifies shutdown fails everything.
///
/// **WHY THIS MATTERS**: Nothing may hang on a bus that is gone.
///
/// **BUG THIS CATCHES**: Would catch cancel_all leaving entries behind.
#[test]
fn given_requests_when_cancel_all_then_table_empty() {
    let mut pending = PendingRequests::new();
    for target in [Engine, Inference] {
        let id = pending.next_id();
        let (tx, _rx) = oneshot::channel();
        pending.insert(id, target, Duration::from_secs(5), tx);
    }

    let cancelled = pending.cancel_all(|_| BusError::Shutdown {
        location: ErrorLocation::from(Location::caller()),
    });

    assert_eq!(cancelled, 2);
    assert!(pending.is_empty());
}

/// **VALUE**: Verifies an effectively unbounded timeout is accepted.
///
/// **WHY THIS MATTERS**: The table lives inside the bus actor; a panic there takes
/// the whole bus down for every caller.
///
/// **BUG THIS CATCHES**: Would catch `Instant + Duration` overflowing on `Duration::MAX`.
#[test]
fn given_maximum_timeout_when_inserted_then_deadline_clamped_far_ahead() {
    // GIVEN: A request with the largest possible timeout
    let mut pending = PendingRequests::new();
    let id = pending.next_id();
    let (tx, _rx) = oneshot::channel();

    // WHEN: Inserting it
    pending.insert(id, Inference, Duration::MAX, tx);

    // THEN: It is tracked with a deadline years away
    assert_eq!(pending.len(), 1);
    let entry = pending.expire(id).unwrap();
    assert_eq!(entry.timeout, Duration::MAX);
    assert!(entry.deadline > Instant::now() + Duration::from_secs(60 * 60 * 24 * 365));
}
