use crate::health::{HealthTracker, LinkState, ProcessStatus};
use crate::supervisor::ProcessHandle;
use crate::transport::Channel;
use crate::worker::WorkerIdentity::{Engine, Inference};
use crate::worker::WorkerIdentity;

use std::net::SocketAddr;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};

fn channel(identity: WorkerIdentity) -> (Channel, mpsc::Receiver<crate::transport::channel::Outbound>) {
    let (tx, rx) = mpsc::channel(4);
    let peer: SocketAddr = ([127, 0, 0, 1], 40000).into();
    (Channel::new(identity, peer, tx), rx)
}

/// **VALUE**: Verifies a fresh tracker reports both workers disconnected.
///
/// **WHY THIS MATTERS**: The UI shows this state before any worker starts.
///
/// **BUG THIS CATCHES**: Would catch a tracker claiming health it does not have.
#[test]
fn given_new_tracker_when_snapshot_then_all_disconnected() {
    let tracker = HealthTracker::new(5, Duration::from_millis(10));

    let snapshot = tracker.snapshot();

    assert_eq!(snapshot.len(), 2);
    assert!(snapshot.iter().all(|s| s.link == LinkState::Disconnected && !s.healthy));
    assert!(tracker.channel(Engine).is_none());
}

/// **VALUE**: Verifies that connecting marks the worker healthy and resets budgets.
///
/// **WHY THIS MATTERS**: A worker that came back after crashes gets a fresh retry budget.
///
/// **BUG THIS CATCHES**: Would catch the retry count surviving a successful reconnect.
#[test]
fn given_failures_recorded_when_channel_connects_then_healthy_and_budgets_reset() {
    // GIVEN: Two crashes and one reconnect failure on the engine
    let mut tracker = HealthTracker::new(5, Duration::from_millis(10));
    tracker.state_mut(Engine).restart_budget.record_failure();
    tracker.state_mut(Engine).restart_budget.record_failure();
    tracker.state_mut(Engine).reconnect_budget.record_failure();
    let (ch, _rx) = channel(Engine);

    // WHEN: A channel is installed
    let previous = tracker.connect(ch);

    // THEN: Healthy with zeroed counters
    assert!(previous.is_none());
    let status = tracker.status(Engine);
    assert!(status.healthy);
    assert_eq!(status.link, LinkState::Connected);
    assert_eq!(status.restart_count, 0);
    assert_eq!(status.reconnect_count, 0);
    assert!(status.last_seen_at.is_some());
    assert!(!tracker.status(Inference).healthy);
}

/// **VALUE**: Verifies a newer connection supersedes the old one and the old one's
/// close is ignored.
///
/// **WHY THIS MATTERS**: A worker reconnecting before the old socket finishes closing
/// must not be marked disconnected by that late close.
///
/// **BUG THIS CATCHES**: Would catch disconnect ignoring the channel id.
#[test]
fn given_superseded_channel_when_old_one_closes_then_worker_stays_connected() {
    // GIVEN: Two successive channels for inference
    let mut tracker = HealthTracker::new(5, Duration::from_millis(10));
    let (old, _old_rx) = channel(Inference);
    let old_id = old.id();
    let (new, _new_rx) = channel(Inference);
    let new_id = new.id();
    tracker.connect(old);
    let replaced = tracker.connect(new);

    // WHEN: The old channel reports closed
    let changed = tracker.disconnect(Inference, old_id);

    // THEN: Ignored; the new channel is current
    assert_eq!(replaced.map(|c| c.id()), Some(old_id));
    assert!(!changed);
    assert!(tracker.is_current(Inference, new_id));
    assert!(tracker.status(Inference).healthy);

    // AND: Closing the current one disconnects
    assert!(tracker.disconnect(Inference, new_id));
    assert_eq!(tracker.status(Inference).link, LinkState::Disconnected);
}

/// **VALUE**: Verifies that a channel whose writer is gone is not healthy.
///
/// **WHY THIS MATTERS**: Health must mean "a send can actually reach the worker".
///
/// **BUG THIS CATCHES**: Would catch health derived from link state alone.
#[test]
fn given_writer_dropped_when_status_then_not_healthy() {
    // GIVEN: A connected channel whose receiving side is dropped
    let mut tracker = HealthTracker::new(5, Duration::from_millis(10));
    let (ch, rx) = channel(Engine);
    tracker.connect(ch);
    drop(rx);

    // WHEN/THEN: Not healthy
    assert!(!tracker.status(Engine).healthy);
}

/// **VALUE**: Verifies a reconnect window only counts against the launch it was
/// opened for.
///
/// **WHY THIS MATTERS**: A window left over from a crashed launch can expire
/// after the replacement starts; charging it to the new launch burns its budget
/// before it had a chance to connect.
///
/// **BUG THIS CATCHES**: Would catch reconnect timers that ignore the generation.
#[test]
fn given_relaunched_worker_when_old_reconnect_window_checked_then_not_awaiting() {
    // GIVEN: Engine generation 2 running and not yet connected
    let mut tracker = HealthTracker::new(5, Duration::from_millis(10));
    let state = tracker.state_mut(Engine);
    state.process = Some(ProcessHandle::new(Engine, 2, None, oneshot::channel().0));
    state.process_status = ProcessStatus::Running;

    // WHEN/THEN: Only the current generation's window applies
    assert!(tracker.state(Engine).awaiting_reconnect(2));
    assert!(!tracker.state(Engine).awaiting_reconnect(1));

    // AND: Nothing is awaited once connected or restarting
    let (ch, _rx) = channel(Engine);
    tracker.connect(ch);
    assert!(!tracker.state(Engine).awaiting_reconnect(2));
    tracker.drop_channel(Engine);
    tracker.state_mut(Engine).process_status = ProcessStatus::Restarting;
    assert!(!tracker.state(Engine).awaiting_reconnect(2));
}
