use crate::transport::channel::Outbound;
use crate::transport::{ACCEPT_RETRY_MAX, ACCEPT_RETRY_MIN, Channel, accept_backoff};
use crate::worker::WorkerIdentity::Engine;

use std::time::Duration;

use backoff::backoff::Backoff;
use tokio::sync::mpsc;
use tokio::time::timeout;

fn about(actual: Duration, expected: Duration) -> bool {
    actual >= expected && actual < expected + Duration::from_millis(1)
}

/// **VALUE**: Verifies failed accepts are paced, growing up to a cap.
///
/// **WHY THIS MATTERS**: A listener out of file descriptors fails every accept
/// instantly; retrying without a pause pins a core and floods the log.
///
/// **BUG THIS CATCHES**: Would catch a zero first delay, unbounded growth, or a
/// pause that never shrinks after the listener recovers.
#[test]
fn given_repeated_accept_failures_when_backing_off_then_delay_grows_to_cap() {
    // GIVEN
    let mut retry = accept_backoff();

    // WHEN
    let delays: Vec<Duration> = (0..10).filter_map(|_| retry.next_backoff()).collect();

    // THEN
    assert_eq!(delays.len(), 10, "accept retries never give up");
    assert!(about(delays[0], ACCEPT_RETRY_MIN), "first delay {:?}", delays[0]);
    assert!(delays.windows(2).all(|w| w[0] <= w[1]));
    assert!(about(delays[9], ACCEPT_RETRY_MAX), "last delay {:?}", delays[9]);

    // AND: A successful accept starts over
    retry.reset();
    assert!(about(retry.next_backoff().unwrap(), ACCEPT_RETRY_MIN));
}

/// **VALUE**: Verifies `writable` waits for the writer to drain.
///
/// **WHY THIS MATTERS**: A flush that filled the outbound buffer resumes on this
/// signal; resolving early would spin, never resolving would strand the queue.
///
/// **BUG THIS CATCHES**: Would catch a signal that ignores buffer capacity or
/// hangs once the writer is gone.
#[tokio::test]
async fn given_full_outbound_buffer_when_waiting_writable_then_resolves_after_drain() {
    // GIVEN: A channel with a one-frame buffer that is full
    let (tx, mut rx) = mpsc::channel::<Outbound>(1);
    let channel = Channel::new(Engine, ([127, 0, 0, 1], 40000).into(), tx);
    channel.send(vec![1]).unwrap();
    assert!(channel.send(vec![2]).is_err());

    // WHEN: Waiting for room
    let waiting = tokio::spawn(channel.writable());
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(!waiting.is_finished());
    rx.recv().await.unwrap();

    // THEN: It resolves with room available
    assert!(timeout(Duration::from_secs(1), waiting).await.unwrap().unwrap());

    // AND: With the writer gone it resolves false
    drop(rx);
    assert!(!channel.writable().await);
}
