//! Per-target FIFO buffer for messages sent while a worker is unreachable.

use crate::message::Envelope;
use crate::worker::WorkerIdentity;

use std::collections::{BTreeMap, VecDeque};
use std::fmt::Display;
use std::time::SystemTime;

use log::{debug, warn};
use serde::{Deserialize, Serialize};

/// What to do when a target's queue is full.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverflowPolicy {
    /// Evict the oldest queued message to make room.
    #[default]
    DropOldest,
    /// Refuse the new message.
    Reject,
}

#[derive(Debug, Clone)]
pub struct QueuedMessage {
    pub target: WorkerIdentity,
    pub message: Envelope,
    pub enqueued_at: SystemTime,
}

#[derive(Debug)]
pub enum EnqueueOutcome {
    Queued,
    /// Queued after evicting the oldest entry.
    QueuedAfterEviction(Box<QueuedMessage>),
    Rejected,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlushReport {
    pub sent: usize,
    pub remaining: usize,
}

#[derive(Debug)]
pub struct OfflineQueue {
    capacity: usize,
    policy: OverflowPolicy,
    queues: BTreeMap<WorkerIdentity, VecDeque<QueuedMessage>>,
}

impl OfflineQueue {
    pub fn new(capacity: usize, policy: OverflowPolicy) -> Self {
        Self {
            capacity,
            policy,
            queues: BTreeMap::new(),
        }
    }

    pub fn enqueue(&mut self, target: WorkerIdentity, message: Envelope) -> EnqueueOutcome {
        let capacity = self.capacity;
        let queue = self.queues.entry(target).or_default();

        let mut evicted = None;
        if queue.len() >= capacity {
            match self.policy {
                OverflowPolicy::Reject => {
                    warn!(
                        "Offline queue for {target} is full ({capacity}), rejecting {}",
                        message.kind()
                    );
                    return EnqueueOutcome::Rejected;
                }
                OverflowPolicy::DropOldest => {
                    evicted = queue.pop_front();
                    if let Some(old) = &evicted {
                        warn!(
                            "Offline queue for {target} is full ({capacity}), dropped oldest {}",
                            old.message.kind()
                        );
                    }
                }
            }
        }

        debug!("Queued {} for {target} ({} pending)", message.kind(), queue.len() + 1);
        queue.push_back(QueuedMessage {
            target,
            message,
            enqueued_at: SystemTime::now(),
        });

        match evicted {
            Some(old) => EnqueueOutcome::QueuedAfterEviction(Box::new(old)),
            None => EnqueueOutcome::Queued,
        }
    }

    /// Send queued messages for `target` oldest first.
    ///
    /// Stops at the first failed send; that message and everything behind it
    /// stay queued so order is preserved for the next flush.
    pub fn flush<F, E>(&mut self, target: WorkerIdentity, mut send: F) -> FlushReport
    where
        F: FnMut(&Envelope) -> Result<(), E>,
        E: Display,
    {
        let Some(queue) = self.queues.get_mut(&target) else {
            return FlushReport::default();
        };

        let mut sent = 0;
        while let Some(front) = queue.front() {
            match send(&front.message) {
                Ok(()) => {
                    queue.pop_front();
                    sent += 1;
                }
                Err(e) => {
                    warn!(
                        "Flush to {target} stopped after {sent} messages: {e} ({} still queued)",
                        queue.len()
                    );
                    break;
                }
            }
        }

        FlushReport {
            sent,
            remaining: queue.len(),
        }
    }

    pub fn len(&self, target: WorkerIdentity) -> usize {
        self.queues.get(&target).map_or(0, VecDeque::len)
    }

    pub fn total_len(&self) -> usize {
        self.queues.values().map(VecDeque::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.total_len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
