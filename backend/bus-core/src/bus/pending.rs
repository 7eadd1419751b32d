//! Correlation table for in-flight requests.
//!
//! Each entry leaves the table exactly once: resolved by a reply, expired by
//! its timer, or cancelled. Whatever arrives afterwards finds nothing.

use crate::error::bus::BusError;
use crate::message::Envelope;
use crate::worker::WorkerIdentity;

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use tokio::sync::oneshot;

/// Deadline horizon for timeouts too large to add to `Instant::now()`.
const FAR_FUTURE: Duration = Duration::from_secs(60 * 60 * 24 * 365 * 30);

pub type Resolver = oneshot::Sender<Result<Envelope, BusError>>;

#[derive(Debug)]
pub struct PendingRequest {
    pub id: u64,
    pub target: WorkerIdentity,
    pub timeout: Duration,
    pub deadline: Instant,
    resolver: Resolver,
}

impl PendingRequest {
    fn complete(self, outcome: Result<Envelope, BusError>) {
        // The caller may have given up; nothing to do then.
        let _ = self.resolver.send(outcome);
    }
}

#[derive(Debug, PartialEq, Eq)]
pub enum Resolution {
    Delivered,
    /// No such request: never issued, already timed out, or already answered.
    Unknown,
    /// The reply came from a worker the request was not sent to.
    WrongWorker { expected: WorkerIdentity },
}

#[derive(Debug, Default)]
pub struct PendingRequests {
    last_id: u64,
    entries: BTreeMap<u64, PendingRequest>,
}

impl PendingRequests {
    pub fn new() -> Self {
        Self::default()
    }

    /// Next correlation id; strictly increasing for the life of the bus.
    pub fn next_id(&mut self) -> u64 {
        self.last_id += 1;
        self.last_id
    }

    pub fn insert(&mut self, id: u64, target: WorkerIdentity, timeout: Duration, resolver: Resolver) {
        let now = Instant::now();
        let deadline = now
            .checked_add(timeout)
            .or_else(|| now.checked_add(FAR_FUTURE))
            .unwrap_or(now);
        self.entries.insert(
            id,
            PendingRequest {
                id,
                target,
                timeout,
                deadline,
                resolver,
            },
        );
    }

    pub fn resolve(&mut self, id: u64, from: WorkerIdentity, reply: Envelope) -> Resolution {
        match self.entries.get(&id) {
            None => Resolution::Unknown,
            Some(entry) if entry.target != from => Resolution::WrongWorker {
                expected: entry.target,
            },
            Some(_) => {
                if let Some(entry) = self.entries.remove(&id) {
                    entry.complete(Ok(reply));
                }
                Resolution::Delivered
            }
        }
    }

    /// Remove `id` so the caller can fail it; `None` if it already completed.
    pub fn expire(&mut self, id: u64) -> Option<PendingRequest> {
        self.entries.remove(&id)
    }

    /// Fail every request sent to `target` with the error built by `make_error`.
    pub fn cancel_for<F>(&mut self, target: WorkerIdentity, make_error: F) -> usize
    where
        F: Fn(&PendingRequest) -> BusError,
    {
        let ids: Vec<u64> = self
            .entries
            .values()
            .filter(|entry| entry.target == target)
            .map(|entry| entry.id)
            .collect();

        for id in &ids {
            if let Some(entry) = self.entries.remove(id) {
                let error = make_error(&entry);
                entry.complete(Err(error));
            }
        }
        ids.len()
    }

    pub fn cancel_all<F>(&mut self, make_error: F) -> usize
    where
        F: Fn(&PendingRequest) -> BusError,
    {
        let entries = std::mem::take(&mut self.entries);
        let count = entries.len();
        for (_, entry) in entries {
            let error = make_error(&entry);
            entry.complete(Err(error));
        }
        count
    }

    pub fn fail(entry: PendingRequest, error: BusError) {
        entry.complete(Err(error));
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn last_id(&self) -> u64 {
        self.last_id
    }
}
