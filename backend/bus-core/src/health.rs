//! Connection registry and per-worker health.
//!
//! A worker is healthy exactly while it holds an open, handshaken channel.
//! Every mutation goes through [`HealthTracker`], which only the bus actor
//! owns.

use crate::retry::RetryBudget;
use crate::supervisor::ProcessHandle;
use crate::transport::{Channel, ChannelId};
use crate::worker::WorkerIdentity;

use std::time::{Duration, SystemTime};

use log::debug;
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkState {
    Disconnected,
    Connected,
    /// Reserved for latency-based demotion; nothing transitions here yet.
    Degraded,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessStatus {
    NotStarted,
    Running,
    Restarting,
    /// Exited cleanly or stopped at shutdown.
    Stopped,
    /// Restart budget exhausted.
    Failed,
}

#[derive(Debug)]
pub struct WorkerState {
    pub identity: WorkerIdentity,
    pub link: LinkState,
    pub channel: Option<Channel>,
    pub process: Option<ProcessHandle>,
    pub process_status: ProcessStatus,
    pub restart_budget: RetryBudget,
    pub reconnect_budget: RetryBudget,
    pub last_seen_at: Option<SystemTime>,
}

impl WorkerState {
    fn new(identity: WorkerIdentity, max_retries: u32, retry_delay: Duration) -> Self {
        Self {
            identity,
            link: LinkState::Disconnected,
            channel: None,
            process: None,
            process_status: ProcessStatus::NotStarted,
            restart_budget: RetryBudget::new(max_retries, retry_delay),
            reconnect_budget: RetryBudget::new(max_retries, retry_delay),
            last_seen_at: None,
        }
    }

    pub fn healthy(&self) -> bool {
        self.link == LinkState::Connected && self.channel.as_ref().is_some_and(Channel::is_open)
    }

    pub fn retry_count(&self) -> u32 {
        self.restart_budget.count()
    }

    /// Still waiting for launch `generation` to reconnect.
    ///
    /// False once that launch has been replaced, stopped, or reconnected.
    pub fn awaiting_reconnect(&self, generation: u64) -> bool {
        self.link == LinkState::Disconnected
            && self.process_status == ProcessStatus::Running
            && self.process.as_ref().map(ProcessHandle::generation) == Some(generation)
    }
}

/// Read-only view of one worker for status queries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkerStatus {
    pub worker: WorkerIdentity,
    pub link: LinkState,
    pub healthy: bool,
    pub process_status: ProcessStatus,
    pub pid: Option<u32>,
    pub restart_count: u32,
    pub reconnect_count: u32,
    pub last_seen_at: Option<String>,
}

#[derive(Debug)]
pub struct HealthTracker {
    engine: WorkerState,
    inference: WorkerState,
}

impl HealthTracker {
    pub fn new(max_retries: u32, retry_delay: Duration) -> Self {
        Self {
            engine: WorkerState::new(WorkerIdentity::Engine, max_retries, retry_delay),
            inference: WorkerState::new(WorkerIdentity::Inference, max_retries, retry_delay),
        }
    }

    pub fn state(&self, identity: WorkerIdentity) -> &WorkerState {
        match identity {
            WorkerIdentity::Engine => &self.engine,
            WorkerIdentity::Inference => &self.inference,
        }
    }

    pub fn state_mut(&mut self, identity: WorkerIdentity) -> &mut WorkerState {
        match identity {
            WorkerIdentity::Engine => &mut self.engine,
            WorkerIdentity::Inference => &mut self.inference,
        }
    }

    /// Install a freshly handshaken channel and mark the worker connected.
    ///
    /// Both retry budgets reset. Returns the channel it replaced, if any.
    pub fn connect(&mut self, channel: Channel) -> Option<Channel> {
        let state = self.state_mut(channel.identity());
        let previous = state.channel.replace(channel);

        state.link = LinkState::Connected;
        state.last_seen_at = Some(SystemTime::now());
        state.restart_budget.reset();
        state.reconnect_budget.reset();

        debug!("{} -> Connected", state.identity);
        previous
    }

    /// Mark the worker disconnected if `channel` is still its current one.
    ///
    /// Returns `false` for stale channel ids, leaving state untouched.
    pub fn disconnect(&mut self, identity: WorkerIdentity, channel: ChannelId) -> bool {
        let state = self.state_mut(identity);
        if state.channel.as_ref().map(Channel::id) != Some(channel) {
            return false;
        }

        state.channel = None;
        state.link = LinkState::Disconnected;
        debug!("{identity} -> Disconnected");
        true
    }

    /// Drop the current channel (crash or shutdown), returning it.
    pub fn drop_channel(&mut self, identity: WorkerIdentity) -> Option<Channel> {
        let state = self.state_mut(identity);
        state.link = LinkState::Disconnected;
        state.channel.take()
    }

    pub fn is_current(&self, identity: WorkerIdentity, channel: ChannelId) -> bool {
        self.state(identity).channel.as_ref().map(Channel::id) == Some(channel)
    }

    /// Record inbound traffic.
    pub fn touch(&mut self, identity: WorkerIdentity) {
        self.state_mut(identity).last_seen_at = Some(SystemTime::now());
    }

    pub fn channel(&self, identity: WorkerIdentity) -> Option<&Channel> {
        let state = self.state(identity);
        match state.link {
            LinkState::Connected | LinkState::Degraded => state.channel.as_ref(),
            LinkState::Disconnected => None,
        }
    }

    pub fn status(&self, identity: WorkerIdentity) -> WorkerStatus {
        let state = self.state(identity);
        WorkerStatus {
            worker: identity,
            link: state.link,
            healthy: state.healthy(),
            process_status: state.process_status,
            pid: state.process.as_ref().and_then(ProcessHandle::pid),
            restart_count: state.restart_budget.count(),
            reconnect_count: state.reconnect_budget.count(),
            last_seen_at: state
                .last_seen_at
                .map(|t| humantime::format_rfc3339_millis(t).to_string()),
        }
    }

    pub fn snapshot(&self) -> Vec<WorkerStatus> {
        WorkerIdentity::ALL.iter().map(|id| self.status(*id)).collect()
    }
}
