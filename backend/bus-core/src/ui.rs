//! Events pushed to the UI collaborator.

use crate::health::LinkState;
use crate::message::Envelope;
use crate::state::AppSnapshot;
use crate::worker::WorkerIdentity;

use serde::Serialize;
use tokio::sync::broadcast;

/// Buffered UI events per subscriber before the slowest one starts lagging.
pub const UI_EVENT_CAPACITY: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogStream {
    Stdout,
    Stderr,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum UiEvent {
    /// Both workers are connected and key-synced.
    AppReady,
    /// State changed by an engine message.
    CoreData { snapshot: AppSnapshot },
    /// State changed by an inference message.
    AiData { snapshot: AppSnapshot },
    ComponentCrashed {
        worker: WorkerIdentity,
        exit_code: Option<i32>,
        retry_count: u32,
    },
    HealthChanged {
        worker: WorkerIdentity,
        link: LinkState,
        retry_count: u32,
    },
    /// One line of worker stdout/stderr, passed through untouched.
    WorkerLog {
        worker: WorkerIdentity,
        stream: LogStream,
        line: String,
    },
    Broadcast { message: Envelope },
    /// Unrecoverable for `worker`, or for the whole app when `worker` is `None`.
    Fatal {
        worker: Option<WorkerIdentity>,
        category: String,
        message: String,
    },
}

impl UiEvent {
    /// Name of the UI push channel this event goes out on.
    pub fn channel(&self) -> &'static str {
        match self {
            UiEvent::AppReady => "app-ready",
            UiEvent::CoreData { .. } => "core-data",
            UiEvent::AiData { .. } => "ai-data",
            UiEvent::ComponentCrashed { .. } => "component-crash",
            UiEvent::HealthChanged { .. } => "health-changed",
            UiEvent::WorkerLog {
                stream: LogStream::Stdout,
                ..
            } => "core-log",
            UiEvent::WorkerLog {
                stream: LogStream::Stderr,
                ..
            } => "core-error",
            UiEvent::Broadcast { .. } => "broadcast",
            UiEvent::Fatal { .. } => "fatal-error",
        }
    }
}

pub fn channel() -> (broadcast::Sender<UiEvent>, broadcast::Receiver<UiEvent>) {
    broadcast::channel(UI_EVENT_CAPACITY)
}
