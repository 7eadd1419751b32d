use crate::worker::WorkerIdentity;

use common::ErrorLocation;

use thiserror::Error as ThisError;

#[derive(Debug, ThisError)]
pub enum BusError {
    #[error("Timeout Error: request {request_id} to {worker} got no reply in {timeout_ms}ms {location}")]
    Timeout {
        worker: WorkerIdentity,
        request_id: u64,
        timeout_ms: u64,
        location: ErrorLocation,
    },

    #[error("Send Failed Error: {worker}: {message} {location}")]
    SendFailed {
        worker: WorkerIdentity,
        message: String,
        location: ErrorLocation,
    },

    #[error("Max Retries Exceeded Error: {worker} crashed {retries} times {location}")]
    MaxRetriesExceeded {
        worker: WorkerIdentity,
        retries: u32,
        location: ErrorLocation,
    },

    #[error("Worker Restarting Error: request {request_id} to {worker} was cancelled {location}")]
    WorkerRestarting {
        worker: WorkerIdentity,
        request_id: u64,
        location: ErrorLocation,
    },

    #[error("Shutdown Error: the bus is shutting down {location}")]
    Shutdown { location: ErrorLocation },

    #[error("Actor Error: {message} {location}")]
    Actor {
        message: String,
        location: ErrorLocation,
    },
}

impl BusError {
    /// Stable label for log lines and UI error payloads.
    pub fn error_category(&self) -> &'static str {
        match self {
            BusError::Timeout { .. } => "timeout",
            BusError::SendFailed { .. } => "send_failed",
            BusError::MaxRetriesExceeded { .. } => "max_retries_exceeded",
            BusError::WorkerRestarting { .. } => "worker_restarting",
            BusError::Shutdown { .. } => "shutdown",
            BusError::Actor { .. } => "actor",
        }
    }
}
