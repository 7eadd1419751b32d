use crate::error::bus::BusError;
use crate::error::spawn::SpawnError;
use crate::error::transport::TransportError;
use crate::worker::WorkerIdentity;

use common::{ErrorLocation, SecretError};

use std::path::PathBuf;

use thiserror::Error as ThisError;

#[derive(Debug, ThisError)]
pub enum StartupError {
    #[error("Storage Error: {path}: {source} {location}")]
    Storage {
        path: PathBuf,
        location: ErrorLocation,
        #[source]
        source: std::io::Error,
    },

    #[error("Storage Root Error: {message} {location}")]
    StorageRoot {
        message: String,
        location: ErrorLocation,
    },

    #[error("Connection Timeout Error: {pending} not connected after {timeout_ms}ms {location}")]
    ConnectionTimeout {
        pending: String,
        timeout_ms: u64,
        location: ErrorLocation,
    },

    #[error("Key Sync Error: {worker}: {message} {location}")]
    KeySync {
        worker: WorkerIdentity,
        message: String,
        location: ErrorLocation,
    },

    #[error(transparent)]
    Secret(#[from] SecretError),

    #[error(transparent)]
    Spawn(#[from] SpawnError),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Bus(#[from] BusError),
}
