use crate::worker::WorkerIdentity;

use common::ErrorLocation;

use std::io::Error as IoError;
use std::panic::Location;

use thiserror::Error as ThisError;

#[derive(Debug, ThisError)]
pub enum TransportError {
    #[error("Bind Error: {message} {location}")]
    Bind {
        message: String,
        location: ErrorLocation,
        #[source]
        source: IoError,
    },

    #[error("Port In Use Error: port {port} is held by {owner} {location}")]
    PortInUse {
        port: u16,
        owner: String,
        location: ErrorLocation,
    },

    #[error("Connect Failed Error: {message} {location}")]
    ConnectFailed {
        message: String,
        location: ErrorLocation,
    },

    #[error("Handshake Error: {message} {location}")]
    Handshake {
        message: String,
        location: ErrorLocation,
    },

    #[error("Not Connected Error: {worker} has no open channel {location}")]
    NotConnected {
        worker: WorkerIdentity,
        location: ErrorLocation,
    },

    #[error("Write Failed Error: {message} {location}")]
    WriteFailed {
        message: String,
        location: ErrorLocation,
    },

    #[error("Read Error: {message} {location}")]
    Read {
        message: String,
        location: ErrorLocation,
    },

    #[error("Network Query Error: {message} {location}")]
    NetworkQuery {
        message: String,
        location: ErrorLocation,
    },

    #[error("IO Error: {message} {location}")]
    Io {
        message: String,
        location: ErrorLocation,
    },
}

impl From<IoError> for TransportError {
    #[track_caller]
    fn from(error: IoError) -> Self {
        TransportError::Io {
            message: error.to_string(),
            location: ErrorLocation::from(Location::caller()),
        }
    }
}
