use common::ErrorLocation;

use std::panic::Location;

use thiserror::Error as ThisError;

#[derive(Debug, ThisError)]
pub enum CodecError {
    #[error("Encode Failed Error: {message} {location}")]
    EncodeFailed {
        message: String,
        location: ErrorLocation,
    },

    #[error("Decode Failed Error: {message} {location}")]
    DecodeFailed {
        message: String,
        location: ErrorLocation,
    },

    #[error("Unsupported Frame Version Error: {version} {location}")]
    UnsupportedVersion {
        version: u32,
        location: ErrorLocation,
    },
}

impl From<prost::DecodeError> for CodecError {
    #[track_caller]
    fn from(error: prost::DecodeError) -> Self {
        CodecError::DecodeFailed {
            message: format!("Invalid frame: {error}"),
            location: ErrorLocation::from(Location::caller()),
        }
    }
}

impl From<serde_json::Error> for CodecError {
    #[track_caller]
    fn from(error: serde_json::Error) -> Self {
        CodecError::DecodeFailed {
            message: format!("Invalid envelope: {error}"),
            location: ErrorLocation::from(Location::caller()),
        }
    }
}
