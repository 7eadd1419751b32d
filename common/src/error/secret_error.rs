use crate::ErrorLocation;

use thiserror::Error as ThisError;

#[derive(Debug, ThisError)]
pub enum SecretError {
    #[error("Secret Generation Error: {message} {location}")]
    Generation {
        message: String,
        location: ErrorLocation,
    },

    #[error("Secret Encoding Error: {message} {location}")]
    Encoding {
        message: String,
        location: ErrorLocation,
    },

    #[error("Secret Length Error: expected {expected} bytes, got {actual} {location}")]
    Length {
        expected: usize,
        actual: usize,
        location: ErrorLocation,
    },

    #[error("Serialization Error: {message} {location}")]
    Serialization {
        message: String,
        location: ErrorLocation,
    },
}
