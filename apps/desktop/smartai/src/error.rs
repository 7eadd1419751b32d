use common::ErrorLocation;

use serde::Serialize;
use thiserror::Error;

/// Errors surfaced to the operator.
///
/// These errors are rendered as JSON for the UI collaborator, but we keep
/// structured error information and location tracking internally.
#[derive(Debug, Error, Serialize)]
#[serde(tag = "type", content = "data")]
pub enum SmartaiError {
    /// Error from this App
    #[error("SmartAI Error: {message} {location}")]
    Smartai {
        message: String,
        location: ErrorLocation,
    },

    /// Error from bus-core operations (config, bus, orchestrator)
    #[error("Core Error: {message} {location}")]
    Core {
        message: String,
        location: ErrorLocation,
    },

    /// Startup did not complete
    #[error("Startup Error: {message} {location}")]
    Startup {
        message: String,
        location: ErrorLocation,
    },

    /// Operator input could not be understood
    #[error("Input Error: {message} {location}")]
    Input {
        message: String,
        location: ErrorLocation,
    },

    /// Writing an export file failed
    #[error("Export Error: {message} {location}")]
    Export {
        message: String,
        location: ErrorLocation,
    },
}
