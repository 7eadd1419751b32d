pub mod bus;
pub mod codec;
pub mod config;
pub mod error;
pub mod health;
pub mod message;
pub mod orchestrator;
pub mod queue;
pub mod retry;
pub mod state;
pub mod supervisor;
pub mod transport;
pub mod ui;
pub mod worker;

#[cfg(test)]
mod tests;

pub const APP_NAME: &str = "SmartAI";
pub const LOOPBACK_HOST: &str = "127.0.0.1";
pub const WS_SCHEME: &str = "ws";
pub const ENDPOINT_BASE_URL: &str = const_format::concatcp!(WS_SCHEME, "://", LOOPBACK_HOST);

/// Prefix shared by every environment variable the controller reads or hands to workers.
pub const ENV_PREFIX: &str = "SMARTAI_";
pub const ENV_ENCRYPTION_KEY: &str = const_format::concatcp!(ENV_PREFIX, "ENCRYPTION_KEY");
pub const ENV_WS_PORT: &str = const_format::concatcp!(ENV_PREFIX, "WS_PORT");
pub const ENV_WS_URL: &str = const_format::concatcp!(ENV_PREFIX, "WS_URL");
pub const ENV_WORKER: &str = const_format::concatcp!(ENV_PREFIX, "WORKER");
pub const ENV_PIPE_NAME: &str = const_format::concatcp!(ENV_PREFIX, "PIPE_NAME");
pub const ENV_DB_PATH: &str = const_format::concatcp!(ENV_PREFIX, "DB_PATH");
pub const ENV_HOME: &str = const_format::concatcp!(ENV_PREFIX, "HOME");
