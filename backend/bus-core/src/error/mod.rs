pub mod bus;
pub mod codec;
pub mod config;
pub mod spawn;
pub mod startup;
pub mod transport;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error(transparent)]
    Spawn(#[from] spawn::SpawnError),

    #[error(transparent)]
    Transport(#[from] transport::TransportError),

    #[error(transparent)]
    Codec(#[from] codec::CodecError),

    #[error(transparent)]
    Bus(#[from] bus::BusError),

    #[error(transparent)]
    Startup(#[from] startup::StartupError),

    #[error(transparent)]
    Config(#[from] config::ConfigError),
}
