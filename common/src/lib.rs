//! Shared primitives for the SmartAI controller.
//!
//! This crate holds the small pieces every other crate leans on. It has no
//! runtime behaviour of its own.
//!
//! ## Architecture
//!
//! - **common** (this crate): error locations and the shared secret
//! - **bus-core**: supervision, transport and message bus
//! - **smartai**: application wiring everything together

pub mod error;
pub mod shared_secret;


pub use error::error_location::ErrorLocation;
pub use error::secret_error::SecretError;
pub use shared_secret::{SHARED_SECRET_LEN, SharedSecret};
