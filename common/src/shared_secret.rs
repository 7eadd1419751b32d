//! The process-wide symmetric key shared with worker processes.

use crate::{ErrorLocation, SecretError};

use std::fmt;
use std::panic::Location;

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use rand::RngCore;
use rand::rngs::OsRng;
use serde::ser::Error;
use zeroize::Zeroize;

/// Key length in bytes (AES-256).
pub const SHARED_SECRET_LEN: usize = 32;

/// A symmetric key that never exposes its value in logs or debug output.
///
/// Generated once at startup and read by the codec on every frame. The
/// bytes are wiped when the last copy is dropped.
#[derive(Clone, PartialEq, Eq)]
pub struct SharedSecret {
    bytes: [u8; SHARED_SECRET_LEN],
}

impl SharedSecret {
    /// Generate a fresh key from the operating system RNG.
    #[track_caller]
    pub fn generate() -> Result<Self, SecretError> {
        let mut bytes = [0u8; SHARED_SECRET_LEN];
        OsRng
            .try_fill_bytes(&mut bytes)
            .map_err(|e| SecretError::Generation {
                message: format!("OS random source unavailable: {e}"),
                location: ErrorLocation::from(Location::caller()),
            })?;
        Ok(Self { bytes })
    }

    /// Wrap existing key material.
    pub fn from_bytes(bytes: [u8; SHARED_SECRET_LEN]) -> Self {
        Self { bytes }
    }

    /// Decode the base64 form handed to worker processes.
    #[track_caller]
    pub fn from_base64(encoded: &str) -> Result<Self, SecretError> {
        let mut decoded = BASE64
            .decode(encoded.trim())
            .map_err(|e| SecretError::Encoding {
                message: e.to_string(),
                location: ErrorLocation::from(Location::caller()),
            })?;

        if decoded.len() != SHARED_SECRET_LEN {
            let actual = decoded.len();
            decoded.zeroize();
            return Err(SecretError::Length {
                expected: SHARED_SECRET_LEN,
                actual,
                location: ErrorLocation::from(Location::caller()),
            });
        }

        let mut bytes = [0u8; SHARED_SECRET_LEN];
        bytes.copy_from_slice(&decoded);
        decoded.zeroize();
        Ok(Self { bytes })
    }

    /// Base64 form for the worker environment and the key-sync message.
    ///
    /// # Security Note
    /// Only call this when actually handing the key to a worker.
    pub fn to_base64(&self) -> String {
        BASE64.encode(self.bytes)
    }

    /// Raw key bytes for the cipher.
    #[inline]
    pub fn as_bytes(&self) -> &[u8; SHARED_SECRET_LEN] {
        &self.bytes
    }
}

impl fmt::Debug for SharedSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SharedSecret([REDACTED])")
    }
}

impl fmt::Display for SharedSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[REDACTED SHARED SECRET]")
    }
}

impl Drop for SharedSecret {
    fn drop(&mut self) {
        self.bytes.zeroize();
    }
}

// Prevent accidental serialization
impl serde::Serialize for SharedSecret {
    fn serialize<S>(&self, _serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        Err(S::Error::custom(SecretError::Serialization {
            message: String::from("SharedSecret cannot be serialized - use to_base64() explicitly"),
            location: ErrorLocation::from(Location::caller()),
        }))
    }
}
