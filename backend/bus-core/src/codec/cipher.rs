//! Authenticated encryption for bus frames.

use crate::error::codec::CodecError;

use common::{ErrorLocation, SharedSecret};

use std::panic::Location;

use aes_gcm::aead::{Aead, KeyInit, Payload};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use rand::RngCore;
use rand::rngs::OsRng;

/// GCM nonce length in bytes.
pub const NONCE_LEN: usize = 12;

/// Associated data bound into every frame.
const FRAME_AAD: &[u8] = b"smartai-bus/v1";

/// Seals and opens frame payloads.
///
/// Implementations must reject any ciphertext they did not produce under
/// the same key.
pub trait FrameCipher: Send + Sync {
    /// Encrypt `plaintext`, returning `(nonce, ciphertext)`.
    fn seal(&self, plaintext: &[u8]) -> Result<(Vec<u8>, Vec<u8>), CodecError>;

    /// Decrypt and authenticate a sealed payload.
    fn open(&self, nonce: &[u8], ciphertext: &[u8]) -> Result<Vec<u8>, CodecError>;
}

/// AES-256-GCM keyed by the shared secret, with a fresh random nonce per frame.
#[derive(Clone)]
pub struct AesGcmCipher {
    cipher: Aes256Gcm,
}

impl AesGcmCipher {
    pub fn new(secret: &SharedSecret) -> Self {
        let key = Key::<Aes256Gcm>::from_slice(secret.as_bytes());
        Self {
            cipher: Aes256Gcm::new(key),
        }
    }
}

impl FrameCipher for AesGcmCipher {
    #[track_caller]
    fn seal(&self, plaintext: &[u8]) -> Result<(Vec<u8>, Vec<u8>), CodecError> {
        let mut nonce_bytes = [0u8; NONCE_LEN];
        OsRng
            .try_fill_bytes(&mut nonce_bytes)
            .map_err(|e| CodecError::EncodeFailed {
                message: format!("Nonce generation failed: {e}"),
                location: ErrorLocation::from(Location::caller()),
            })?;

        let ciphertext = self
            .cipher
            .encrypt(
                Nonce::from_slice(&nonce_bytes),
                Payload {
                    msg: plaintext,
                    aad: FRAME_AAD,
                },
            )
            .map_err(|e| CodecError::EncodeFailed {
                message: format!("Encryption failed: {e}"),
                location: ErrorLocation::from(Location::caller()),
            })?;

        Ok((nonce_bytes.to_vec(), ciphertext))
    }

    #[track_caller]
    fn open(&self, nonce: &[u8], ciphertext: &[u8]) -> Result<Vec<u8>, CodecError> {
        if nonce.len() != NONCE_LEN {
            return Err(CodecError::DecodeFailed {
                message: format!("Nonce must be {NONCE_LEN} bytes, got {}", nonce.len()),
                location: ErrorLocation::from(Location::caller()),
            });
        }

        self.cipher
            .decrypt(
                Nonce::from_slice(nonce),
                Payload {
                    msg: ciphertext,
                    aad: FRAME_AAD,
                },
            )
            .map_err(|_| CodecError::DecodeFailed {
                message: "Frame failed authentication".to_string(),
                location: ErrorLocation::from(Location::caller()),
            })
    }
}
