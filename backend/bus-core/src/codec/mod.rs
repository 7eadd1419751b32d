//! Frame codec: envelope JSON sealed inside a protobuf frame.
//!
//! ```text
//! Envelope --serde_json--> bytes --FrameCipher::seal--> SealedFrame --prost--> wire
//! ```
//!
//! Decoding runs the same pipeline backwards. Any failure along the way
//! (truncated protobuf, wrong version, failed authentication, malformed JSON,
//! unknown message tag) surfaces as [`CodecError::DecodeFailed`] or
//! [`CodecError::UnsupportedVersion`]; the caller logs and discards the frame.

pub mod cipher;

pub use cipher::{AesGcmCipher, FrameCipher, NONCE_LEN};

use crate::error::codec::CodecError;
use crate::message::Envelope;

use common::{ErrorLocation, SharedSecret};

use std::panic::Location;
use std::sync::Arc;

use prost::Message as ProstMessage;

/// Current frame format version.
pub const FRAME_VERSION: u32 = 1;

/// Outer wire frame.
#[derive(Clone, PartialEq, prost::Message)]
pub struct SealedFrame {
    #[prost(uint32, tag = "1")]
    pub version: u32,
    #[prost(bytes = "vec", tag = "2")]
    pub nonce: Vec<u8>,
    #[prost(bytes = "vec", tag = "3")]
    pub ciphertext: Vec<u8>,
}

/// Shareable encoder/decoder bound to one cipher.
#[derive(Clone)]
pub struct Codec {
    cipher: Arc<dyn FrameCipher>,
}

impl Codec {
    pub fn new(secret: &SharedSecret) -> Self {
        Self::with_cipher(Arc::new(AesGcmCipher::new(secret)))
    }

    pub fn with_cipher(cipher: Arc<dyn FrameCipher>) -> Self {
        Self { cipher }
    }

    #[track_caller]
    pub fn encode(&self, message: &Envelope) -> Result<Vec<u8>, CodecError> {
        let plaintext = serde_json::to_vec(message).map_err(|e| CodecError::EncodeFailed {
            message: format!("Failed to serialize {}: {e}", message.kind()),
            location: ErrorLocation::from(Location::caller()),
        })?;

        let (nonce, ciphertext) = self.cipher.seal(&plaintext)?;
        let frame = SealedFrame {
            version: FRAME_VERSION,
            nonce,
            ciphertext,
        };

        Ok(frame.encode_to_vec())
    }

    #[track_caller]
    pub fn decode(&self, bytes: &[u8]) -> Result<Envelope, CodecError> {
        let frame = SealedFrame::decode(bytes)?;

        if frame.version != FRAME_VERSION {
            return Err(CodecError::UnsupportedVersion {
                version: frame.version,
                location: ErrorLocation::from(Location::caller()),
            });
        }

        let plaintext = self.cipher.open(&frame.nonce, &frame.ciphertext)?;
        Ok(serde_json::from_slice(&plaintext)?)
    }
}

/// One-shot encode with a fresh cipher for `secret`.
pub fn encode(message: &Envelope, secret: &SharedSecret) -> Result<Vec<u8>, CodecError> {
    Codec::new(secret).encode(message)
}

/// One-shot decode with a fresh cipher for `secret`.
pub fn decode(bytes: &[u8], secret: &SharedSecret) -> Result<Envelope, CodecError> {
    Codec::new(secret).decode(bytes)
}
