//! Worker side of the transport.
//!
//! Connects to an endpoint, introduces itself with `HELLO` and then
//! exchanges sealed envelopes. The bus itself never uses this; it exists for
//! Rust-built workers and for exercising endpoints end to end.

use crate::codec::Codec;
use crate::error::codec::CodecError;
use crate::error::transport::TransportError;
use crate::message::{Envelope, MessageBody};
use crate::worker::WorkerIdentity;
use crate::WS_SCHEME;

use common::ErrorLocation;

use std::panic::Location;

use futures_util::{SinkExt, StreamExt};
use log::debug;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use url::Url;

pub struct WorkerClient {
    identity: WorkerIdentity,
    codec: Codec,
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

impl WorkerClient {
    /// Connect to `url` and complete the hello handshake.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::ConnectFailed`] if the socket cannot be
    /// opened or the hello cannot be written.
    pub async fn connect(
        url: &str,
        identity: WorkerIdentity,
        codec: Codec,
    ) -> Result<Self, TransportError> {
        let parsed = Url::parse(url).map_err(|e| TransportError::ConnectFailed {
            message: format!("Invalid endpoint URL '{url}': {e}"),
            location: ErrorLocation::from(Location::caller()),
        })?;
        if parsed.scheme() != WS_SCHEME {
            return Err(TransportError::ConnectFailed {
                message: format!("Endpoint URL '{url}' is not a {WS_SCHEME}:// URL"),
                location: ErrorLocation::from(Location::caller()),
            });
        }

        let (stream, _) = connect_async(parsed.as_str())
            .await
            .map_err(|e| TransportError::ConnectFailed {
                message: format!("Failed to connect {identity} to {url}: {e}"),
                location: ErrorLocation::from(Location::caller()),
            })?;

        let mut client = Self {
            identity,
            codec,
            stream,
        };

        let hello = Envelope::new(MessageBody::Hello {
            worker: identity,
            version: Some(env!("CARGO_PKG_VERSION").to_string()),
        });
        client
            .send(&hello)
            .await
            .map_err(|e| TransportError::ConnectFailed {
                message: format!("Hello from {identity} failed: {e}"),
                location: ErrorLocation::from(Location::caller()),
            })?;

        debug!("{identity} client connected to {url}");
        Ok(client)
    }

    pub fn identity(&self) -> WorkerIdentity {
        self.identity
    }

    /// Encode and send one envelope.
    pub async fn send(&mut self, envelope: &Envelope) -> Result<(), TransportError> {
        let bytes = self
            .codec
            .encode(envelope)
            .map_err(|e| TransportError::WriteFailed {
                message: e.to_string(),
                location: ErrorLocation::from(Location::caller()),
            })?;
        self.send_raw(bytes).await
    }

    /// Send bytes as-is, bypassing the codec.
    pub async fn send_raw(&mut self, bytes: Vec<u8>) -> Result<(), TransportError> {
        self.stream
            .send(Message::Binary(bytes.into()))
            .await
            .map_err(|e| TransportError::WriteFailed {
                message: format!("{} write failed: {e}", self.identity),
                location: ErrorLocation::from(Location::caller()),
            })
    }

    /// Next decoded envelope, or `None` once the controller closes the socket.
    pub async fn recv(&mut self) -> Option<Result<Envelope, CodecError>> {
        while let Some(msg) = self.stream.next().await {
            match msg {
                Ok(Message::Binary(data)) => return Some(self.codec.decode(&data)),
                Ok(Message::Close(_)) | Err(_) => return None,
                Ok(_) => continue,
            }
        }
        None
    }

    pub async fn close(mut self) {
        let _ = self.stream.close(None).await;
    }
}
