//! Localhost WebSocket transport between the controller and its workers.
//!
//! The controller binds one endpoint per worker and the worker connects to
//! the URL handed to it in its environment. Each endpoint:
//!
//! - Listens on `127.0.0.1` only and rejects non-loopback peers
//! - Requires a sealed `HELLO` naming its worker as the first frame
//! - Forwards every later binary frame, still encoded, to the bus
//!
//! A newer connection for the same worker supersedes the older one; the
//! bus decides which [`Channel`] is current.

pub mod channel;
pub mod client;
pub(crate) mod connection_state;

pub use channel::{Channel, ChannelId, OUTBOUND_BUFFER};
pub use client::WorkerClient;

use crate::codec::Codec;
use crate::error::transport::TransportError;
use crate::supervisor::process::find_port_owner;
use crate::transport::channel::Outbound;
use crate::transport::connection_state::{ConnectionState, HelloRejection};
use crate::worker::WorkerIdentity;
use crate::{ENDPOINT_BASE_URL, LOOPBACK_HOST};

use common::ErrorLocation;

use std::io::ErrorKind;
use std::net::SocketAddr;
use std::panic::Location;
use std::time::Duration;

use backoff::ExponentialBackoff;
use backoff::backoff::Backoff;
use futures_util::{SinkExt, StreamExt};
use log::{debug, error, info, trace, warn};
use tokio::net::{TcpListener, TcpStream};
use tokio::spawn as TokioSpawn;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{sleep as TokioSleep, timeout as TokioTimeout};
use tokio_tungstenite::accept_async;
use tokio_tungstenite::tungstenite::Message;

/// How long a freshly accepted socket has to send its `HELLO`.
pub const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// First pause after a failed `accept`; doubles while failures persist.
pub const ACCEPT_RETRY_MIN: Duration = Duration::from_millis(50);

pub const ACCEPT_RETRY_MAX: Duration = Duration::from_secs(2);

/// Pacing for a listener whose `accept` keeps failing (e.g. out of descriptors).
pub fn accept_backoff() -> ExponentialBackoff {
    ExponentialBackoff {
        current_interval: ACCEPT_RETRY_MIN,
        initial_interval: ACCEPT_RETRY_MIN,
        randomization_factor: 0.0,
        multiplier: 2.0,
        max_interval: ACCEPT_RETRY_MAX,
        max_elapsed_time: None,
        ..Default::default()
    }
}

/// Events emitted by endpoint tasks to the bus.
#[derive(Debug)]
pub enum TransportEvent {
    /// A worker completed its handshake.
    Opened(Channel),
    /// An encoded frame arrived on `channel`.
    Frame {
        identity: WorkerIdentity,
        channel: ChannelId,
        bytes: Vec<u8>,
    },
    /// The socket behind `channel` closed or failed.
    Closed {
        identity: WorkerIdentity,
        channel: ChannelId,
    },
}

/// A bound but not yet serving listener for one worker.
#[derive(Debug)]
pub struct Endpoint {
    identity: WorkerIdentity,
    listener: TcpListener,
    port: u16,
}

impl Endpoint {
    pub fn identity(&self) -> WorkerIdentity {
        self.identity
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// URL the worker should connect to.
    pub fn url(&self) -> String {
        format!("{ENDPOINT_BASE_URL}:{}", self.port)
    }
}

/// Bind the endpoint for `identity` on `127.0.0.1:<port>`.
///
/// Port 0 picks an ephemeral port.
///
/// # Errors
///
/// - [`TransportError::PortInUse`] if another process holds the port
///   (naming it when netstat can resolve the owner)
/// - [`TransportError::Bind`] for any other bind failure
pub async fn bind_endpoint(identity: WorkerIdentity, port: u16) -> Result<Endpoint, TransportError> {
    let address = format!("{LOOPBACK_HOST}:{port}");

    let listener = match TcpListener::bind(&address).await {
        Ok(listener) => listener,
        Err(e) if e.kind() == ErrorKind::AddrInUse => {
            let owner = match find_port_owner(port) {
                Ok(Some(owner)) => owner,
                Ok(None) => "an unknown process".to_string(),
                Err(query_err) => {
                    debug!("Could not resolve owner of port {port}: {query_err}");
                    "an unknown process".to_string()
                }
            };
            error!("Endpoint for {identity} cannot bind {address}: held by {owner}");
            return Err(TransportError::PortInUse {
                port,
                owner,
                location: ErrorLocation::from(Location::caller()),
            });
        }
        Err(e) => {
            return Err(TransportError::Bind {
                message: format!("Failed to bind {address} for {identity}"),
                location: ErrorLocation::from(Location::caller()),
                source: e,
            });
        }
    };

    let port = listener.local_addr()?.port();
    info!("Endpoint for {identity} listening on {LOOPBACK_HOST}:{port}");

    Ok(Endpoint {
        identity,
        listener,
        port,
    })
}

/// Accept worker connections on `endpoint` until the task is aborted.
pub fn serve(
    endpoint: Endpoint,
    codec: Codec,
    events: mpsc::UnboundedSender<TransportEvent>,
) -> JoinHandle<()> {
    TokioSpawn(async move {
        let identity = endpoint.identity;
        let mut retry = accept_backoff();
        loop {
            match endpoint.listener.accept().await {
                Ok((stream, addr)) => {
                    retry.reset();
                    debug!("{identity} endpoint: connection from {addr}");
                    let codec = codec.clone();
                    let events = events.clone();
                    TokioSpawn(async move {
                        if let Err(e) = handle_connection(stream, addr, identity, codec, events).await
                        {
                            warn!("{identity} connection from {addr} ended with error: {e}");
                        }
                    });
                }
                Err(e) => {
                    let delay = retry.next_backoff().unwrap_or(ACCEPT_RETRY_MAX);
                    warn!("{identity} endpoint accept failed: {e}; retrying in {delay:?}");
                    TokioSleep(delay).await;
                }
            }
        }
    })
}

async fn handle_connection(
    stream: TcpStream,
    addr: SocketAddr,
    identity: WorkerIdentity,
    codec: Codec,
    events: mpsc::UnboundedSender<TransportEvent>,
) -> Result<(), TransportError> {
    if !addr.ip().is_loopback() {
        warn!("Rejected non-loopback connection from {addr} on {identity} endpoint");
        return Ok(());
    }

    let ws_stream = accept_async(stream)
        .await
        .map_err(|e| TransportError::Handshake {
            message: format!("WebSocket handshake with {addr} failed: {e}"),
            location: ErrorLocation::from(Location::caller()),
        })?;

    let (mut write, mut read) = ws_stream.split();
    let mut state = ConnectionState::new(identity);

    let first = match TokioTimeout(HANDSHAKE_TIMEOUT, read.next()).await {
        Ok(Some(Ok(Message::Binary(data)))) => data,
        Ok(Some(Ok(_))) => {
            warn!("{addr} sent a non-binary first frame to {identity} endpoint");
            return Ok(());
        }
        Ok(Some(Err(e))) => {
            return Err(TransportError::Read {
                message: format!("Error reading hello from {addr}: {e}"),
                location: ErrorLocation::from(Location::caller()),
            });
        }
        Ok(None) => {
            debug!("{addr} disconnected before hello");
            return Ok(());
        }
        Err(_) => {
            warn!(
                "{addr} did not send hello to {identity} endpoint within {HANDSHAKE_TIMEOUT:?}"
            );
            return Ok(());
        }
    };

    let hello = match codec.decode(&first) {
        Ok(envelope) => envelope,
        Err(e) => {
            warn!("{addr} sent an undecodable hello to {identity} endpoint: {e}");
            return Ok(());
        }
    };

    match state.validate_hello(&hello) {
        Ok(()) => {}
        Err(HelloRejection::WrongWorker(claimed)) => {
            warn!(
                "{addr} introduced itself as {claimed} on the {} endpoint",
                state.expected()
            );
            return Ok(());
        }
        Err(HelloRejection::NotHello(kind)) => {
            warn!("{addr} opened with {kind} instead of HELLO");
            return Ok(());
        }
    }

    if !state.is_greeted() {
        return Ok(());
    }

    let (outbound_tx, mut outbound_rx) = mpsc::channel::<Outbound>(channel::OUTBOUND_BUFFER);
    let channel = Channel::new(identity, addr, outbound_tx);
    let channel_id = channel.id();

    info!("{identity} connected from {addr} (channel {channel_id})");

    TokioSpawn(async move {
        while let Some(outbound) = outbound_rx.recv().await {
            match outbound {
                Outbound::Frame(bytes) => {
                    if let Err(e) = write.send(Message::Binary(bytes.into())).await {
                        warn!("Write to {identity} (channel {channel_id}) failed: {e}");
                        break;
                    }
                }
                Outbound::Close => {
                    let _ = write.send(Message::Close(None)).await;
                    break;
                }
            }
        }
        let _ = write.close().await;
        trace!("{identity} writer for channel {channel_id} stopped");
    });

    if events.send(TransportEvent::Opened(channel)).is_err() {
        debug!("Bus is gone, dropping {identity} connection");
        return Ok(());
    }

    while let Some(msg) = read.next().await {
        match msg {
            Ok(Message::Binary(data)) => {
                trace!("{identity} frame: {} bytes", data.len());
                let event = TransportEvent::Frame {
                    identity,
                    channel: channel_id,
                    bytes: data.to_vec(),
                };
                if events.send(event).is_err() {
                    break;
                }
            }
            Ok(Message::Close(_)) => break,
            Ok(Message::Text(_)) => {
                warn!("{identity} sent a text frame; only binary frames are accepted");
            }
            Ok(_) => {}
            Err(e) => {
                warn!("Read from {identity} (channel {channel_id}) failed: {e}");
                break;
            }
        }
    }

    info!("{identity} disconnected (channel {channel_id})");
    let _ = events.send(TransportEvent::Closed {
        identity,
        channel: channel_id,
    });

    Ok(())
}
