use crate::error::transport::TransportError;
use crate::worker::WorkerIdentity;

use common::ErrorLocation;

use std::future::Future;
use std::net::SocketAddr;
use std::panic::Location;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

/// Outbound frames buffered per channel before `send` reports `WriteFailed`.
pub const OUTBOUND_BUFFER: usize = 256;

static NEXT_CHANNEL_ID: AtomicU64 = AtomicU64::new(1);

pub type ChannelId = u64;

pub(crate) fn next_channel_id() -> ChannelId {
    NEXT_CHANNEL_ID.fetch_add(1, Ordering::Relaxed)
}

#[derive(Debug)]
pub(crate) enum Outbound {
    Frame(Vec<u8>),
    Close,
}

/// Write half of one worker connection.
///
/// Dropping the channel closes the socket once queued frames are written.
#[derive(Debug)]
pub struct Channel {
    id: ChannelId,
    identity: WorkerIdentity,
    peer: SocketAddr,
    outbound: mpsc::Sender<Outbound>,
}

impl Channel {
    pub(crate) fn new(
        identity: WorkerIdentity,
        peer: SocketAddr,
        outbound: mpsc::Sender<Outbound>,
    ) -> Self {
        Self {
            id: next_channel_id(),
            identity,
            peer,
            outbound,
        }
    }

    pub fn id(&self) -> ChannelId {
        self.id
    }

    pub fn identity(&self) -> WorkerIdentity {
        self.identity
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    pub fn is_open(&self) -> bool {
        !self.outbound.is_closed()
    }

    /// Hand already-encoded bytes to the socket writer.
    #[track_caller]
    pub fn send(&self, bytes: Vec<u8>) -> Result<(), TransportError> {
        self.outbound
            .try_send(Outbound::Frame(bytes))
            .map_err(|e| match e {
                TrySendError::Full(_) => TransportError::WriteFailed {
                    message: format!(
                        "Outbound buffer for {} is full ({OUTBOUND_BUFFER} frames)",
                        self.identity
                    ),
                    location: ErrorLocation::from(Location::caller()),
                },
                TrySendError::Closed(_) => TransportError::NotConnected {
                    worker: self.identity,
                    location: ErrorLocation::from(Location::caller()),
                },
            })
    }

    /// Resolves once the writer has room for another frame.
    ///
    /// Yields `false` if the writer has gone away instead.
    pub fn writable(&self) -> impl Future<Output = bool> + Send + 'static {
        let outbound = self.outbound.clone();
        async move { outbound.reserve().await.is_ok() }
    }

    /// Ask the writer to send a close frame and stop.
    pub fn close(self) {
        let _ = self.outbound.try_send(Outbound::Close);
    }
}
