//! Per-connection handshake tracking.

use crate::message::{Envelope, MessageBody};
use crate::worker::WorkerIdentity;

/// Why a first frame was not accepted as a handshake.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum HelloRejection {
    NotHello(String),
    WrongWorker(WorkerIdentity),
}

/// Handshake state for one accepted socket.
///
/// An endpoint belongs to exactly one worker; the first frame must be a
/// `HELLO` naming that worker.
pub(crate) struct ConnectionState {
    expected: WorkerIdentity,
    greeted: bool,
}

impl ConnectionState {
    pub(crate) fn new(expected: WorkerIdentity) -> Self {
        Self {
            expected,
            greeted: false,
        }
    }

    /// Check the first frame and mark the connection as greeted if it is valid.
    pub(crate) fn validate_hello(&mut self, envelope: &Envelope) -> Result<(), HelloRejection> {
        match &envelope.body {
            MessageBody::Hello { worker, .. } if *worker == self.expected => {
                self.greeted = true;
                Ok(())
            }
            MessageBody::Hello { worker, .. } => Err(HelloRejection::WrongWorker(*worker)),
            other => Err(HelloRejection::NotHello(other.kind().to_string())),
        }
    }

    pub(crate) fn is_greeted(&self) -> bool {
        self.greeted
    }

    pub(crate) fn expected(&self) -> WorkerIdentity {
        self.expected
    }
}
