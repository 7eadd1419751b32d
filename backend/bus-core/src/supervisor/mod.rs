//! Worker process lifecycle: launch, output capture, exit detection.
//!
//! The supervisor never decides whether to restart; it reports
//! [`ProcessExit`] events and the bus applies the retry policy.

pub mod launcher;
pub mod process;

pub use launcher::{ProcessLauncher, TokioLauncher};

use crate::error::spawn::SpawnError;
use crate::ui::UiEvent;
use crate::worker::{WorkerIdentity, WorkerSpec};

use common::ErrorLocation;

use std::collections::BTreeMap;
use std::panic::Location;
use std::sync::Arc;

use log::{debug, info};
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::spawn_blocking;

/// Where launched processes report to.
#[derive(Debug, Clone)]
pub struct ProcessSink {
    pub exits: mpsc::UnboundedSender<ProcessExit>,
    pub ui: broadcast::Sender<UiEvent>,
}

/// A worker process ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessExit {
    pub identity: WorkerIdentity,
    pub generation: u64,
    /// `None` when terminated by a signal or the wait itself failed.
    pub code: Option<i32>,
}

impl ProcessExit {
    /// Exit code 0 is a deliberate stop; anything else is a crash.
    pub fn is_clean(&self) -> bool {
        self.code == Some(0)
    }
}

/// Ownership of one running worker process.
///
/// Dropping the handle kills the process.
#[derive(Debug)]
pub struct ProcessHandle {
    identity: WorkerIdentity,
    generation: u64,
    pid: Option<u32>,
    kill_tx: Option<oneshot::Sender<()>>,
}

impl ProcessHandle {
    pub fn new(
        identity: WorkerIdentity,
        generation: u64,
        pid: Option<u32>,
        kill_tx: oneshot::Sender<()>,
    ) -> Self {
        Self {
            identity,
            generation,
            pid,
            kill_tx: Some(kill_tx),
        }
    }

    pub fn identity(&self) -> WorkerIdentity {
        self.identity
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Force-kill without waiting.
    pub fn kill(&mut self) {
        if let Some(tx) = self.kill_tx.take() {
            debug!("Killing {} (generation {})", self.identity, self.generation);
            let _ = tx.send(());
        }
    }

    /// Ask the process to exit (SIGTERM, verified), then force-kill if it is still there.
    pub async fn terminate(mut self) {
        if let Some(pid) = self.pid {
            let identity = self.identity;
            let stopped = spawn_blocking(move || process::stop_pid(pid))
                .await
                .unwrap_or(false);
            if stopped {
                info!("{identity} (PID {pid}) stopped");
            } else {
                debug!("{identity} (PID {pid}) did not stop gracefully");
            }
        }
        self.kill();
    }
}

impl Drop for ProcessHandle {
    fn drop(&mut self) {
        self.kill();
    }
}

/// Launches workers from their specs and tracks which launch is current.
///
/// Every launch gets a fresh generation number. Exit events from any other
/// generation are stale and must be ignored by the caller.
pub struct Supervisor {
    launcher: Arc<dyn ProcessLauncher>,
    specs: BTreeMap<WorkerIdentity, WorkerSpec>,
    sink: ProcessSink,
    next_generation: u64,
    current: BTreeMap<WorkerIdentity, u64>,
}

impl Supervisor {
    pub fn new(
        launcher: Arc<dyn ProcessLauncher>,
        specs: impl IntoIterator<Item = WorkerSpec>,
        sink: ProcessSink,
    ) -> Self {
        Self {
            launcher,
            specs: specs.into_iter().map(|s| (s.identity, s)).collect(),
            sink,
            next_generation: 1,
            current: BTreeMap::new(),
        }
    }

    /// Launch `identity` from its spec.
    ///
    /// # Errors
    ///
    /// - [`SpawnError::Validation`] if there is no spec or its program is empty
    /// - [`SpawnError::Spawn`] if the launcher fails
    #[track_caller]
    pub fn spawn(&mut self, identity: WorkerIdentity) -> Result<ProcessHandle, SpawnError> {
        let spec = self
            .specs
            .get(&identity)
            .ok_or_else(|| SpawnError::Validation {
                message: format!("No launch spec for {identity}"),
                location: ErrorLocation::from(Location::caller()),
            })?;

        if spec.program.trim().is_empty() {
            return Err(SpawnError::Validation {
                message: format!("Program for {identity} is empty"),
                location: ErrorLocation::from(Location::caller()),
            });
        }

        let generation = self.next_generation;
        self.next_generation += 1;

        let handle = self.launcher.launch(spec, generation, self.sink.clone())?;
        self.current.insert(identity, generation);

        info!(
            "Launched {identity} (generation {generation}, PID {:?}): {}",
            handle.pid(),
            spec.command_line()
        );
        Ok(handle)
    }

    /// Whether `exit` belongs to the launch currently considered live.
    pub fn is_current(&self, exit: &ProcessExit) -> bool {
        self.current.get(&exit.identity) == Some(&exit.generation)
    }

    /// Stop treating the current launch of `identity` as live.
    pub fn retire(&mut self, identity: WorkerIdentity) {
        self.current.remove(&identity);
    }

    pub fn spec(&self, identity: WorkerIdentity) -> Option<&WorkerSpec> {
        self.specs.get(&identity)
    }
}
