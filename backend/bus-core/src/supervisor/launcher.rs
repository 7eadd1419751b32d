use crate::error::spawn::SpawnError;
use crate::supervisor::{ProcessExit, ProcessHandle, ProcessSink};
use crate::ui::{LogStream, UiEvent};
use crate::worker::{WorkerIdentity, WorkerSpec};

use common::ErrorLocation;

use std::env::current_exe;
use std::io::{Error as IoError, ErrorKind};
use std::panic::Location;
use std::path::Path;
use std::process::Stdio;

use log::{debug, info, warn};
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Child as TokioChild;
use tokio::process::Command as TokioCommand;
use tokio::spawn as TokioSpawn;
use tokio::sync::oneshot;

/// Starts worker processes.
///
/// The launched process must report its exit exactly once on
/// `sink.exits`, tagged with `generation`.
pub trait ProcessLauncher: Send + Sync {
    fn launch(
        &self,
        spec: &WorkerSpec,
        generation: u64,
        sink: ProcessSink,
    ) -> Result<ProcessHandle, SpawnError>;
}

/// Launches real OS processes with tokio.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioLauncher;

pub(crate) fn build_command(spec: &WorkerSpec, program: &Path) -> TokioCommand {
    let mut cmd = TokioCommand::new(program);
    cmd.args(&spec.args)
        .envs(&spec.env)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    if let Some(dir) = &spec.working_dir {
        cmd.current_dir(dir);
    }
    cmd
}

impl TokioLauncher {
    fn spawn_child(&self, spec: &WorkerSpec) -> Result<TokioChild, SpawnError> {
        let identity = spec.identity;
        let program = Path::new(&spec.program);

        match build_command(spec, program).spawn() {
            Ok(child) => Ok(child),
            Err(err) if err.kind() == ErrorKind::NotFound && program.components().count() == 1 => {
                debug!("{} not in PATH, trying next to the controller", spec.program);
                self.spawn_local_binary(spec)
            }
            Err(err) => Err(SpawnError::Spawn {
                message: format!("Failed to spawn {identity} ({}): {err}", spec.program),
                location: ErrorLocation::from(Location::caller()),
                source: Box::new(err),
            }),
        }
    }

    fn spawn_local_binary(&self, spec: &WorkerSpec) -> Result<TokioChild, SpawnError> {
        let exe = current_exe().map_err(|e| SpawnError::Spawn {
            message: format!("Failed to get current executable path: {e}"),
            location: ErrorLocation::from(Location::caller()),
            source: Box::new(e),
        })?;

        let dir = exe.parent().ok_or_else(|| SpawnError::Spawn {
            message: format!("Executable has no parent directory: {}", exe.display()),
            location: ErrorLocation::from(Location::caller()),
            source: Box::new(IoError::new(ErrorKind::NotFound, "no parent dir")),
        })?;

        let local_path = dir.join(&spec.program);
        debug!("Attempting to spawn from {}", local_path.display());

        build_command(spec, &local_path)
            .spawn()
            .map_err(|e| SpawnError::Spawn {
                message: format!(
                    "Failed to spawn {} from {}: {e}",
                    spec.identity,
                    local_path.display()
                ),
                location: ErrorLocation::from(Location::caller()),
                source: Box::new(e),
            })
    }
}

impl ProcessLauncher for TokioLauncher {
    fn launch(
        &self,
        spec: &WorkerSpec,
        generation: u64,
        sink: ProcessSink,
    ) -> Result<ProcessHandle, SpawnError> {
        let identity = spec.identity;
        let mut child = self.spawn_child(spec)?;
        let pid = child.id();

        if let Some(stdout) = child.stdout.take() {
            forward_output(identity, LogStream::Stdout, stdout, sink.clone());
        }
        if let Some(stderr) = child.stderr.take() {
            forward_output(identity, LogStream::Stderr, stderr, sink.clone());
        }

        let (kill_tx, kill_rx) = oneshot::channel::<()>();

        TokioSpawn(async move {
            let status = tokio::select! {
                status = child.wait() => status,
                _ = kill_rx => {
                    if let Err(e) = child.start_kill() {
                        debug!("Kill of {identity} failed: {e}");
                    }
                    child.wait().await
                }
            };

            let code = match status {
                Ok(status) => {
                    info!("{identity} (generation {generation}) exited: {status}");
                    status.code()
                }
                Err(e) => {
                    warn!("Waiting on {identity} (generation {generation}) failed: {e}");
                    None
                }
            };

            let _ = sink.exits.send(ProcessExit {
                identity,
                generation,
                code,
            });
        });

        Ok(ProcessHandle::new(identity, generation, pid, kill_tx))
    }
}

fn forward_output<R>(identity: WorkerIdentity, stream: LogStream, reader: R, sink: ProcessSink)
where
    R: AsyncRead + Unpin + Send + 'static,
{
    TokioSpawn(async move {
        let mut lines = BufReader::new(reader).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            match stream {
                LogStream::Stdout => info!("[{identity}] {line}"),
                LogStream::Stderr => warn!("[{identity}] {line}"),
            }
            let _ = sink.ui.send(UiEvent::WorkerLog {
                worker: identity,
                stream,
                line,
            });
        }
    });
}
