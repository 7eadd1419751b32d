//! Boot sequence and process-wide ownership of the bus.
//!
//! Steps run strictly in order and any failure aborts startup:
//!
//! 1. Create storage directories
//! 2. Generate the shared secret
//! 3. Bind both endpoints, start the bus, launch both workers
//! 4. Wait for both workers to connect
//! 5. Key-sync each worker and require a matching acknowledgement
//! 6. Announce readiness

use crate::bus::{self, BusHandle, BusParts};
use crate::codec::Codec;
use crate::config::{BusConfig, StoragePaths};
use crate::error::startup::StartupError;
use crate::message::MessageBody;
use crate::supervisor::{ProcessLauncher, TokioLauncher};
use crate::transport::{self, Endpoint};
use crate::ui::{self, UiEvent};
use crate::worker::{WorkerIdentity, WorkerSpec};
use crate::{
    ENV_DB_PATH, ENV_ENCRYPTION_KEY, ENV_PIPE_NAME, ENV_WORKER, ENV_WS_PORT, ENV_WS_URL,
};

use common::{ErrorLocation, SharedSecret};

use std::panic::Location;
use std::sync::Arc;

use futures_util::future::try_join_all;
use log::{error, info};
use tokio::sync::broadcast;
use uuid::Uuid;

/// Build the launch spec for `identity` from its config and bound endpoint.
pub fn build_spec(
    config: &BusConfig,
    identity: WorkerIdentity,
    endpoint: &Endpoint,
    secret: &SharedSecret,
    paths: &StoragePaths,
) -> WorkerSpec {
    let worker = config.worker(identity);

    let mut spec = WorkerSpec::new(identity, worker.program.clone())
        .with_args(worker.args.iter().cloned())
        .with_env(ENV_ENCRYPTION_KEY, secret.to_base64())
        .with_env(ENV_WS_PORT, endpoint.port().to_string())
        .with_env(ENV_WS_URL, endpoint.url())
        .with_env(ENV_WORKER, identity.as_str())
        .with_env(ENV_PIPE_NAME, worker.pipe_name.clone());

    if identity == WorkerIdentity::Inference {
        spec = spec.with_env(ENV_DB_PATH, paths.databases.display().to_string());
    }
    if let Some(dir) = &worker.working_dir {
        spec = spec.with_working_dir(dir);
    }
    for (key, value) in &worker.env {
        spec = spec.with_env(key.clone(), value.clone());
    }
    spec
}

pub struct Orchestrator {
    config: BusConfig,
    paths: StoragePaths,
    launcher: Arc<dyn ProcessLauncher>,
    ui: broadcast::Sender<UiEvent>,
}

impl Orchestrator {
    pub fn new(config: BusConfig, paths: StoragePaths) -> Self {
        let (ui, _) = ui::channel();
        Self {
            config,
            paths,
            launcher: Arc::new(TokioLauncher),
            ui,
        }
    }

    /// Replace the process launcher (tests use an in-process fake).
    pub fn with_launcher(mut self, launcher: Arc<dyn ProcessLauncher>) -> Self {
        self.launcher = launcher;
        self
    }

    /// Subscribe to UI events, including those emitted during startup.
    pub fn ui_events(&self) -> broadcast::Receiver<UiEvent> {
        self.ui.subscribe()
    }

    /// Run the boot sequence.
    ///
    /// On failure a [`UiEvent::Fatal`] is emitted, anything already started
    /// is shut down, and the error is returned.
    pub async fn start(self) -> Result<Running, StartupError> {
        let ui = self.ui.clone();
        match self.boot().await {
            Ok(running) => Ok(running),
            Err(e) => {
                error!("Startup failed: {e}");
                let _ = ui.send(UiEvent::Fatal {
                    worker: None,
                    category: "startup".to_string(),
                    message: e.to_string(),
                });
                Err(e)
            }
        }
    }

    async fn boot(self) -> Result<Running, StartupError> {
        info!("Step 1/6: preparing storage");
        self.paths.ensure()?;

        info!("Step 2/6: generating shared secret");
        let secret = SharedSecret::generate()?;

        info!("Step 3/6: binding endpoints and launching workers");
        let mut endpoints = Vec::with_capacity(WorkerIdentity::ALL.len());
        for identity in WorkerIdentity::ALL {
            let port = self.config.worker(identity).port;
            endpoints.push(transport::bind_endpoint(identity, port).await?);
        }

        let specs = endpoints
            .iter()
            .map(|endpoint| {
                build_spec(
                    &self.config,
                    endpoint.identity(),
                    endpoint,
                    &secret,
                    &self.paths,
                )
            })
            .collect();

        let handle = bus::start(BusParts {
            settings: self.config.bus_settings(),
            codec: Codec::new(&secret),
            endpoints,
            launcher: self.launcher.clone(),
            specs,
            ui: self.ui.clone(),
        });

        let running = Running {
            bus: handle,
            paths: self.paths.clone(),
        };

        if let Err(e) = self.connect_and_sync(&running.bus, &secret).await {
            running.bus.shutdown().await;
            return Err(e);
        }

        info!("Step 6/6: application ready");
        let _ = self.ui.send(UiEvent::AppReady);
        Ok(running)
    }

    async fn connect_and_sync(
        &self,
        bus: &BusHandle,
        secret: &SharedSecret,
    ) -> Result<(), StartupError> {
        bus.spawn_workers().await?;

        info!("Step 4/6: waiting for workers to connect");
        let timeout = self.config.connect_timeout();
        if let Err(pending) = bus
            .wait_until_connected(&WorkerIdentity::ALL, timeout)
            .await
        {
            let pending: Vec<&str> = pending.iter().map(WorkerIdentity::as_str).collect();
            return Err(StartupError::ConnectionTimeout {
                pending: pending.join(", "),
                timeout_ms: self.config.startup.connect_timeout_ms,
                location: ErrorLocation::from(Location::caller()),
            });
        }

        info!("Step 5/6: synchronizing keys");
        try_join_all(
            WorkerIdentity::ALL
                .iter()
                .map(|identity| self.key_sync(bus, *identity, secret)),
        )
        .await?;

        Ok(())
    }

    async fn key_sync(
        &self,
        bus: &BusHandle,
        identity: WorkerIdentity,
        secret: &SharedSecret,
    ) -> Result<(), StartupError> {
        let nonce = Uuid::new_v4().to_string();
        let request = MessageBody::KeySync {
            key: secret.to_base64(),
            nonce: nonce.clone(),
        };

        let reply = bus
            .request(identity, request, self.config.key_sync_timeout())
            .await
            .map_err(|e| StartupError::KeySync {
                worker: identity,
                message: e.to_string(),
                location: ErrorLocation::from(Location::caller()),
            })?;

        match reply.body {
            MessageBody::KeySyncAck { nonce: echoed } if echoed == nonce => {
                info!("{identity} acknowledged key sync");
                Ok(())
            }
            MessageBody::KeySyncAck { .. } => Err(StartupError::KeySync {
                worker: identity,
                message: "acknowledgement carried the wrong nonce".to_string(),
                location: ErrorLocation::from(Location::caller()),
            }),
            other => Err(StartupError::KeySync {
                worker: identity,
                message: format!("expected KEY_SYNC_ACK, got {}", other.kind()),
                location: ErrorLocation::from(Location::caller()),
            }),
        }
    }
}

/// A booted system: the bus plus the storage layout it runs in.
#[derive(Clone)]
pub struct Running {
    bus: BusHandle,
    paths: StoragePaths,
}

impl Running {
    pub fn bus(&self) -> &BusHandle {
        &self.bus
    }

    pub fn paths(&self) -> &StoragePaths {
        &self.paths
    }

    pub async fn shutdown(&self) {
        info!("Shutting down");
        self.bus.shutdown().await;
    }
}
