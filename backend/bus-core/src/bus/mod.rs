//! Message bus: send, correlated request/response, broadcast, subscriptions.
//!
//! # Architecture
//!
//! A single actor task owns every piece of mutable bus state (health
//! table, pending requests, offline queue, subscribers, app state writes)
//! and processes commands, transport events, process exits and timer
//! expiries one at a time. [`BusHandle`] is the cheap, cloneable front door;
//! each call is a command plus a oneshot reply.
//!
//! Reads that must never wait on the actor (app state, link states) go
//! through `RwLock`/`watch` shared with it.

mod actor;
pub mod pending;

use crate::codec::Codec;
use crate::error::bus::BusError;
use crate::error::startup::StartupError;
use crate::health::{LinkState, WorkerStatus};
use crate::message::{Envelope, MessageBody, MessageKind};
use crate::queue::OverflowPolicy;
use crate::state::{AppSnapshot, AppState};
use crate::supervisor::{ProcessLauncher, ProcessSink, Supervisor};
use crate::transport::{self, Endpoint};
use crate::ui::UiEvent;
use crate::worker::{WorkerIdentity, WorkerSpec};

use actor::{BusActor, BusCommand};

use common::ErrorLocation;

use std::collections::BTreeMap;
use std::error::Error as StdError;
use std::panic::Location;
use std::sync::Arc;
use std::time::Duration;

use log::info;
use serde::Serialize;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::time::timeout as TokioTimeout;

const COMMAND_BUFFER: usize = 100;

pub type HandlerError = Box<dyn StdError + Send + Sync>;

/// Subscriber callback. Runs on the bus actor, so it must not block.
pub type Handler = Arc<dyn Fn(WorkerIdentity, &Envelope) -> Result<(), HandlerError> + Send + Sync>;

pub type SubscriptionId = u64;

impl From<MessageBody> for Envelope {
    fn from(body: MessageBody) -> Self {
        Envelope::new(body)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BusSettings {
    pub max_retries: u32,
    pub retry_delay: Duration,
    pub queue_capacity: usize,
    pub overflow: OverflowPolicy,
    pub request_timeout: Duration,
}

impl Default for BusSettings {
    fn default() -> Self {
        Self {
            max_retries: 5,
            retry_delay: Duration::from_millis(5000),
            queue_capacity: 1024,
            overflow: OverflowPolicy::DropOldest,
            request_timeout: Duration::from_millis(5000),
        }
    }
}

/// Per-target outcome of a broadcast.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BroadcastReport {
    pub delivered: BTreeMap<WorkerIdentity, bool>,
}

impl BroadcastReport {
    pub fn delivered_to(&self, target: WorkerIdentity) -> bool {
        self.delivered.get(&target).copied().unwrap_or(false)
    }

    pub fn all_delivered(&self) -> bool {
        WorkerIdentity::ALL.iter().all(|t| self.delivered_to(*t))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BusStatistics {
    pub queued: BTreeMap<WorkerIdentity, usize>,
    pub total_queued: usize,
    pub subscribers: usize,
    pub last_request_id: u64,
    pub in_flight: usize,
}

/// Everything the bus needs to run.
pub struct BusParts {
    pub settings: BusSettings,
    pub codec: Codec,
    pub endpoints: Vec<Endpoint>,
    pub launcher: Arc<dyn ProcessLauncher>,
    pub specs: Vec<WorkerSpec>,
    pub ui: broadcast::Sender<UiEvent>,
}

/// Start serving `parts.endpoints` and spawn the bus actor.
///
/// Workers are not launched until [`BusHandle::spawn_workers`].
pub fn start(parts: BusParts) -> BusHandle {
    let BusParts {
        settings,
        codec,
        endpoints,
        launcher,
        specs,
        ui,
    } = parts;

    let (command_tx, command_rx) = mpsc::channel(COMMAND_BUFFER);
    let (transport_tx, transport_rx) = mpsc::unbounded_channel();
    let (exit_tx, exit_rx) = mpsc::unbounded_channel();

    let initial_links = WorkerIdentity::ALL
        .iter()
        .map(|id| (*id, LinkState::Disconnected))
        .collect();
    let (links_tx, links_rx) = watch::channel(initial_links);

    let endpoint_tasks = endpoints
        .into_iter()
        .map(|endpoint| transport::serve(endpoint, codec.clone(), transport_tx.clone()))
        .collect();
    drop(transport_tx);

    let sink = ProcessSink {
        exits: exit_tx,
        ui: ui.clone(),
    };
    let supervisor = Supervisor::new(launcher, specs, sink);
    let state = AppState::new();

    let actor = BusActor::new(
        settings,
        codec,
        supervisor,
        state.clone(),
        ui.clone(),
        links_tx,
        endpoint_tasks,
    );
    tokio::spawn(actor.run(command_rx, transport_rx, exit_rx));
    info!("Message bus started");

    BusHandle {
        commands: command_tx,
        links: links_rx,
        state,
        ui,
        settings,
    }
}

/// Cloneable handle to the running bus.
#[derive(Clone)]
pub struct BusHandle {
    commands: mpsc::Sender<BusCommand>,
    links: watch::Receiver<BTreeMap<WorkerIdentity, LinkState>>,
    state: AppState,
    ui: broadcast::Sender<UiEvent>,
    settings: BusSettings,
}

impl BusHandle {
    async fn call<T>(&self, make: impl FnOnce(oneshot::Sender<T>) -> BusCommand) -> Result<T, BusError> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(make(tx))
            .await
            .map_err(|_| BusError::Actor {
                message: "Bus actor is not running".to_string(),
                location: ErrorLocation::from(Location::caller()),
            })?;
        rx.await.map_err(|_| BusError::Actor {
            message: "Bus actor dropped the reply".to_string(),
            location: ErrorLocation::from(Location::caller()),
        })
    }

    /// Fire-and-forget send.
    ///
    /// Returns `false` if `target` is not connected or the write failed; the
    /// message is then held in the offline queue and flushed on reconnect.
    pub async fn send(&self, target: WorkerIdentity, message: impl Into<Envelope>) -> bool {
        let message = message.into();
        self.call(|reply| BusCommand::Send {
            target,
            message,
            reply,
        })
        .await
        .unwrap_or(false)
    }

    /// Send `message` with a fresh correlation id and wait for the reply.
    ///
    /// # Errors
    ///
    /// - [`BusError::SendFailed`] if the request could not be written
    /// - [`BusError::Timeout`] if no reply arrived within `timeout`
    /// - [`BusError::WorkerRestarting`] if the worker crashed meanwhile
    /// - [`BusError::Shutdown`] if the bus stopped meanwhile
    pub async fn request(
        &self,
        target: WorkerIdentity,
        message: impl Into<Envelope>,
        timeout: Duration,
    ) -> Result<Envelope, BusError> {
        let message = message.into();
        self.call(|reply| BusCommand::Request {
            target,
            message,
            timeout,
            reply,
        })
        .await?
    }

    /// [`request`](Self::request) with the configured default timeout.
    pub async fn request_default(
        &self,
        target: WorkerIdentity,
        message: impl Into<Envelope>,
    ) -> Result<Envelope, BusError> {
        self.request(target, message, self.settings.request_timeout)
            .await
    }

    /// Best-effort send to every worker plus a push to the UI. Never queues.
    pub async fn broadcast(&self, message: impl Into<Envelope>) -> BroadcastReport {
        let message = message.into();
        self.call(|reply| BusCommand::Broadcast { message, reply })
            .await
            .unwrap_or_default()
    }

    /// Run `handler` for every inbound message of `kind`.
    pub async fn subscribe<F>(&self, kind: MessageKind, handler: F) -> Result<SubscriptionId, BusError>
    where
        F: Fn(WorkerIdentity, &Envelope) -> Result<(), HandlerError> + Send + Sync + 'static,
    {
        let handler: Handler = Arc::new(handler);
        self.call(|reply| BusCommand::Subscribe {
            kind,
            handler,
            reply,
        })
        .await
    }

    pub async fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.call(|reply| BusCommand::Unsubscribe { id, reply })
            .await
            .unwrap_or(false)
    }

    /// Launch both workers.
    pub async fn spawn_workers(&self) -> Result<(), StartupError> {
        self.call(|reply| BusCommand::SpawnWorkers { reply })
            .await?
            .map_err(StartupError::from)
    }

    /// Wait until every worker in `targets` is connected.
    ///
    /// On timeout returns the workers that are still not connected.
    pub async fn wait_until_connected(
        &self,
        targets: &[WorkerIdentity],
        timeout: Duration,
    ) -> Result<(), Vec<WorkerIdentity>> {
        let mut links = self.links.clone();
        let all_connected = |map: &BTreeMap<WorkerIdentity, LinkState>| {
            targets
                .iter()
                .all(|t| map.get(t) == Some(&LinkState::Connected))
        };

        let connected = matches!(
            TokioTimeout(timeout, links.wait_for(all_connected)).await,
            Ok(Ok(_))
        );
        if connected {
            return Ok(());
        }

        let map = self.links.borrow();
        Err(targets
            .iter()
            .filter(|t| map.get(t) != Some(&LinkState::Connected))
            .copied()
            .collect())
    }

    pub fn is_connected(&self, target: WorkerIdentity) -> bool {
        self.links.borrow().get(&target) == Some(&LinkState::Connected)
    }

    pub fn app_state(&self) -> AppState {
        self.state.clone()
    }

    pub async fn snapshot(&self) -> AppSnapshot {
        self.state.snapshot().await
    }

    pub async fn component_status(&self) -> Result<Vec<WorkerStatus>, BusError> {
        self.call(|reply| BusCommand::Status { reply }).await
    }

    pub async fn statistics(&self) -> Result<BusStatistics, BusError> {
        self.call(|reply| BusCommand::Statistics { reply }).await
    }

    pub fn ui_events(&self) -> broadcast::Receiver<UiEvent> {
        self.ui.subscribe()
    }

    pub fn settings(&self) -> &BusSettings {
        &self.settings
    }

    /// Stop the bus: fail in-flight requests, close channels, stop workers.
    pub async fn shutdown(&self) {
        if self.call(|reply| BusCommand::Shutdown { reply }).await.is_err() {
            info!("Bus already stopped");
        }
    }
}
