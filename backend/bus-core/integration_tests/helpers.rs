//! Test helpers for bus integration tests.
//!
//! - A process launcher that records launches instead of starting processes
//! - Fake workers built on [`WorkerClient`]
//! - A bus wired to ephemeral endpoints
//! - UI event waiting

use bus_core::bus::{self, BusHandle, BusParts, BusSettings};
use bus_core::codec::Codec;
use bus_core::error::spawn::SpawnError;
use bus_core::message::{Envelope, MessageBody};
use bus_core::supervisor::{ProcessExit, ProcessHandle, ProcessLauncher, ProcessSink};
use bus_core::transport::bind_endpoint;
use bus_core::transport::client::WorkerClient;
use bus_core::ui::{self, UiEvent};
use bus_core::worker::{WorkerIdentity, WorkerSpec};
use bus_core::{ENV_ENCRYPTION_KEY, ENV_WS_URL};

use common::SharedSecret;

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::timeout;

/// Upper bound for anything a test waits on.
pub const WAIT: Duration = Duration::from_secs(5);

/// One recorded call to [`ProcessLauncher::launch`].
#[derive(Debug, Clone)]
pub struct Launch {
    pub spec: WorkerSpec,
    pub generation: u64,
}

impl Launch {
    pub fn identity(&self) -> WorkerIdentity {
        self.spec.identity
    }

    pub fn env(&self, key: &str) -> Option<&str> {
        self.spec.env.get(key).map(String::as_str)
    }

    pub fn codec(&self) -> Codec {
        let key = self
            .env(ENV_ENCRYPTION_KEY)
            .expect("spec should carry the encryption key");
        Codec::new(&SharedSecret::from_base64(key).expect("key should decode"))
    }

    /// Connect as the launched worker would.
    pub async fn connect(&self) -> WorkerClient {
        let url = self.env(ENV_WS_URL).expect("spec should carry the endpoint URL");
        WorkerClient::connect(url, self.identity(), self.codec())
            .await
            .expect("worker should connect")
    }
}

/// Launcher that starts nothing and lets tests decide when a "process" dies.
pub struct FakeLauncher {
    launches: mpsc::UnboundedSender<Launch>,
    history: Mutex<Vec<Launch>>,
    live: Mutex<BTreeMap<WorkerIdentity, (u64, mpsc::UnboundedSender<ProcessExit>)>>,
}

impl FakeLauncher {
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<Launch>) {
        let (launches, rx) = mpsc::unbounded_channel();
        let launcher = Self {
            launches,
            history: Mutex::new(Vec::new()),
            live: Mutex::new(BTreeMap::new()),
        };
        (Arc::new(launcher), rx)
    }

    /// Report the latest launch of `identity` as exited with `code`.
    pub fn exit(&self, identity: WorkerIdentity, code: i32) {
        let live = self.live.lock().unwrap();
        let (generation, exits) = live.get(&identity).expect("worker was never launched");
        exits
            .send(ProcessExit {
                identity,
                generation: *generation,
                code: Some(code),
            })
            .expect("bus should be listening for exits");
    }

    pub fn launch_count(&self, identity: WorkerIdentity) -> usize {
        self.history
            .lock()
            .unwrap()
            .iter()
            .filter(|l| l.identity() == identity)
            .count()
    }

    pub fn history(&self) -> Vec<Launch> {
        self.history.lock().unwrap().clone()
    }
}

impl ProcessLauncher for FakeLauncher {
    fn launch(
        &self,
        spec: &WorkerSpec,
        generation: u64,
        sink: ProcessSink,
    ) -> Result<ProcessHandle, SpawnError> {
        let identity = spec.identity;
        let launch = Launch {
            spec: spec.clone(),
            generation,
        };

        self.history.lock().unwrap().push(launch.clone());
        self.live
            .lock()
            .unwrap()
            .insert(identity, (generation, sink.exits.clone()));
        let _ = self.launches.send(launch);

        let (kill_tx, kill_rx) = oneshot::channel::<()>();
        let exits = sink.exits;
        tokio::spawn(async move {
            if kill_rx.await.is_ok() {
                let _ = exits.send(ProcessExit {
                    identity,
                    generation,
                    code: None,
                });
            }
        });

        Ok(ProcessHandle::new(identity, generation, None, kill_tx))
    }
}

/// A bus on ephemeral loopback ports with a [`FakeLauncher`].
pub struct TestBus {
    pub bus: BusHandle,
    pub launcher: Arc<FakeLauncher>,
    pub launches: mpsc::UnboundedReceiver<Launch>,
}

impl TestBus {
    pub async fn start(settings: BusSettings) -> Self {
        let secret = SharedSecret::generate().expect("OS RNG available");

        let mut endpoints = Vec::new();
        for identity in WorkerIdentity::ALL {
            endpoints.push(bind_endpoint(identity, 0).await.expect("bind should succeed"));
        }
        let specs = endpoints
            .iter()
            .map(|e| {
                WorkerSpec::new(e.identity(), "fake-worker")
                    .with_env(ENV_WS_URL, e.url())
                    .with_env(ENV_ENCRYPTION_KEY, secret.to_base64())
            })
            .collect();

        let (launcher, launches) = FakeLauncher::new();
        let (ui, _) = ui::channel();
        let bus = bus::start(BusParts {
            settings,
            codec: Codec::new(&secret),
            endpoints,
            launcher: launcher.clone(),
            specs,
            ui,
        });

        Self {
            bus,
            launcher,
            launches,
        }
    }

    /// Next launch of `identity`, skipping launches of the other worker.
    pub async fn next_launch(&mut self, identity: WorkerIdentity) -> Launch {
        timeout(WAIT, async {
            loop {
                let launch = self.launches.recv().await.expect("launcher dropped");
                if launch.identity() == identity {
                    return launch;
                }
            }
        })
        .await
        .expect("timed out waiting for a launch")
    }

    /// Launch both workers and connect `identity`.
    pub async fn spawn_and_connect(&mut self, identity: WorkerIdentity) -> WorkerClient {
        self.bus.spawn_workers().await.expect("spawn should succeed");
        let launch = self.next_launch(identity).await;
        let client = launch.connect().await;
        self.bus
            .wait_until_connected(&[identity], WAIT)
            .await
            .expect("worker should be marked connected");
        client
    }
}

/// Settings with short delays for tests.
pub fn fast_settings(max_retries: u32) -> BusSettings {
    BusSettings {
        max_retries,
        retry_delay: Duration::from_millis(30),
        request_timeout: Duration::from_secs(2),
        ..BusSettings::default()
    }
}

pub fn block_process(pid: u32) -> MessageBody {
    MessageBody::BlockProcess { pid, reason: None }
}

pub async fn recv(client: &mut WorkerClient) -> Envelope {
    timeout(WAIT, client.recv())
        .await
        .expect("timed out waiting for a frame")
        .expect("socket closed")
        .expect("frame should decode")
}

/// Run a worker that answers every request with `respond(request)` after `delay`.
pub fn spawn_responder<F>(mut client: WorkerClient, delay: Duration, respond: F) -> JoinHandle<()>
where
    F: Fn(&Envelope) -> Option<MessageBody> + Send + 'static,
{
    tokio::spawn(async move {
        while let Some(Ok(request)) = client.recv().await {
            if let Some(body) = respond(&request) {
                tokio::time::sleep(delay).await;
                let reply = Envelope::reply_to(&request, body);
                if client.send(&reply).await.is_err() {
                    break;
                }
            }
        }
    })
}

/// Answer `KEY_SYNC` with a matching acknowledgement.
pub fn ack_key_sync(request: &Envelope) -> Option<MessageBody> {
    match &request.body {
        MessageBody::KeySync { nonce, .. } => Some(MessageBody::KeySyncAck {
            nonce: nonce.clone(),
        }),
        _ => None,
    }
}

/// Wait for the first UI event matching `predicate`.
pub async fn wait_for_event<F>(events: &mut broadcast::Receiver<UiEvent>, mut predicate: F) -> UiEvent
where
    F: FnMut(&UiEvent) -> bool,
{
    timeout(WAIT, async {
        loop {
            match events.recv().await {
                Ok(event) if predicate(&event) => return event,
                Ok(_) | Err(RecvError::Lagged(_)) => continue,
                Err(RecvError::Closed) => panic!("UI event channel closed"),
            }
        }
    })
    .await
    .expect("timed out waiting for UI event")
}
