use crate::helpers::{FakeLauncher, Launch, ack_key_sync, spawn_responder, wait_for_event};

use bus_core::config::{BusConfig, StoragePaths};
use bus_core::error::startup::StartupError;
use bus_core::message::{Envelope, MessageBody};
use bus_core::orchestrator::Orchestrator;
use bus_core::ui::UiEvent;
use bus_core::worker::WorkerIdentity::{Engine, Inference};
use bus_core::{ENV_DB_PATH, ENV_ENCRYPTION_KEY, ENV_WORKER, ENV_WS_PORT};

use common::SharedSecret;

use tempfile::{TempDir, tempdir};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

fn test_config(connect_timeout_ms: u64) -> BusConfig {
    let mut config = BusConfig::default();
    config.workers.engine.port = 0;
    config.workers.inference.port = 0;
    config.startup.connect_timeout_ms = connect_timeout_ms;
    config.startup.key_sync_timeout_ms = 2000;
    config.supervision.retry_delay_ms = 50;
    config
}

fn test_paths() -> (TempDir, StoragePaths) {
    let dir = tempdir().unwrap();
    let paths = StoragePaths::from_root(dir.path().join("smartai"));
    (dir, paths)
}

/// Connect every launched worker and answer requests with `respond`.
fn run_workers<F>(mut launches: mpsc::UnboundedReceiver<Launch>, respond: F) -> JoinHandle<()>
where
    F: Fn(&Envelope) -> Option<MessageBody> + Clone + Send + 'static,
{
    tokio::spawn(async move {
        while let Some(launch) = launches.recv().await {
            let client = launch.connect().await;
            spawn_responder(client, std::time::Duration::ZERO, respond.clone());
        }
    })
}

/// **VALUE**: Verifies the full boot sequence end to end.
///
/// **WHY THIS MATTERS**: This is what the desktop app runs at every launch.
///
/// **BUG THIS CATCHES**: Would catch:
/// - Storage directories not being created
/// - Workers not receiving their endpoint, key and identity
/// - Readiness being announced before key sync completes
#[tokio::test]
async fn given_cooperative_workers_when_started_then_ready_and_specs_complete() {
    // GIVEN: Workers that acknowledge key sync
    let (_dir, paths) = test_paths();
    let (launcher, launches) = FakeLauncher::new();
    let _workers = run_workers(launches, ack_key_sync);
    let orchestrator = Orchestrator::new(test_config(5000), paths.clone()).with_launcher(launcher.clone());
    let mut events = orchestrator.ui_events();

    // WHEN: Starting
    let running = orchestrator.start().await.expect("startup should succeed");

    // THEN: Ready, both connected, storage in place
    wait_for_event(&mut events, |e| matches!(e, UiEvent::AppReady)).await;
    assert!(running.bus().is_connected(Engine));
    assert!(running.bus().is_connected(Inference));
    assert!(paths.all().iter().all(|p| p.is_dir()));
    assert_eq!(running.paths(), &paths);

    // AND: Each worker got a complete environment with the same key
    let history = launcher.history();
    let engine = history.iter().find(|l| l.identity() == Engine).unwrap();
    let inference = history.iter().find(|l| l.identity() == Inference).unwrap();
    assert_eq!(engine.env(ENV_WORKER), Some("engine"));
    assert_eq!(inference.env(ENV_WORKER), Some("inference"));
    assert!(engine.env(ENV_WS_PORT).is_some());
    assert_ne!(engine.env(ENV_WS_PORT), inference.env(ENV_WS_PORT));
    assert_eq!(engine.env(ENV_ENCRYPTION_KEY), inference.env(ENV_ENCRYPTION_KEY));
    assert!(SharedSecret::from_base64(engine.env(ENV_ENCRYPTION_KEY).unwrap()).is_ok());
    assert_eq!(
        inference.env(ENV_DB_PATH).map(std::path::PathBuf::from),
        Some(paths.databases.clone())
    );
    assert_eq!(engine.env(ENV_DB_PATH), None);

    running.shutdown().await;
    assert!(!running.bus().is_connected(Engine));
}

/// **VALUE**: Verifies startup fails when workers never connect.
///
/// **WHY THIS MATTERS**: A missing Python runtime must produce an error naming the
/// worker, not a UI that waits forever.
///
/// **BUG THIS CATCHES**: Would catch the connect wait having no deadline or the
/// error not naming the missing workers.
#[tokio::test]
async fn given_workers_never_connect_when_started_then_connection_timeout() {
    // GIVEN: A launcher whose workers never connect
    let (_dir, paths) = test_paths();
    let (launcher, _launches) = FakeLauncher::new();
    let orchestrator = Orchestrator::new(test_config(300), paths).with_launcher(launcher);
    let mut events = orchestrator.ui_events();

    // WHEN: Starting
    let result = orchestrator.start().await;

    // THEN: ConnectionTimeout naming both workers, and a fatal UI event
    match result {
        Err(StartupError::ConnectionTimeout {
            pending,
            timeout_ms,
            ..
        }) => {
            assert_eq!(pending, "engine, inference");
            assert_eq!(timeout_ms, 300);
        }
        Err(other) => panic!("expected ConnectionTimeout, got {other}"),
        Ok(_) => panic!("startup should fail"),
    }
    let fatal = wait_for_event(&mut events, |e| matches!(e, UiEvent::Fatal { .. })).await;
    assert!(matches!(fatal, UiEvent::Fatal { worker: None, ref category, .. } if category == "startup"));
}

/// **VALUE**: Verifies a wrong key-sync acknowledgement aborts startup.
///
/// **WHY THIS MATTERS**: An acknowledgement for a different nonce means the worker is
/// not answering this controller's request.
///
/// **BUG THIS CATCHES**: Would catch any KEY_SYNC_ACK being accepted.
#[tokio::test]
async fn given_ack_with_wrong_nonce_when_started_then_key_sync_error() {
    // GIVEN: Workers that acknowledge with a made-up nonce
    let (_dir, paths) = test_paths();
    let (launcher, launches) = FakeLauncher::new();
    let _workers = run_workers(launches, |request| match request.body {
        MessageBody::KeySync { .. } => Some(MessageBody::KeySyncAck {
            nonce: "not-the-nonce".to_string(),
        }),
        _ => None,
    });
    let orchestrator = Orchestrator::new(test_config(5000), paths).with_launcher(launcher);

    // WHEN: Starting
    let result = orchestrator.start().await;

    // THEN: KeySync error
    assert!(matches!(result, Err(StartupError::KeySync { .. })));
}

/// **VALUE**: Verifies a port clash aborts startup before any worker is launched.
///
/// **WHY THIS MATTERS**: Launching workers that cannot reach their endpoint would
/// only produce a confusing timeout later.
///
/// **BUG THIS CATCHES**: Would catch bind errors being ignored.
#[tokio::test]
async fn given_port_in_use_when_started_then_transport_error_and_nothing_launched() {
    // GIVEN: The engine port already taken
    let holder = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let mut config = test_config(5000);
    config.workers.engine.port = holder.local_addr().unwrap().port();
    let (_dir, paths) = test_paths();
    let (launcher, _launches) = FakeLauncher::new();
    let orchestrator = Orchestrator::new(config, paths).with_launcher(launcher.clone());

    // WHEN: Starting
    let result = orchestrator.start().await;

    // THEN: Transport error, no launches
    assert!(matches!(result, Err(StartupError::Transport(_))));
    assert!(launcher.history().is_empty());
}
