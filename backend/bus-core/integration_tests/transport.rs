use crate::helpers::{TestBus, WAIT, fast_settings, wait_for_event};

use bus_core::codec::Codec;
use bus_core::error::transport::TransportError;
use bus_core::message::{Envelope, MessageBody};
use bus_core::transport::bind_endpoint;
use bus_core::transport::client::WorkerClient;
use bus_core::ui::UiEvent;
use bus_core::worker::WorkerIdentity::{Engine, Inference};

use common::SharedSecret;

use std::net::TcpListener as StdTcpListener;
use std::time::Duration;

use tokio::time::{sleep, timeout};

/// **VALUE**: Verifies a worker greeting the wrong endpoint is turned away.
///
/// **WHY THIS MATTERS**: Messages are routed by endpoint; a mix-up would send engine
/// commands to the inference worker.
///
/// **BUG THIS CATCHES**: Would catch the HELLO identity not being checked.
#[tokio::test]
async fn given_inference_hello_on_engine_endpoint_when_connected_then_closed_and_not_registered() {
    // GIVEN: A running bus and the engine's launch spec
    let mut test = TestBus::start(fast_settings(5)).await;
    test.bus.spawn_workers().await.unwrap();
    let engine_launch = test.next_launch(Engine).await;
    let url = engine_launch.env(bus_core::ENV_WS_URL).unwrap().to_string();

    // WHEN: Inference connects to the engine endpoint
    let mut client = WorkerClient::connect(&url, Inference, engine_launch.codec())
        .await
        .unwrap();

    // THEN: The socket is closed and nobody is connected
    let next = timeout(WAIT, client.recv()).await.unwrap();
    assert!(next.is_none());
    assert!(!test.bus.is_connected(Engine));
    assert!(!test.bus.is_connected(Inference));
}

/// **VALUE**: Verifies a peer with the wrong key cannot register.
///
/// **WHY THIS MATTERS**: The shared key is the only thing authenticating workers.
///
/// **BUG THIS CATCHES**: Would catch unauthenticated HELLO frames being accepted.
#[tokio::test]
async fn given_wrong_key_when_worker_connects_then_not_registered() {
    // GIVEN: A running bus
    let mut test = TestBus::start(fast_settings(5)).await;
    test.bus.spawn_workers().await.unwrap();
    let launch = test.next_launch(Engine).await;
    let url = launch.env(bus_core::ENV_WS_URL).unwrap().to_string();

    // WHEN: Connecting with a different key
    let rogue = Codec::new(&SharedSecret::generate().unwrap());
    let mut client = WorkerClient::connect(&url, Engine, rogue).await.unwrap();

    // THEN: Dropped, not connected
    let next = timeout(WAIT, client.recv()).await.unwrap();
    assert!(next.is_none());
    assert!(!test.bus.is_connected(Engine));
}

/// **VALUE**: Verifies a corrupt frame is dropped without killing the connection.
///
/// **WHY THIS MATTERS**: One bad frame must not disconnect a healthy worker.
///
/// **BUG THIS CATCHES**: Would catch decode errors tearing down the channel.
#[tokio::test]
async fn given_corrupt_frame_when_received_then_discarded_and_channel_stays_up() {
    // GIVEN: A connected engine
    let mut test = TestBus::start(fast_settings(5)).await;
    let mut events = test.bus.ui_events();
    let mut client = test.spawn_and_connect(Engine).await;

    // WHEN: It sends junk followed by a valid status
    client.send_raw(b"not a sealed frame".to_vec()).await.unwrap();
    client
        .send(&Envelope::new(MessageBody::CoreStatus {
            status: "scanning".to_string(),
            detail: None,
        }))
        .await
        .unwrap();

    // THEN: The status arrives and the engine is still connected
    wait_for_event(&mut events, |e| matches!(e, UiEvent::CoreData { .. })).await;
    assert_eq!(
        test.bus.snapshot().await.core_status.as_deref(),
        Some("scanning")
    );
    assert!(test.bus.is_connected(Engine));
}

/// **VALUE**: Verifies a reconnect supersedes the previous connection.
///
/// **WHY THIS MATTERS**: A restarted worker may connect before the old socket is
/// noticed as dead; traffic must go to the new one.
///
/// **BUG THIS CATCHES**: Would catch the old socket's close disconnecting the new one.
#[tokio::test]
async fn given_second_connection_when_first_closes_then_worker_stays_connected() {
    // GIVEN: An engine connected twice
    let mut test = TestBus::start(fast_settings(5)).await;
    let first = test.spawn_and_connect(Engine).await;
    let launch = test
        .launcher
        .history()
        .into_iter()
        .find(|l| l.identity() == Engine)
        .unwrap();
    let mut second = launch.connect().await;
    sleep(Duration::from_millis(100)).await;

    // WHEN: The first connection closes
    first.close().await;
    sleep(Duration::from_millis(100)).await;

    // THEN: Still connected, and sends reach the second connection
    assert!(test.bus.is_connected(Engine));
    assert!(
        test.bus
            .send(Engine, MessageBody::ToggleVpn { enabled: true })
            .await
    );
    let received = timeout(WAIT, second.recv()).await.unwrap().unwrap().unwrap();
    assert!(matches!(
        received.body,
        MessageBody::ToggleVpn { enabled: true }
    ));
}

/// **VALUE**: Verifies an occupied port is reported as such.
///
/// **WHY THIS MATTERS**: "Port 8080 in use" is the most common startup failure and the
/// operator needs to know it is a port clash.
///
/// **BUG THIS CATCHES**: Would catch AddrInUse being reported as a generic bind error.
#[tokio::test]
async fn given_port_taken_when_endpoint_bound_then_port_in_use() {
    // GIVEN: A port held by another listener
    let holder = StdTcpListener::bind("127.0.0.1:0").unwrap();
    let port = holder.local_addr().unwrap().port();

    // WHEN: Binding the engine endpoint there
    let result = bind_endpoint(Engine, port).await;

    // THEN: PortInUse naming the port
    match result {
        Err(TransportError::PortInUse { port: p, .. }) => assert_eq!(p, port),
        other => panic!("expected PortInUse, got {other:?}"),
    }
}

/// **VALUE**: Verifies client-side URL validation.
///
/// **WHY THIS MATTERS**: Workers get the URL from the environment; a bad value should
/// fail with a clear error.
///
/// **BUG THIS CATCHES**: Would catch non-ws URLs being dialled.
#[tokio::test]
async fn given_http_url_when_client_connects_then_connect_failed() {
    let codec = Codec::new(&SharedSecret::generate().unwrap());

    let result = WorkerClient::connect("http://127.0.0.1:1", Engine, codec).await;

    assert!(matches!(result, Err(TransportError::ConnectFailed { .. })));
}
