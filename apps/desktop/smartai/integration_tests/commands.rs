use crate::helpers::offline_bus;

use smartai::commands::control::{self, Delivery};
use smartai::commands::{data, export};

use bus_core::state::AppSnapshot;
use bus_core::worker::WorkerIdentity;

use serde_json::json;

/// **VALUE**: Verifies the dashboard pull works before any worker reports.
///
/// **WHY THIS MATTERS**: The UI polls `get_app_data` from the first frame; it
/// must get the empty snapshot rather than an error.
///
/// **BUG THIS CATCHES**: Would catch the snapshot read blocking on a worker.
#[tokio::test]
async fn given_fresh_bus_when_getting_app_data_then_default_snapshot() {
    // GIVEN
    let bus = offline_bus();

    // WHEN
    let snapshot = data::get_app_data(&bus).await;

    // THEN
    assert_eq!(snapshot, AppSnapshot::default());
    bus.shutdown().await;
}

/// **VALUE**: Verifies commands to an offline engine are queued, not lost.
///
/// **WHY THIS MATTERS**: Operators toggle the VPN while the engine restarts;
/// the command has to run once it is back.
///
/// **BUG THIS CATCHES**: Would catch the control layer reporting `Sent` for a
/// queued message, or the queue not counting it.
#[tokio::test]
async fn given_offline_engine_when_sending_commands_then_queued_and_counted() {
    // GIVEN
    let bus = offline_bus();

    // WHEN
    let vpn = control::toggle_vpn(&bus, true).await;
    let block = control::block_process(&bus, 4242, Some("test".to_string())).await;
    let stats = data::statistics(&bus).await.unwrap();

    // THEN
    assert_eq!(vpn, Delivery::Queued);
    assert_eq!(block, Delivery::Queued);
    assert_eq!(stats.queued[&WorkerIdentity::Engine], 2);
    assert_eq!(stats.queued[&WorkerIdentity::Inference], 0);
    assert_eq!(stats.total_queued, 2);
    bus.shutdown().await;
}

/// **VALUE**: Verifies emergency mode is broadcast-only and never queued.
///
/// **BUG THIS CATCHES**: Would catch a broadcast filling the offline queue,
/// which would replay a stale emergency switch on reconnect.
#[tokio::test]
async fn given_offline_workers_when_emergency_mode_then_not_delivered_or_queued() {
    // GIVEN
    let bus = offline_bus();

    // WHEN
    let report = control::emergency_mode(&bus, true).await;
    let stats = data::statistics(&bus).await.unwrap();

    // THEN
    assert!(!report.delivered_to(WorkerIdentity::Engine));
    assert!(!report.all_delivered());
    assert_eq!(stats.total_queued, 0);
    bus.shutdown().await;
}

/// **VALUE**: Verifies the attack story export writes a JSON file.
///
/// **WHY THIS MATTERS**: The export is the operator's record of an incident.
///
/// **BUG THIS CATCHES**: Would catch the file landing outside the requested
/// directory or containing something other than the story.
#[tokio::test]
async fn given_export_dir_when_exporting_attack_story_then_json_file_written() {
    // GIVEN
    let bus = offline_bus();
    let dir = tempfile::tempdir().unwrap();

    // WHEN
    let path = export::export_attack_story(&bus, dir.path()).await.unwrap();

    // THEN
    assert_eq!(path.parent().unwrap(), dir.path());
    let name = path.file_name().unwrap().to_string_lossy().into_owned();
    assert!(name.starts_with("attack-story-") && name.ends_with(".json"));
    let written: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
    assert_eq!(written, AppSnapshot::default().attack_story);
    bus.shutdown().await;
}

/// **VALUE**: Verifies status reads fail cleanly once the bus is gone.
///
/// **BUG THIS CATCHES**: Would catch a hang or panic when the UI polls during
/// shutdown.
#[tokio::test]
async fn given_stopped_bus_when_reading_status_then_core_error() {
    // GIVEN
    let bus = offline_bus();
    bus.shutdown().await;

    // WHEN
    let result = data::component_status(&bus).await;

    // THEN
    assert!(matches!(result, Err(smartai::error::SmartaiError::Core { .. })));
}

/// **VALUE**: Verifies VPN activation and firewall rules go to the engine queue.
///
/// **WHY THIS MATTERS**: Both are protective actions the operator expects to take
/// effect as soon as the engine is reachable.
///
/// **BUG THIS CATCHES**: Would catch either command being addressed to inference
/// or dropped while the engine is offline.
#[tokio::test]
async fn given_offline_engine_when_activating_vpn_and_firewall_then_both_queued_for_engine() {
    // GIVEN
    let bus = offline_bus();

    // WHEN
    let vpn = control::activate_vpn(&bus, Some("office".to_string())).await;
    let firewall = control::modify_firewall(&bus, json!({"action": "deny", "port": 445})).await;
    let stats = data::statistics(&bus).await.unwrap();

    // THEN
    assert_eq!(vpn, Delivery::Queued);
    assert_eq!(firewall, Delivery::Queued);
    assert_eq!(stats.queued[&WorkerIdentity::Engine], 2);
    assert_eq!(stats.queued[&WorkerIdentity::Inference], 0);
    bus.shutdown().await;
}
