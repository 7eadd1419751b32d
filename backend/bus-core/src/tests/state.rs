use crate::message::{Envelope, MessageBody};
use crate::state::{AppSnapshot, DataChannel, MAX_ALERTS};
use crate::worker::WorkerIdentity;

use serde_json::{Value, json};

fn analysis(risk_score: f64, honeypot_status: Value) -> Envelope {
    Envelope::new(MessageBody::AiAnalysis {
        risk_score,
        risk_factors: json!({"ports": 2}),
        xai_explanation: Some("unusual outbound traffic".to_string()),
        threat_analysis: json!({"level": "medium"}),
        honeypot_status,
        mesh_devices: Vec::new(),
        attack_story: Value::Null,
    })
}

/// **VALUE**: Verifies system data folds into the snapshot.
///
/// **WHY THIS MATTERS**: The dashboard reads these fields directly.
///
/// **BUG THIS CATCHES**: Would catch IP fields being wiped when a message omits them.
#[test]
fn given_system_data_when_applied_then_stats_and_ips_set_and_kept() {
    // GIVEN: A first message with IPs and a second without
    let mut snapshot = AppSnapshot::default();
    let first = Envelope::new(MessageBody::SystemData {
        system_stats: json!({"cpu": 12}),
        vpn_status: json!({"connected": true}),
        current_ip: Some("10.0.0.2".to_string()),
        real_ip: Some("203.0.113.7".to_string()),
    });
    let second = Envelope::new(MessageBody::SystemData {
        system_stats: json!({"cpu": 40}),
        vpn_status: Value::Null,
        current_ip: None,
        real_ip: None,
    });

    // WHEN: Both are applied
    assert!(snapshot.apply(&first));
    assert!(snapshot.apply(&second));

    // THEN: Stats updated, vpn and IPs retained
    assert_eq!(snapshot.system_stats, json!({"cpu": 40}));
    assert_eq!(snapshot.vpn_status, json!({"connected": true}));
    assert_eq!(snapshot.current_ip.as_deref(), Some("10.0.0.2"));
    assert_eq!(snapshot.real_ip.as_deref(), Some("203.0.113.7"));
}

/// **VALUE**: Verifies AI analysis updates risk and leaves absent sections alone.
///
/// **WHY THIS MATTERS**: The AI worker sends partial analyses; a missing honeypot
/// section must not blank the honeypot panel.
///
/// **BUG THIS CATCHES**: Would catch unconditional overwrites with null.
#[test]
fn given_previous_honeypot_status_when_analysis_without_it_then_status_kept() {
    // GIVEN: An analysis carrying honeypot status
    let mut snapshot = AppSnapshot::default();
    snapshot.apply(&analysis(0.4, json!({"active": 3})));

    // WHEN: A later analysis omits it
    snapshot.apply(&analysis(0.9, Value::Null));

    // THEN: Score replaced, honeypot kept
    assert_eq!(snapshot.risk_score, 0.9);
    assert_eq!(snapshot.honeypot_status, json!({"active": 3}));
    assert_eq!(snapshot.xai_explanation.as_deref(), Some("unusual outbound traffic"));
}

/// **VALUE**: Verifies alerts are capped at the most recent entries.
///
/// **WHY THIS MATTERS**: A noisy honeypot must not grow the snapshot without bound.
///
/// **BUG THIS CATCHES**: Would catch the cap dropping the newest alerts instead.
#[test]
fn given_more_alerts_than_cap_when_applied_then_oldest_dropped() {
    // GIVEN: MAX_ALERTS + 5 honeypot triggers
    let mut snapshot = AppSnapshot::default();
    for i in 0..MAX_ALERTS + 5 {
        snapshot.apply(&Envelope::new(MessageBody::HoneypotTriggered {
            process_name: format!("proc-{i}"),
            severity: Some("high".to_string()),
        }));
    }

    // THEN: Capped, newest last, oldest gone
    assert_eq!(snapshot.alerts.len(), MAX_ALERTS);
    assert_eq!(snapshot.alerts[0]["processName"], "proc-5");
    assert_eq!(
        snapshot.alerts[MAX_ALERTS - 1]["processName"],
        format!("proc-{}", MAX_ALERTS + 4).as_str()
    );
}

/// **VALUE**: Verifies control messages do not count as state changes.
///
/// **WHY THIS MATTERS**: Only real changes should push data events to the UI.
///
/// **BUG THIS CATCHES**: Would catch every message being reported as a change.
#[test]
fn given_control_message_when_applied_then_unchanged() {
    let mut snapshot = AppSnapshot::default();
    let changed = snapshot.apply(&Envelope::new(MessageBody::KeySyncAck {
        nonce: "n".to_string(),
    }));
    assert!(!changed);
    assert_eq!(snapshot, AppSnapshot::default());
}

/// **VALUE**: Verifies the worker-to-data-channel mapping.
///
/// **WHY THIS MATTERS**: Engine data goes to the core panel, inference to the AI panel.
///
/// **BUG THIS CATCHES**: Would catch swapped channels.
#[test]
fn given_worker_when_mapped_then_data_channel_matches() {
    assert_eq!(DataChannel::from(WorkerIdentity::Engine), DataChannel::Core);
    assert_eq!(DataChannel::from(WorkerIdentity::Inference), DataChannel::Ai);
}
