use crate::message::{Envelope, MessageBody, MessageKind};
use crate::worker::WorkerIdentity;

use serde_json::{Value, json};

/// **VALUE**: Verifies the flat wire shape of a correlated request.
///
/// **WHY THIS MATTERS**: Workers are written in other languages and read these keys
/// by name; `requestId` must be echoed for correlation to work at all.
///
/// **BUG THIS CATCHES**: Would catch losing `#[serde(flatten)]`, snake_case keys leaking
/// out, or the response channel name drifting from `response_<id>`.
#[test]
fn given_request_envelope_when_serialized_then_flat_camel_case_json() {
    // GIVEN: A BLOCK_PROCESS request with id 9
    let envelope = Envelope::new(MessageBody::BlockProcess {
        pid: 4242,
        reason: Some("honeypot access".to_string()),
    })
    .with_request_id(9);

    // WHEN: Serializing
    let value = serde_json::to_value(&envelope).expect("serialize");

    // THEN: Tag, fields and correlation keys sit at the top level
    assert_eq!(value["type"], "BLOCK_PROCESS");
    assert_eq!(value["pid"], 4242);
    assert_eq!(value["reason"], "honeypot access");
    assert_eq!(value["requestId"], 9);
    assert_eq!(value["responseChannel"], "response_9");
    assert!(value["timestamp"].is_string());
}

/// **VALUE**: Verifies that the IP fields use the exact casing workers send.
///
/// **WHY THIS MATTERS**: `currentIP`/`realIP` do not follow camelCase rules; a
/// mismatch leaves VPN status permanently empty.
///
/// **BUG THIS CATCHES**: Would catch the explicit renames being dropped.
#[test]
fn given_system_data_json_from_worker_when_deserialized_then_ip_fields_mapped() {
    // GIVEN: A SYSTEM_DATA payload as a worker sends it
    let raw = json!({
        "type": "SYSTEM_DATA",
        "timestamp": "2024-05-01T10:00:00.000Z",
        "systemStats": {"cpu": 3},
        "vpnStatus": {"active": true},
        "currentIP": "185.1.1.1",
        "realIP": "10.0.0.5"
    });

    // WHEN: Deserializing
    let envelope: Envelope = serde_json::from_value(raw).expect("deserialize");

    // THEN: Fields land in the typed variant
    match envelope.body {
        MessageBody::SystemData {
            current_ip,
            real_ip,
            vpn_status,
            ..
        } => {
            assert_eq!(current_ip.as_deref(), Some("185.1.1.1"));
            assert_eq!(real_ip.as_deref(), Some("10.0.0.5"));
            assert_eq!(vpn_status["active"], Value::Bool(true));
        }
        other => panic!("expected SYSTEM_DATA, got {other:?}"),
    }
    assert_eq!(envelope.request_id, None);
}

/// **VALUE**: Verifies that unknown message types are rejected.
///
/// **WHY THIS MATTERS**: Dispatch matches exhaustively on a closed set of kinds.
///
/// **BUG THIS CATCHES**: Would catch a permissive fallback variant.
#[test]
fn given_unknown_type_when_deserialized_then_error() {
    // GIVEN: JSON with an unknown tag
    let raw = json!({"type": "LAUNCH_MISSILES", "timestamp": "x"});

    // WHEN/THEN: Deserialization fails
    assert!(serde_json::from_value::<Envelope>(raw).is_err());
}

/// **VALUE**: Verifies that a reply echoes the request id without a response channel.
///
/// **WHY THIS MATTERS**: Correlation relies solely on the echoed id.
///
/// **BUG THIS CATCHES**: Would catch replies being built without the id.
#[test]
fn given_request_when_reply_to_then_request_id_echoed() {
    // GIVEN: A KEY_SYNC request
    let request = Envelope::new(MessageBody::KeySync {
        key: "k".to_string(),
        nonce: "n".to_string(),
    })
    .with_request_id(3);

    // WHEN: Building the acknowledgement
    let reply = Envelope::reply_to(
        &request,
        MessageBody::KeySyncAck {
            nonce: "n".to_string(),
        },
    );

    // THEN: Same id, no response channel
    assert_eq!(reply.request_id, Some(3));
    assert_eq!(reply.response_channel, None);
    assert_eq!(reply.kind(), MessageKind::KeySyncAck);
}

/// **VALUE**: Verifies that each kind's label matches the serialized tag.
///
/// **WHY THIS MATTERS**: Logs and subscriptions use `MessageKind::as_str`; it must agree
/// with what is on the wire.
///
/// **BUG THIS CATCHES**: Would catch a new variant added with a mismatched label.
#[test]
fn given_bodies_when_kind_labels_compared_then_match_wire_tag() {
    // GIVEN: One body of several kinds
    let bodies = vec![
        MessageBody::Hello {
            worker: WorkerIdentity::Engine,
            version: None,
        },
        MessageBody::FullScan {},
        MessageBody::EmergencyMode { enable: true },
        MessageBody::ModifyFirewall {
            rule: json!({"port": 22}),
        },
        MessageBody::HoneypotTriggered {
            process_name: "cat passwords.txt".to_string(),
            severity: Some("CRITICAL".to_string()),
        },
        MessageBody::MeshAlert {
            threat_level: "HIGH".to_string(),
            recommendation: None,
        },
        MessageBody::AutoResponseTriggered {
            action: "BLOCK".to_string(),
            reason: None,
        },
    ];

    for body in bodies {
        // WHEN: Serializing
        let value = serde_json::to_value(Envelope::new(body.clone())).expect("serialize");

        // THEN: The tag equals the kind label
        assert_eq!(value["type"], body.kind().as_str());
    }
}
