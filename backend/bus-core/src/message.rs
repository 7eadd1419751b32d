//! Typed message envelope exchanged with the workers.
//!
//! On the wire a message is a flat JSON object:
//!
//! ```json
//! {"type": "TOGGLE_VPN", "timestamp": "2024-01-01T00:00:00.000Z", "enabled": true,
//!  "requestId": 7, "responseChannel": "response_7"}
//! ```
//!
//! The tag set is closed. An unknown `type` fails to deserialize and is
//! reported by the codec as a decode error.

use crate::worker::WorkerIdentity;

use std::fmt;
use std::time::SystemTime;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Prefix of the reply channel name attached to correlated requests.
pub const RESPONSE_CHANNEL_PREFIX: &str = "response_";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
    #[serde(flatten)]
    pub body: MessageBody,

    pub timestamp: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<u64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_channel: Option<String>,
}

impl Envelope {
    /// Wrap a body stamped with the current time.
    pub fn new(body: MessageBody) -> Self {
        Self {
            body,
            timestamp: now_rfc3339(),
            request_id: None,
            response_channel: None,
        }
    }

    /// Attach a correlation id and its reply channel name.
    pub fn with_request_id(mut self, request_id: u64) -> Self {
        self.request_id = Some(request_id);
        self.response_channel = Some(format!("{RESPONSE_CHANNEL_PREFIX}{request_id}"));
        self
    }

    /// Build a reply to `request`, echoing its correlation id.
    pub fn reply_to(request: &Envelope, body: MessageBody) -> Self {
        let mut reply = Self::new(body);
        reply.request_id = request.request_id;
        reply
    }

    pub fn kind(&self) -> MessageKind {
        self.body.kind()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(
    tag = "type",
    rename_all = "SCREAMING_SNAKE_CASE",
    rename_all_fields = "camelCase"
)]
pub enum MessageBody {
    /// First frame on every channel; names the connecting worker.
    Hello {
        worker: WorkerIdentity,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        version: Option<String>,
    },

    KeySync {
        key: String,
        nonce: String,
    },

    KeySyncAck {
        nonce: String,
    },

    SystemData {
        #[serde(default)]
        system_stats: Value,
        #[serde(default)]
        vpn_status: Value,
        #[serde(default, rename = "currentIP", skip_serializing_if = "Option::is_none")]
        current_ip: Option<String>,
        #[serde(default, rename = "realIP", skip_serializing_if = "Option::is_none")]
        real_ip: Option<String>,
    },

    CoreStatus {
        status: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        detail: Option<String>,
    },

    FullScan {},

    ToggleVpn {
        enabled: bool,
    },

    ActivateVpn {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        profile: Option<String>,
    },

    BlockProcess {
        pid: u32,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },

    ModifyFirewall {
        rule: Value,
    },

    EmergencyMode {
        enable: bool,
    },

    AiAnalysis {
        risk_score: f64,
        #[serde(default)]
        risk_factors: Value,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        xai_explanation: Option<String>,
        #[serde(default)]
        threat_analysis: Value,
        #[serde(default)]
        honeypot_status: Value,
        #[serde(default)]
        mesh_devices: Vec<Value>,
        #[serde(default)]
        attack_story: Value,
    },

    AutoResponseTriggered {
        action: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },

    HoneypotTriggered {
        process_name: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        severity: Option<String>,
    },

    MeshAlert {
        threat_level: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        recommendation: Option<String>,
    },
}

impl MessageBody {
    pub fn kind(&self) -> MessageKind {
        match self {
            MessageBody::Hello { .. } => MessageKind::Hello,
            MessageBody::KeySync { .. } => MessageKind::KeySync,
            MessageBody::KeySyncAck { .. } => MessageKind::KeySyncAck,
            MessageBody::SystemData { .. } => MessageKind::SystemData,
            MessageBody::CoreStatus { .. } => MessageKind::CoreStatus,
            MessageBody::FullScan {} => MessageKind::FullScan,
            MessageBody::ToggleVpn { .. } => MessageKind::ToggleVpn,
            MessageBody::ActivateVpn { .. } => MessageKind::ActivateVpn,
            MessageBody::BlockProcess { .. } => MessageKind::BlockProcess,
            MessageBody::ModifyFirewall { .. } => MessageKind::ModifyFirewall,
            MessageBody::EmergencyMode { .. } => MessageKind::EmergencyMode,
            MessageBody::AiAnalysis { .. } => MessageKind::AiAnalysis,
            MessageBody::AutoResponseTriggered { .. } => MessageKind::AutoResponseTriggered,
            MessageBody::HoneypotTriggered { .. } => MessageKind::HoneypotTriggered,
            MessageBody::MeshAlert { .. } => MessageKind::MeshAlert,
        }
    }
}

/// Payload-free discriminant of [`MessageBody`], used as the subscription key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum MessageKind {
    Hello,
    KeySync,
    KeySyncAck,
    SystemData,
    CoreStatus,
    FullScan,
    ToggleVpn,
    ActivateVpn,
    BlockProcess,
    ModifyFirewall,
    EmergencyMode,
    AiAnalysis,
    AutoResponseTriggered,
    HoneypotTriggered,
    MeshAlert,
}

impl MessageKind {
    /// Wire tag of this kind.
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageKind::Hello => "HELLO",
            MessageKind::KeySync => "KEY_SYNC",
            MessageKind::KeySyncAck => "KEY_SYNC_ACK",
            MessageKind::SystemData => "SYSTEM_DATA",
            MessageKind::CoreStatus => "CORE_STATUS",
            MessageKind::FullScan => "FULL_SCAN",
            MessageKind::ToggleVpn => "TOGGLE_VPN",
            MessageKind::ActivateVpn => "ACTIVATE_VPN",
            MessageKind::BlockProcess => "BLOCK_PROCESS",
            MessageKind::ModifyFirewall => "MODIFY_FIREWALL",
            MessageKind::EmergencyMode => "EMERGENCY_MODE",
            MessageKind::AiAnalysis => "AI_ANALYSIS",
            MessageKind::AutoResponseTriggered => "AUTO_RESPONSE_TRIGGERED",
            MessageKind::HoneypotTriggered => "HONEYPOT_TRIGGERED",
            MessageKind::MeshAlert => "MESH_ALERT",
        }
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub(crate) fn now_rfc3339() -> String {
    humantime::format_rfc3339_millis(SystemTime::now()).to_string()
}
