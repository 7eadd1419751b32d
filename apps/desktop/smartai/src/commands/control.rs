use bus_core::bus::{BroadcastReport, BusHandle};
use bus_core::message::MessageBody;
use bus_core::worker::WorkerIdentity;

use log::{info, warn};
use serde::Serialize;
use serde_json::Value;

/// What happened to a command sent to a worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Delivery {
    /// Written to the worker's channel.
    Sent,
    /// Worker offline; held in the offline queue until it reconnects.
    Queued,
}

impl From<bool> for Delivery {
    fn from(sent: bool) -> Self {
        if sent { Delivery::Sent } else { Delivery::Queued }
    }
}

async fn send_to_engine(bus: &BusHandle, body: MessageBody) -> Delivery {
    let kind = body.kind();
    let delivery = Delivery::from(bus.send(WorkerIdentity::Engine, body).await);
    match delivery {
        Delivery::Sent => info!("{kind} sent to engine"),
        Delivery::Queued => warn!("Engine offline, {kind} queued"),
    }
    delivery
}

/// Turn the VPN on or off.
pub async fn toggle_vpn(bus: &BusHandle, enabled: bool) -> Delivery {
    send_to_engine(bus, MessageBody::ToggleVpn { enabled }).await
}

/// Ask the engine for a full system scan.
pub async fn request_full_scan(bus: &BusHandle) -> Delivery {
    send_to_engine(bus, MessageBody::FullScan {}).await
}

/// Bring the VPN up, on `profile` if given, else the engine's default.
pub async fn activate_vpn(bus: &BusHandle, profile: Option<String>) -> Delivery {
    send_to_engine(bus, MessageBody::ActivateVpn { profile }).await
}

/// Hand a firewall rule to the engine. The rule is passed through as-is.
pub async fn modify_firewall(bus: &BusHandle, rule: Value) -> Delivery {
    send_to_engine(bus, MessageBody::ModifyFirewall { rule }).await
}

/// Ask the engine to block a process.
pub async fn block_process(bus: &BusHandle, pid: u32, reason: Option<String>) -> Delivery {
    send_to_engine(bus, MessageBody::BlockProcess { pid, reason }).await
}

/// Switch emergency mode on every connected worker.
pub async fn emergency_mode(bus: &BusHandle, enable: bool) -> BroadcastReport {
    let report = bus.broadcast(MessageBody::EmergencyMode { enable }).await;
    if !report.all_delivered() {
        warn!("Emergency mode did not reach every worker: {:?}", report.delivered);
    }
    report
}
