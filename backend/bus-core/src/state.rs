//! Aggregated application state built from inbound worker messages.
//!
//! Only the bus actor writes it; everyone else reads a cloned snapshot.

use crate::message::{Envelope, MessageBody};
use crate::worker::WorkerIdentity;

use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;
use tokio::sync::RwLock;

/// Most recent alerts kept in the snapshot.
pub const MAX_ALERTS: usize = 100;

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AppSnapshot {
    pub risk_score: f64,
    pub risk_factors: Value,
    pub system_stats: Value,
    pub alerts: Vec<Value>,
    pub xai_explanation: Option<String>,
    pub threat_analysis: Value,
    pub attack_story: Value,
    pub mesh_devices: Vec<Value>,
    pub honeypot_status: Value,
    pub vpn_status: Value,
    #[serde(rename = "currentIP")]
    pub current_ip: Option<String>,
    #[serde(rename = "realIP")]
    pub real_ip: Option<String>,
    pub core_status: Option<String>,
}

impl AppSnapshot {
    /// Fold one inbound message into the snapshot.
    ///
    /// Returns `true` when the snapshot changed and the UI should be told.
    pub fn apply(&mut self, envelope: &Envelope) -> bool {
        match &envelope.body {
            MessageBody::SystemData {
                system_stats,
                vpn_status,
                current_ip,
                real_ip,
            } => {
                self.system_stats = system_stats.clone();
                if !vpn_status.is_null() {
                    self.vpn_status = vpn_status.clone();
                }
                if current_ip.is_some() {
                    self.current_ip = current_ip.clone();
                }
                if real_ip.is_some() {
                    self.real_ip = real_ip.clone();
                }
                true
            }
            MessageBody::CoreStatus { status, .. } => {
                self.core_status = Some(status.clone());
                true
            }
            MessageBody::AiAnalysis {
                risk_score,
                risk_factors,
                xai_explanation,
                threat_analysis,
                honeypot_status,
                mesh_devices,
                attack_story,
            } => {
                self.risk_score = *risk_score;
                self.risk_factors = risk_factors.clone();
                self.xai_explanation = xai_explanation.clone();
                self.threat_analysis = threat_analysis.clone();
                if !honeypot_status.is_null() {
                    self.honeypot_status = honeypot_status.clone();
                }
                if !mesh_devices.is_empty() {
                    self.mesh_devices = mesh_devices.clone();
                }
                if !attack_story.is_null() {
                    self.attack_story = attack_story.clone();
                }
                true
            }
            MessageBody::HoneypotTriggered { .. }
            | MessageBody::MeshAlert { .. }
            | MessageBody::AutoResponseTriggered { .. } => {
                let alert = serde_json::to_value(envelope).unwrap_or(Value::Null);
                self.push_alert(alert);
                true
            }
            _ => false,
        }
    }

    fn push_alert(&mut self, alert: Value) {
        self.alerts.push(alert);
        if self.alerts.len() > MAX_ALERTS {
            let excess = self.alerts.len() - MAX_ALERTS;
            self.alerts.drain(..excess);
        }
    }
}

/// Which UI data channel a change from `worker` is pushed on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataChannel {
    Core,
    Ai,
}

impl From<WorkerIdentity> for DataChannel {
    fn from(worker: WorkerIdentity) -> Self {
        match worker {
            WorkerIdentity::Engine => DataChannel::Core,
            WorkerIdentity::Inference => DataChannel::Ai,
        }
    }
}

/// Shared read handle over the snapshot.
#[derive(Debug, Clone, Default)]
pub struct AppState {
    inner: Arc<RwLock<AppSnapshot>>,
}

impl AppState {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn snapshot(&self) -> AppSnapshot {
        self.inner.read().await.clone()
    }

    /// Apply `envelope` and return the new snapshot if it changed.
    pub(crate) async fn apply(&self, envelope: &Envelope) -> Option<AppSnapshot> {
        let mut guard = self.inner.write().await;
        guard.apply(envelope).then(|| guard.clone())
    }
}
