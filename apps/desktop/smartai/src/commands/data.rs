use crate::error::SmartaiError;

use bus_core::bus::{BusHandle, BusStatistics};
use bus_core::health::WorkerStatus;
use bus_core::state::AppSnapshot;

use common::ErrorLocation;

use std::panic::Location;

use log::{debug, error};

/// Current aggregated state for the dashboard.
pub async fn get_app_data(bus: &BusHandle) -> AppSnapshot {
    debug!("Reading app data snapshot");
    bus.snapshot().await
}

/// Per-worker link and process status.
///
/// # Errors
///
/// Returns [`SmartaiError::Core`] if the bus has stopped.
pub async fn component_status(bus: &BusHandle) -> Result<Vec<WorkerStatus>, SmartaiError> {
    bus.component_status().await.map_err(|e| {
        error!("Component status unavailable: {e}");
        SmartaiError::Core {
            message: e.to_string(),
            location: ErrorLocation::from(Location::caller()),
        }
    })
}

/// Queue depth, subscribers and request counters.
///
/// # Errors
///
/// Returns [`SmartaiError::Core`] if the bus has stopped.
pub async fn statistics(bus: &BusHandle) -> Result<BusStatistics, SmartaiError> {
    bus.statistics().await.map_err(|e| {
        error!("Bus statistics unavailable: {e}");
        SmartaiError::Core {
            message: e.to_string(),
            location: ErrorLocation::from(Location::caller()),
        }
    })
}
