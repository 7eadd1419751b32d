use crate::error::SmartaiError;

use bus_core::bus::BusHandle;

use common::ErrorLocation;

use std::panic::Location;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use log::{error, info};

const EXPORT_FILE_PREFIX: &str = "attack-story-";

/// `attack-story-<unix millis>.json`
pub fn export_file_name(at: SystemTime) -> String {
    let millis = at
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or_default();
    format!("{EXPORT_FILE_PREFIX}{millis}.json")
}

/// Write the current attack story as pretty JSON into `dir`.
///
/// # Returns
///
/// The path of the written file.
///
/// # Errors
///
/// Returns [`SmartaiError::Export`] if serialization or the write fails.
pub async fn export_attack_story(bus: &BusHandle, dir: &Path) -> Result<PathBuf, SmartaiError> {
    let story = bus.snapshot().await.attack_story;

    let contents = serde_json::to_string_pretty(&story).map_err(|e| SmartaiError::Export {
        message: format!("Failed to serialize attack story: {e}"),
        location: ErrorLocation::from(Location::caller()),
    })?;

    let path = dir.join(export_file_name(SystemTime::now()));
    tokio::fs::write(&path, contents).await.map_err(|e| {
        error!("Attack story export to {} failed: {e}", path.display());
        SmartaiError::Export {
            message: format!("Failed to write {}: {e}", path.display()),
            location: ErrorLocation::from(Location::caller()),
        }
    })?;

    info!("Attack story exported to {}", path.display());
    Ok(path)
}
