//! On-disk layout under the storage root.

use crate::error::startup::StartupError;
use crate::{APP_NAME, ENV_HOME};

use common::ErrorLocation;

use std::panic::Location;
use std::path::{Path, PathBuf};

use log::{debug, info};

const DATABASES_DIR: &str = "databases";
const LOGS_DIR: &str = "logs";
const KEYS_DIR: &str = "keys";
const CONFIG_DIR: &str = "config";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoragePaths {
    pub root: PathBuf,
    pub databases: PathBuf,
    pub logs: PathBuf,
    pub keys: PathBuf,
    pub config: PathBuf,
}

impl StoragePaths {
    pub fn from_root(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        Self {
            databases: root.join(DATABASES_DIR),
            logs: root.join(LOGS_DIR),
            keys: root.join(KEYS_DIR),
            config: root.join(CONFIG_DIR),
            root,
        }
    }

    /// `SMARTAI_HOME` if set, else `<data dir>/SmartAI`.
    pub fn resolve() -> Result<Self, StartupError> {
        Self::resolve_with(|key| std::env::var(key).ok())
    }

    #[track_caller]
    pub fn resolve_with<F>(lookup: F) -> Result<Self, StartupError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(home) = lookup(ENV_HOME).filter(|h| !h.trim().is_empty()) {
            debug!("Storage root from {ENV_HOME}: {home}");
            return Ok(Self::from_root(home));
        }

        let data_dir = dirs::data_dir().ok_or_else(|| StartupError::StorageRoot {
            message: format!("No platform data directory and {ENV_HOME} is not set"),
            location: ErrorLocation::from(Location::caller()),
        })?;

        Ok(Self::from_root(data_dir.join(APP_NAME)))
    }

    pub fn all(&self) -> [&Path; 5] {
        [
            &self.root,
            &self.databases,
            &self.logs,
            &self.keys,
            &self.config,
        ]
    }

    /// Create every directory that does not exist yet.
    pub fn ensure(&self) -> Result<(), StartupError> {
        for dir in self.all() {
            std::fs::create_dir_all(dir).map_err(|e| StartupError::Storage {
                path: dir.to_path_buf(),
                location: ErrorLocation::from(Location::caller()),
                source: e,
            })?;
        }
        info!("Storage ready at {}", self.root.display());
        Ok(())
    }
}
