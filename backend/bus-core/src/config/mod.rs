pub mod storage;

pub use storage::StoragePaths;

use crate::bus::BusSettings;
use crate::error::config::ConfigError;
use crate::queue::OverflowPolicy;
use crate::worker::WorkerIdentity;
use crate::ENV_PREFIX;

use common::ErrorLocation;

use std::collections::BTreeMap;
use std::panic::Location;
use std::path::Path;
use std::time::Duration;

use log::{info, warn};
use serde::{Deserialize, Serialize};

pub const CONFIG_FILE_NAME: &str = "smartai.toml";
const CONFIG_VERSION: u32 = 1;

pub const ENV_ENGINE_PROGRAM: &str = const_format::concatcp!(ENV_PREFIX, "ENGINE_PROGRAM");
pub const ENV_ENGINE_PORT: &str = const_format::concatcp!(ENV_PREFIX, "ENGINE_PORT");
pub const ENV_INFERENCE_PROGRAM: &str = const_format::concatcp!(ENV_PREFIX, "INFERENCE_PROGRAM");
pub const ENV_INFERENCE_PORT: &str = const_format::concatcp!(ENV_PREFIX, "INFERENCE_PORT");

pub const DEFAULT_ENGINE_PORT: u16 = 8080;
pub const DEFAULT_INFERENCE_PORT: u16 = 8081;
pub const DEFAULT_PIPE_NAME: &str = "smartai_core_pipe";

// ============================================
// CONFIG STRUCTS
// ============================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SupervisionConfig {
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
}

impl Default for SupervisionConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            retry_delay_ms: default_retry_delay_ms(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StartupConfig {
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    #[serde(default = "default_key_sync_timeout_ms")]
    pub key_sync_timeout_ms: u64,
}

impl Default for StartupConfig {
    fn default() -> Self {
        Self {
            connect_timeout_ms: default_connect_timeout_ms(),
            key_sync_timeout_ms: default_key_sync_timeout_ms(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BusSection {
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    #[serde(default)]
    pub overflow: OverflowPolicy,
}

impl Default for BusSection {
    fn default() -> Self {
        Self {
            request_timeout_ms: default_request_timeout_ms(),
            queue_capacity: default_queue_capacity(),
            overflow: OverflowPolicy::default(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    pub program: String,
    pub args: Vec<String>,
    /// Endpoint port; 0 picks an ephemeral one.
    pub port: u16,
    pub pipe_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub working_dir: Option<String>,
    pub env: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkersConfig {
    #[serde(default = "default_engine")]
    pub engine: WorkerConfig,
    #[serde(default = "default_inference")]
    pub inference: WorkerConfig,
}

impl Default for WorkersConfig {
    fn default() -> Self {
        Self {
            engine: default_engine(),
            inference: default_inference(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BusConfig {
    #[serde(default = "default_version")]
    pub version: u32,

    #[serde(default)]
    pub supervision: SupervisionConfig,

    #[serde(default)]
    pub startup: StartupConfig,

    #[serde(default)]
    pub bus: BusSection,

    #[serde(default)]
    pub workers: WorkersConfig,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            version: CONFIG_VERSION,
            supervision: SupervisionConfig::default(),
            startup: StartupConfig::default(),
            bus: BusSection::default(),
            workers: WorkersConfig::default(),
        }
    }
}

// ============================================
// DEFAULT FUNCTIONS
// ============================================

fn default_version() -> u32 {
    CONFIG_VERSION
}
fn default_max_retries() -> u32 {
    5
}
fn default_retry_delay_ms() -> u64 {
    5000
}
fn default_connect_timeout_ms() -> u64 {
    30_000
}
fn default_key_sync_timeout_ms() -> u64 {
    5000
}
fn default_request_timeout_ms() -> u64 {
    5000
}
fn default_queue_capacity() -> usize {
    1024
}
fn default_engine() -> WorkerConfig {
    WorkerConfig {
        program: "smartai_core".to_string(),
        port: DEFAULT_ENGINE_PORT,
        pipe_name: DEFAULT_PIPE_NAME.to_string(),
        ..Default::default()
    }
}
fn default_inference() -> WorkerConfig {
    WorkerConfig {
        program: "python3".to_string(),
        args: vec!["ai_module_websocket.py".to_string()],
        port: DEFAULT_INFERENCE_PORT,
        pipe_name: DEFAULT_PIPE_NAME.to_string(),
        ..Default::default()
    }
}

// ============================================
// IMPLEMENTATION
// ============================================

impl BusConfig {
    /// Load config from {config_dir}/smartai.toml.
    ///
    /// # Returns
    ///
    /// Returns `Ok(BusConfig)` if loaded successfully or defaults if the file is missing.
    /// Returns `Err(ConfigError)` if the file exists but is unreadable or invalid.
    pub fn load(config_dir: &Path) -> Result<Self, ConfigError> {
        let config_path = config_dir.join(CONFIG_FILE_NAME);

        if !config_path.exists() {
            info!(
                "Config file not found at {}, using defaults",
                config_path.display()
            );
            return Ok(Self::default());
        }

        let contents = std::fs::read_to_string(&config_path).map_err(|e| {
            warn!("Failed to read config file: {}", e);
            ConfigError::ReadError {
                location: ErrorLocation::from(Location::caller()),
                path: config_path.clone(),
                source: e,
            }
        })?;

        let config: BusConfig = toml::from_str(&contents).map_err(|e| {
            warn!("Failed to parse config TOML: {}", e);
            ConfigError::ParseError {
                location: ErrorLocation::from(Location::caller()),
                path: config_path.clone(),
                reason: e.to_string(),
            }
        })?;

        config.validate()?;

        info!("Config loaded from {}", config_path.display());
        Ok(config)
    }

    /// Save config to {config_dir}/smartai.toml using temp file + rename.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if validation, directory creation,
    /// serialization, write or rename fails.
    pub fn save(&self, config_dir: &Path) -> Result<(), ConfigError> {
        self.validate()?;

        std::fs::create_dir_all(config_dir).map_err(|e| ConfigError::WriteError {
            location: ErrorLocation::from(Location::caller()),
            path: config_dir.to_path_buf(),
            source: e,
        })?;

        let config_path = config_dir.join(CONFIG_FILE_NAME);
        let temp_path = config_dir.join(format!("{}.tmp", CONFIG_FILE_NAME));

        let contents = toml::to_string_pretty(self).map_err(|e| ConfigError::SerializeError {
            location: ErrorLocation::from(Location::caller()),
            reason: e.to_string(),
        })?;

        std::fs::write(&temp_path, contents).map_err(|e| ConfigError::WriteError {
            location: ErrorLocation::from(Location::caller()),
            path: temp_path.clone(),
            source: e,
        })?;

        std::fs::rename(&temp_path, &config_path).map_err(|e| ConfigError::WriteError {
            location: ErrorLocation::from(Location::caller()),
            path: config_path.clone(),
            source: e,
        })?;

        info!("Config saved to {}", config_path.display());
        Ok(())
    }

    /// Validate config values.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::ValidationError`] if any value is invalid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |reason: String| ConfigError::ValidationError {
            location: ErrorLocation::from(Location::caller()),
            reason,
        };

        if self.version == 0 || self.version > CONFIG_VERSION {
            return Err(invalid(format!(
                "Invalid version: {} (expected 1-{})",
                self.version, CONFIG_VERSION
            )));
        }

        if self.supervision.retry_delay_ms == 0 {
            return Err(invalid("supervision.retry_delay_ms must be > 0".to_string()));
        }
        if self.startup.connect_timeout_ms == 0 {
            return Err(invalid("startup.connect_timeout_ms must be > 0".to_string()));
        }
        if self.startup.key_sync_timeout_ms == 0 {
            return Err(invalid("startup.key_sync_timeout_ms must be > 0".to_string()));
        }
        if self.bus.request_timeout_ms == 0 {
            return Err(invalid("bus.request_timeout_ms must be > 0".to_string()));
        }
        if self.bus.queue_capacity == 0 {
            return Err(invalid("bus.queue_capacity must be > 0".to_string()));
        }

        for identity in WorkerIdentity::ALL {
            if self.worker(identity).program.trim().is_empty() {
                return Err(invalid(format!("workers.{identity}.program must not be empty")));
            }
        }

        let engine_port = self.workers.engine.port;
        if engine_port != 0 && engine_port == self.workers.inference.port {
            return Err(invalid(format!(
                "workers.engine.port and workers.inference.port must differ (both {engine_port})"
            )));
        }

        Ok(())
    }

    /// Apply `SMARTAI_*` overrides looked up through `lookup`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::OverrideError`] for unparsable ports and
    /// [`ConfigError::ValidationError`] if the result is invalid.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(program) = lookup(ENV_ENGINE_PROGRAM) {
            info!("{ENV_ENGINE_PROGRAM} overrides engine program: {program}");
            self.workers.engine.program = program;
        }
        if let Some(program) = lookup(ENV_INFERENCE_PROGRAM) {
            info!("{ENV_INFERENCE_PROGRAM} overrides inference program: {program}");
            self.workers.inference.program = program;
        }
        if let Some(port) = lookup(ENV_ENGINE_PORT) {
            self.workers.engine.port = parse_port(ENV_ENGINE_PORT, &port)?;
        }
        if let Some(port) = lookup(ENV_INFERENCE_PORT) {
            self.workers.inference.port = parse_port(ENV_INFERENCE_PORT, &port)?;
        }

        self.validate()
    }

    /// [`apply_overrides`](Self::apply_overrides) against the process environment.
    pub fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    pub fn worker(&self, identity: WorkerIdentity) -> &WorkerConfig {
        match identity {
            WorkerIdentity::Engine => &self.workers.engine,
            WorkerIdentity::Inference => &self.workers.inference,
        }
    }

    pub fn bus_settings(&self) -> BusSettings {
        BusSettings {
            max_retries: self.supervision.max_retries,
            retry_delay: Duration::from_millis(self.supervision.retry_delay_ms),
            queue_capacity: self.bus.queue_capacity,
            overflow: self.bus.overflow,
            request_timeout: Duration::from_millis(self.bus.request_timeout_ms),
        }
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.startup.connect_timeout_ms)
    }

    pub fn key_sync_timeout(&self) -> Duration {
        Duration::from_millis(self.startup.key_sync_timeout_ms)
    }
}

#[track_caller]
fn parse_port(variable: &str, value: &str) -> Result<u16, ConfigError> {
    value
        .trim()
        .parse::<u16>()
        .map_err(|e| ConfigError::OverrideError {
            location: ErrorLocation::from(Location::caller()),
            variable: variable.to_string(),
            value: value.to_string(),
            reason: e.to_string(),
        })
}
