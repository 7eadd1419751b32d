//! Logging for the SmartAI controller.
//!
//! Colored stdout plus a plain `smartai.log` in the storage `logs`
//! directory. Worker output reaches both through bus-core's `info!`/`warn!`
//! lines, prefixed with the worker name.

use crate::error::SmartaiError;

use common::ErrorLocation;

use std::fmt::{Arguments, Display};
use std::io::stdout;
use std::panic::Location;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Once;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::SystemTime;

use fern::colors::Color::{Blue, Green, Magenta, Red, Yellow};
use fern::colors::ColoredLevelConfig;
use fern::{Dispatch, FormatCallback};
use humantime::format_rfc3339;
use log::{LevelFilter, Record, info, warn};

static INIT_LOGGER_ONCE: Once = Once::new();

static LOGGER_ALREADY_CALLED: AtomicBool = AtomicBool::new(false);

pub const LOG_FILE_NAME: &str = "smartai.log";

/// Overrides the build-dependent default level (`trace`, `debug`, `info`, ...).
pub const ENV_LOG_LEVEL: &str = "SMARTAI_LOG_LEVEL";

const LOGGER_ALREADY_INITIALIZED_MESSAGE: &str = "Logger already initialized";

#[cfg(debug_assertions)]
const DEFAULT_LOG_LEVEL: LevelFilter = LevelFilter::Debug;

#[cfg(not(debug_assertions))]
const DEFAULT_LOG_LEVEL: LevelFilter = LevelFilter::Info;

/// Frame-level chatter from the WebSocket stack is never useful above this.
const TRANSPORT_LOG_LEVEL: LevelFilter = LevelFilter::Info;

/// Resolve the level from an optional override value.
///
/// Unparsable values fall back to the default.
pub fn resolve_level(value: Option<&str>) -> LevelFilter {
    value
        .and_then(|v| LevelFilter::from_str(v.trim()).ok())
        .unwrap_or(DEFAULT_LOG_LEVEL)
}

/// Initialize the logger with dual output (stdout + `log_dir/smartai.log`).
///
/// Safe to call more than once: later calls log a warning and return Ok.
///
/// # Errors
///
/// Returns [`SmartaiError::Smartai`] if the log file cannot be created or
/// the global logger cannot be installed.
pub fn initialize(log_dir: &Path) -> Result<PathBuf, SmartaiError> {
    let log_file_path = log_dir.join(LOG_FILE_NAME);

    if LOGGER_ALREADY_CALLED.swap(true, Ordering::SeqCst) {
        warn!("{LOGGER_ALREADY_INITIALIZED_MESSAGE}");
        return Ok(log_file_path);
    }

    let level = resolve_level(std::env::var(ENV_LOG_LEVEL).ok().as_deref());
    let mut result = Ok(());

    INIT_LOGGER_ONCE.call_once(|| {
        result = initialize_internal(&log_file_path, level);
        if result.is_ok() {
            info!("Logger initialized with level: {level:?}");
        }
    });

    result.map(|()| log_file_path)
}

fn write_line(out: FormatCallback<'_>, message: &Arguments<'_>, record: &Record<'_>, level: &dyn Display) {
    out.finish(format_args!(
        "[{date} - {level}] {message} [{file}:{line}]",
        date = format_rfc3339(SystemTime::now()),
        file = record.file().unwrap_or("unknown"),
        line = record.line().unwrap_or(0),
    ))
}

#[track_caller]
fn initialize_internal(log_file_path: &Path, level: LevelFilter) -> Result<(), SmartaiError> {
    let colors = ColoredLevelConfig::new()
        .debug(Blue)
        .info(Green)
        .warn(Yellow)
        .error(Red)
        .trace(Magenta);

    let stdout_dispatch = Dispatch::new()
        .format(move |out, message, record| {
            write_line(out, message, record, &colors.color(record.level()))
        })
        .chain(stdout());

    let log_file = fern::log_file(log_file_path).map_err(|e| SmartaiError::Smartai {
        message: format!("Failed to create log file {}: {e}", log_file_path.display()),
        location: ErrorLocation::from(Location::caller()),
    })?;

    let file_dispatch = Dispatch::new()
        .format(|out, message, record| write_line(out, message, record, &record.level()))
        .chain(log_file);

    Dispatch::new()
        .level(level)
        .level_for("tungstenite", TRANSPORT_LOG_LEVEL.min(level))
        .level_for("tokio_tungstenite", TRANSPORT_LOG_LEVEL.min(level))
        .chain(stdout_dispatch)
        .chain(file_dispatch)
        .apply()
        .map_err(|e| SmartaiError::Smartai {
            message: format!("Failed to initialize logger: {e}"),
            location: ErrorLocation::from(Location::caller()),
        })
}
