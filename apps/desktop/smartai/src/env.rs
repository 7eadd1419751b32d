//! `.env` discovery.

use std::env::current_exe;
use std::path::PathBuf;

/// Where a `.env` file was loaded from, if anywhere.
///
/// Loading happens before the logger exists, so the outcome is returned for
/// the caller to log.
#[derive(Debug, Default)]
pub struct EnvLoadResult {
    pub path: Option<PathBuf>,
    pub error: Option<String>,
}

/// Load `.env` from the working directory, else from next to the executable.
pub fn load_dotenv() -> EnvLoadResult {
    if let Ok(path) = dotenvy::dotenv() {
        return EnvLoadResult {
            path: Some(path),
            error: None,
        };
    }

    let Some(env_path) = current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(|dir| dir.join(".env")))
        .filter(|p| p.exists())
    else {
        return EnvLoadResult::default();
    };

    match dotenvy::from_path(&env_path) {
        Ok(()) => EnvLoadResult {
            path: Some(env_path),
            error: None,
        },
        Err(e) => EnvLoadResult {
            path: None,
            error: Some(format!("Failed to parse .env at {}: {e}", env_path.display())),
        },
    }
}
