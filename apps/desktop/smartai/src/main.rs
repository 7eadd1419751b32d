use smartai::console;
use smartai::env::load_dotenv;
use smartai::error::SmartaiError;
use smartai::logger::initialize as LoggerInitialize;

use bus_core::config::BusConfig;
use bus_core::config::storage::StoragePaths;
use bus_core::orchestrator::Orchestrator;
use bus_core::ui::UiEvent;

use common::ErrorLocation;

use std::fs::create_dir_all;
use std::panic::Location;
use std::process::ExitCode;

use log::{debug, error, info, warn};
use tokio::io::{BufReader, stdin, stdout};
use tokio::sync::broadcast::error::RecvError;

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            // The logger may not be up yet.
            eprintln!("{e}");
            error!("{e}");
            ExitCode::FAILURE
        }
    }
}

async fn run() -> Result<(), SmartaiError> {
    let env_result = load_dotenv();

    let paths = StoragePaths::resolve().map_err(|e| SmartaiError::Startup {
        message: e.to_string(),
        location: ErrorLocation::from(Location::caller()),
    })?;

    create_dir_all(&paths.logs).map_err(|e| SmartaiError::Smartai {
        message: format!("Failed to create log directory: {e}"),
        location: ErrorLocation::from(Location::caller()),
    })?;

    // Initialize logger FIRST
    let log_file = LoggerInitialize(&paths.logs)?;

    info!("SmartAI starting");
    info!("Log file: {}", log_file.display());
    match (&env_result.path, &env_result.error) {
        (Some(path), _) => info!("Loaded environment from {}", path.display()),
        (None, Some(e)) => warn!("Failed to load .env: {e}"),
        (None, None) => debug!("No .env file found"),
    }

    let mut config = BusConfig::load(&paths.config).map_err(|e| SmartaiError::Core {
        message: e.to_string(),
        location: ErrorLocation::from(Location::caller()),
    })?;
    config.apply_env_overrides().map_err(|e| SmartaiError::Core {
        message: e.to_string(),
        location: ErrorLocation::from(Location::caller()),
    })?;

    let export_dir = paths.root.clone();
    let orchestrator = Orchestrator::new(config, paths);
    tokio::spawn(log_ui_events(orchestrator.ui_events()));

    let running = orchestrator.start().await.map_err(|e| SmartaiError::Startup {
        message: e.to_string(),
        location: ErrorLocation::from(Location::caller()),
    })?;

    info!("SmartAI ready; type 'help' for commands");

    let console_result = tokio::select! {
        result = console::run(running.bus(), &export_dir, BufReader::new(stdin()), stdout()) => result,
        _ = tokio::signal::ctrl_c() => {
            info!("Interrupted");
            Ok(())
        }
    };

    running.shutdown().await;
    info!("SmartAI stopped");
    console_result
}

/// Mirror UI pushes into the log until the bus goes away.
async fn log_ui_events(mut events: tokio::sync::broadcast::Receiver<UiEvent>) {
    loop {
        match events.recv().await {
            Ok(UiEvent::WorkerLog { .. }) => {}
            Ok(UiEvent::Fatal {
                worker,
                category,
                message,
            }) => error!("[fatal-error] {category} ({worker:?}): {message}"),
            Ok(event @ UiEvent::ComponentCrashed { .. }) => warn!("[{}] {event:?}", event.channel()),
            Ok(event) => debug!("[{}] {event:?}", event.channel()),
            Err(RecvError::Lagged(skipped)) => warn!("UI event log skipped {skipped} events"),
            Err(RecvError::Closed) => break,
        }
    }
}
