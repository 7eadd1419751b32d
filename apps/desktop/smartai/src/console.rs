//! Line-oriented operator console.
//!
//! Stands in for the window and tray UI: every pull operation is one
//! command, results are printed as pretty JSON.

use crate::commands::{control, data, export};
use crate::error::SmartaiError;

use bus_core::bus::BusHandle;

use common::ErrorLocation;

use std::panic::Location;
use std::path::Path;
use std::str::FromStr;

use log::{debug, warn};
use serde::Serialize;
use serde_json::Value;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};

pub const PROMPT: &str = "smartai> ";

pub const HELP: &str = "\
commands:
  data                    current dashboard snapshot
  status                  worker link and process status
  stats                   message bus statistics
  scan                    request a full scan
  vpn on|off              toggle the VPN
  activate-vpn [profile]  bring the VPN up on a profile
  firewall <json rule>    apply a firewall rule
  block <pid> [reason]    block a process
  emergency on|off        switch emergency mode on all workers
  export                  write the attack story to a JSON file
  help                    this text
  quit                    shut down";

#[derive(Debug, Clone, PartialEq)]
pub enum ConsoleCommand {
    Help,
    Data,
    Status,
    Stats,
    Scan,
    Vpn(bool),
    ActivateVpn { profile: Option<String> },
    Firewall { rule: Value },
    Block { pid: u32, reason: Option<String> },
    Emergency(bool),
    Export,
    Quit,
}

#[track_caller]
fn input_error(message: String) -> SmartaiError {
    SmartaiError::Input {
        message,
        location: ErrorLocation::from(Location::caller()),
    }
}

fn parse_switch(command: &str, value: Option<&str>) -> Result<bool, SmartaiError> {
    match value.map(str::to_ascii_lowercase).as_deref() {
        Some("on" | "true" | "1" | "enable") => Ok(true),
        Some("off" | "false" | "0" | "disable") => Ok(false),
        _ => Err(input_error(format!("usage: {command} on|off"))),
    }
}

impl FromStr for ConsoleCommand {
    type Err = SmartaiError;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let mut words = line.split_whitespace();
        let Some(command) = words.next() else {
            return Err(input_error("empty command".to_string()));
        };
        let command = command.to_ascii_lowercase();

        let parsed = match command.as_str() {
            "help" | "?" => ConsoleCommand::Help,
            "data" => ConsoleCommand::Data,
            "status" => ConsoleCommand::Status,
            "stats" => ConsoleCommand::Stats,
            "scan" => ConsoleCommand::Scan,
            "export" => ConsoleCommand::Export,
            "quit" | "exit" => ConsoleCommand::Quit,
            "vpn" => ConsoleCommand::Vpn(parse_switch("vpn", words.next())?),
            "activate-vpn" => ConsoleCommand::ActivateVpn {
                profile: words.next().map(str::to_string),
            },
            "firewall" => {
                let rule = line
                    .trim_start()
                    .split_once(char::is_whitespace)
                    .map(|(_, rest)| rest.trim())
                    .filter(|rest| !rest.is_empty())
                    .ok_or_else(|| input_error("usage: firewall <json rule>".to_string()))?;
                let rule = serde_json::from_str(rule)
                    .map_err(|e| input_error(format!("firewall rule is not valid JSON: {e}")))?;
                return Ok(ConsoleCommand::Firewall { rule });
            }
            "emergency" => ConsoleCommand::Emergency(parse_switch("emergency", words.next())?),
            "block" => {
                let pid = words
                    .next()
                    .and_then(|p| p.parse::<u32>().ok())
                    .ok_or_else(|| input_error("usage: block <pid> [reason]".to_string()))?;
                let reason: Vec<&str> = words.by_ref().collect();
                let reason = (!reason.is_empty()).then(|| reason.join(" "));
                return Ok(ConsoleCommand::Block { pid, reason });
            }
            other => return Err(input_error(format!("unknown command '{other}' (try 'help')"))),
        };

        if let Some(extra) = words.next() {
            return Err(input_error(format!("unexpected argument '{extra}' for {command}")));
        }
        Ok(parsed)
    }
}

/// Result of one console command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsoleOutcome {
    Output(String),
    Quit,
}

fn pretty<T: Serialize>(value: &T) -> Result<String, SmartaiError> {
    serde_json::to_string_pretty(value).map_err(|e| SmartaiError::Smartai {
        message: format!("Failed to render output: {e}"),
        location: ErrorLocation::from(Location::caller()),
    })
}

/// Run one command against the bus.
///
/// # Errors
///
/// Propagates the command's error; the console prints it and keeps going.
pub async fn execute(
    command: ConsoleCommand,
    bus: &BusHandle,
    export_dir: &Path,
) -> Result<ConsoleOutcome, SmartaiError> {
    debug!("Console command: {command:?}");

    let output = match command {
        ConsoleCommand::Help => HELP.to_string(),
        ConsoleCommand::Data => pretty(&data::get_app_data(bus).await)?,
        ConsoleCommand::Status => pretty(&data::component_status(bus).await?)?,
        ConsoleCommand::Stats => pretty(&data::statistics(bus).await?)?,
        ConsoleCommand::Scan => pretty(&control::request_full_scan(bus).await)?,
        ConsoleCommand::Vpn(enabled) => pretty(&control::toggle_vpn(bus, enabled).await)?,
        ConsoleCommand::ActivateVpn { profile } => {
            pretty(&control::activate_vpn(bus, profile).await)?
        }
        ConsoleCommand::Firewall { rule } => pretty(&control::modify_firewall(bus, rule).await)?,
        ConsoleCommand::Block { pid, reason } => {
            pretty(&control::block_process(bus, pid, reason).await)?
        }
        ConsoleCommand::Emergency(enable) => pretty(&control::emergency_mode(bus, enable).await)?,
        ConsoleCommand::Export => {
            let path = export::export_attack_story(bus, export_dir).await?;
            format!("attack story written to {}", path.display())
        }
        ConsoleCommand::Quit => return Ok(ConsoleOutcome::Quit),
    };

    Ok(ConsoleOutcome::Output(output))
}

async fn write_text<W>(output: &mut W, text: &str) -> Result<(), SmartaiError>
where
    W: AsyncWrite + Unpin,
{
    output
        .write_all(text.as_bytes())
        .await
        .and(output.flush().await)
        .map_err(|e| SmartaiError::Smartai {
            message: format!("Console write failed: {e}"),
            location: ErrorLocation::from(Location::caller()),
        })
}

/// Read commands from `input` until `quit` or end of input.
///
/// # Errors
///
/// Returns [`SmartaiError::Smartai`] if reading or writing the console fails.
pub async fn run<R, W>(
    bus: &BusHandle,
    export_dir: &Path,
    input: R,
    mut output: W,
) -> Result<(), SmartaiError>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut lines = input.lines();

    loop {
        write_text(&mut output, PROMPT).await?;

        let line = lines.next_line().await.map_err(|e| SmartaiError::Smartai {
            message: format!("Console read failed: {e}"),
            location: ErrorLocation::from(Location::caller()),
        })?;
        let Some(line) = line else {
            debug!("Console input closed");
            return Ok(());
        };
        if line.trim().is_empty() {
            continue;
        }

        let result = match line.parse::<ConsoleCommand>() {
            Ok(command) => execute(command, bus, export_dir).await,
            Err(e) => Err(e),
        };

        match result {
            Ok(ConsoleOutcome::Quit) => return Ok(()),
            Ok(ConsoleOutcome::Output(text)) => write_text(&mut output, &format!("{text}\n")).await?,
            Err(e) => {
                warn!("Console command failed: {e}");
                let message = match &e {
                    SmartaiError::Input { message, .. } => message.clone(),
                    other => other.to_string(),
                };
                write_text(&mut output, &format!("error: {message}\n")).await?;
            }
        }
    }
}
