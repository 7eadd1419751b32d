use crate::error::transport::TransportError;

use common::ErrorLocation;

use std::panic::Location;
use std::thread::sleep;
use std::time::Duration;

use backoff::{ExponentialBackoff, backoff::Backoff};
use log::{debug, trace};
use netstat2::{
    AddressFamilyFlags, ProtocolFlags, ProtocolSocketInfo, SocketInfo, TcpState, get_sockets_info,
};
use sysinfo::{Pid, Process, ProcessStatus, ProcessesToUpdate, Signal, System};

const KILL_VERIFY_MAX_ELAPSED: Duration = Duration::from_secs(5);

#[track_caller]
fn query_tcp_sockets() -> Result<Vec<SocketInfo>, TransportError> {
    get_sockets_info(
        AddressFamilyFlags::IPV4 | AddressFamilyFlags::IPV6,
        ProtocolFlags::TCP,
    )
    .map_err(|e| TransportError::NetworkQuery {
        message: format!("Failed to query network sockets: {e}"),
        location: ErrorLocation::from(Location::caller()),
    })
}

#[track_caller]
pub(crate) fn with_process<F, R>(pid: u32, f: F) -> Option<R>
where
    F: FnOnce(&Process) -> R,
{
    let mut sys = System::new();
    sys.refresh_processes(ProcessesToUpdate::Some(&[Pid::from_u32(pid)]), true);

    sys.process(Pid::from_u32(pid)).map(f)
}

/// Describe whoever is listening on `port`, e.g. `"python3 (PID 4242)"`.
///
/// # Returns
///
/// * `Ok(Some(_))` - a listener was found
/// * `Ok(None)` - nothing is listening, or the process vanished
/// * `Err(_)` - the socket table could not be read
#[track_caller]
pub fn find_port_owner(port: u16) -> Result<Option<String>, TransportError> {
    let sockets = query_tcp_sockets()?;

    for s in sockets {
        if let ProtocolSocketInfo::Tcp(tcp) = s.protocol_socket_info
            && tcp.state == TcpState::Listen
            && tcp.local_port == port
            && let Some(&pid) = s.associated_pids.first()
        {
            trace!("Found process {pid} listening on port {port}");

            let name = with_process(pid, |p| p.name().to_string_lossy().to_string());
            return Ok(Some(match name {
                Some(name) => format!("{name} (PID {pid})"),
                None => format!("PID {pid}"),
            }));
        }
    }

    debug!("No process found listening on port {port}");
    Ok(None)
}

/// Stop a process by PID.
///
/// Sends SIGTERM first and falls back to SIGKILL where the platform has no
/// TERM. Termination is verified with exponential backoff for up to 5 seconds.
///
/// # Returns
///
/// * `true` - the process is gone
/// * `false` - it does not exist or is still running after the wait
pub fn stop_pid(pid: u32) -> bool {
    let signalled = with_process(pid, |p| {
        if let Some(sent) = p.kill_with(Signal::Term) {
            debug!("Sent SIGTERM to PID {pid}: success={sent}");
            sent
        } else {
            let killed = p.kill();
            debug!("Sent SIGKILL to PID {pid}: success={killed}");
            killed
        }
    })
    .unwrap_or_else(|| {
        debug!("Process {pid} not found");
        false
    });

    if !signalled {
        return false;
    }

    let mut backoff = ExponentialBackoff {
        max_elapsed_time: Some(KILL_VERIFY_MAX_ELAPSED),
        ..Default::default()
    };

    loop {
        if !is_running(pid) {
            debug!("Process {pid} terminated");
            return true;
        }

        match backoff.next_backoff() {
            Some(duration) => {
                trace!("Process {pid} still alive, retrying after {duration:?}");
                sleep(duration);
            }
            None => {
                debug!("Process {pid} still running after {KILL_VERIFY_MAX_ELAPSED:?}");
                return false;
            }
        }
    }
}

/// Whether `pid` exists and has not exited.
///
/// Zombies count as gone: the monitor task reaps them.
pub fn is_running(pid: u32) -> bool {
    with_process(pid, |p| {
        !matches!(p.status(), ProcessStatus::Zombie | ProcessStatus::Dead)
    })
    .unwrap_or(false)
}
