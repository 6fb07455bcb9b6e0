//! PID file lifecycle and liveness probing for single-instance enforcement
//! (§4.5, §6).

use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::errors::DaemonError;

pub fn write_pid_file(path: &Path) -> Result<(), DaemonError> {
    let pid = std::process::id();
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, format!("{pid}\n"))?;
    debug!(event = "daemon.pid.write_completed", pid = pid, path = %path.display());
    Ok(())
}

/// Read the PID from `path`. Returns `None` if the file is absent, unreadable,
/// or does not contain a valid `u32`.
pub fn read_pid_file(path: &Path) -> Option<u32> {
    let content = match fs::read_to_string(path) {
        Ok(s) => s,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return None,
        Err(e) => {
            warn!(event = "daemon.pid.read_failed", path = %path.display(), error = %e);
            return None;
        }
    };
    match content.trim().parse::<u32>() {
        Ok(pid) => Some(pid),
        Err(_) => {
            warn!(
                event = "daemon.pid.parse_failed",
                path = %path.display(),
                content = %content.trim(),
            );
            None
        }
    }
}

pub fn remove_pid_file(path: &Path) -> Result<(), DaemonError> {
    match fs::remove_file(path) {
        Ok(()) => {
            debug!(event = "daemon.pid.remove_completed", path = %path.display());
            Ok(())
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(DaemonError::Io(e)),
    }
}

/// Zero-signal liveness check: does a process with this PID exist?
pub fn is_process_alive(pid: u32) -> bool {
    use nix::sys::signal;
    use nix::unistd::Pid;

    match signal::kill(Pid::from_raw(pid as i32), None) {
        Ok(()) => true,
        Err(nix::errno::Errno::ESRCH) => false,
        // EPERM means the process exists but we lack permission to signal it.
        Err(nix::errno::Errno::EPERM) => true,
        Err(_) => false,
    }
}

/// Probe the PID file: `Some(pid)` if a live daemon owns it, `None` if
/// absent or stale (a stale file is unlinked as a side effect).
pub fn check_daemon_running(pid_path: &Path) -> Option<u32> {
    let pid = read_pid_file(pid_path)?;
    if is_process_alive(pid) {
        return Some(pid);
    }
    warn!(event = "daemon.pid.stale_detected", pid = pid, path = %pid_path.display());
    if let Err(e) = remove_pid_file(pid_path) {
        warn!(
            event = "daemon.pid.stale_remove_failed",
            pid = pid,
            path = %pid_path.display(),
            error = %e,
        );
    }
    None
}

/// Probe the rendezvous socket itself: connect to it. A successful connect
/// means a live daemon is listening; a failed connect means the path is
/// stale (crashed daemon left the socket file behind) and may be removed.
///
/// This is the second half of §4.5's "attempts a connect" startup sequence
/// — used in addition to the PID file probe because a socket file can
/// outlive its daemon independently of the PID file's own staleness.
pub fn probe_stale_socket(socket_path: &Path) -> bool {
    if !socket_path.exists() {
        return false;
    }
    match std::os::unix::net::UnixStream::connect(socket_path) {
        Ok(_) => false,
        Err(_) => {
            warn!(
                event = "daemon.socket.stale_detected",
                path = %socket_path.display(),
            );
            true
        }
    }
}

pub fn default_pid_path_fallback() -> PathBuf {
    openkanban_paths::OpenKanbanPaths::resolve()
        .unwrap_or_else(|_| openkanban_paths::OpenKanbanPaths::from_dir(PathBuf::from("/tmp/.openkanban")))
        .daemon_pid_file()
}
