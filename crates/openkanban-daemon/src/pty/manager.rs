//! PTY allocation and the child process it drives (§4.2).

use std::io::Write;
use std::path::Path;
use std::sync::{Arc, Mutex};

use portable_pty::{Child, CommandBuilder, MasterPty, PtySize, native_pty_system};
use tracing::{debug, info};

use crate::errors::DaemonError;

/// Everything needed to open a PTY and spawn a command into its slave end.
pub struct PtySpawnSpec<'a> {
    pub command: &'a str,
    pub args: &'a [String],
    pub workdir: &'a Path,
    pub env: &'a [(String, String)],
    pub rows: u16,
    pub cols: u16,
}

/// A live PTY plus the child process attached to its slave end.
///
/// Mirrors `portable-pty`'s one-shot `take_writer()` constraint by stashing
/// the writer behind an `Arc<Mutex<_>>` once at construction (§4.2: "Writes
/// are serialized").
pub struct ManagedPty {
    master: Box<dyn MasterPty + Send>,
    child: Box<dyn Child + Send + Sync>,
    writer: Arc<Mutex<Box<dyn Write + Send>>>,
    size: PtySize,
}

impl ManagedPty {
    pub fn spawn(spec: &PtySpawnSpec<'_>) -> Result<Self, DaemonError> {
        let pty_system = native_pty_system();
        let size = PtySize {
            rows: spec.rows,
            cols: spec.cols,
            pixel_width: 0,
            pixel_height: 0,
        };

        let pair = pty_system
            .openpty(size)
            .map_err(|e| DaemonError::SpawnFailed(format!("openpty: {e}")))?;

        let mut cmd = CommandBuilder::new(spec.command);
        cmd.args(spec.args);
        cmd.cwd(spec.workdir);
        cmd.env_clear();
        for (key, value) in spec.env {
            cmd.env(key, value);
        }

        info!(
            event = "daemon.pty.spawn_started",
            command = spec.command,
            rows = spec.rows,
            cols = spec.cols,
        );

        let child = pair
            .slave
            .spawn_command(cmd)
            .map_err(|e| DaemonError::SpawnFailed(format!("spawn: {e}")))?;

        // Drop our copy of the slave fd; the child owns the only other one.
        drop(pair.slave);

        let writer = pair
            .master
            .take_writer()
            .map_err(|e| DaemonError::SpawnFailed(format!("take writer: {e}")))?;

        let pid = child.process_id();
        info!(event = "daemon.pty.spawn_completed", pid = ?pid);

        Ok(Self {
            master: pair.master,
            child,
            writer: Arc::new(Mutex::new(writer)),
            size,
        })
    }

    pub fn size(&self) -> PtySize {
        self.size
    }

    pub fn try_clone_reader(&self) -> Result<Box<dyn std::io::Read + Send>, DaemonError> {
        self.master
            .try_clone_reader()
            .map_err(|e| DaemonError::PtyError(format!("clone reader: {e}")))
    }

    /// Write `data` to the child's stdin. Retries until the whole buffer is
    /// drained, matching §4.2's "partial writes are retried internally".
    pub fn write_stdin(&self, data: &[u8]) -> Result<usize, DaemonError> {
        let mut writer = self
            .writer
            .lock()
            .map_err(|_| DaemonError::PtyError("writer lock poisoned".to_string()))?;
        writer
            .write_all(data)
            .map_err(|e| DaemonError::PtyError(format!("write stdin: {e}")))?;
        writer
            .flush()
            .map_err(|e| DaemonError::PtyError(format!("flush stdin: {e}")))?;
        Ok(data.len())
    }

    /// Resize the PTY. `portable-pty`'s `resize()` issues `TIOCSWINSZ` on
    /// the master, which the kernel turns into `SIGWINCH` for the
    /// foreground process group — this is Open Question (b) from §9,
    /// satisfied without a separate signal call.
    pub fn resize(&mut self, rows: u16, cols: u16) -> Result<(), DaemonError> {
        let new_size = PtySize {
            rows,
            cols,
            pixel_width: 0,
            pixel_height: 0,
        };
        self.master
            .resize(new_size)
            .map_err(|e| DaemonError::PtyError(format!("resize: {e}")))?;
        self.size = new_size;
        debug!(event = "daemon.pty.resize_completed", rows = rows, cols = cols);
        Ok(())
    }

    pub fn child_process_id(&self) -> Option<u32> {
        self.child.process_id()
    }

    /// Block until the child exits. Called from a `spawn_blocking` context.
    pub fn wait(&mut self) -> Result<portable_pty::ExitStatus, DaemonError> {
        self.child
            .wait()
            .map_err(|e| DaemonError::PtyError(format!("wait: {e}")))
    }

    /// Unconditional kill (SIGKILL on unix). Used as the escalation target
    /// of `stop_graceful`'s timeout.
    pub fn kill(&mut self) -> Result<(), DaemonError> {
        self.child
            .kill()
            .map_err(|e| DaemonError::PtyError(format!("kill: {e}")))
    }
}

/// Send SIGINT to `pid` (the graceful first step of `stop_graceful`,
/// before the SIGKILL escalation `ManagedPty::kill` performs).
#[cfg(unix)]
pub fn send_sigint(pid: u32) -> Result<(), DaemonError> {
    use nix::sys::signal::{self, Signal};
    use nix::unistd::Pid;

    match signal::kill(Pid::from_raw(pid as i32), Signal::SIGINT) {
        Ok(()) => Ok(()),
        // Already gone — not an error for our purposes.
        Err(nix::errno::Errno::ESRCH) => Ok(()),
        Err(e) => Err(DaemonError::PtyError(format!("sigint: {e}"))),
    }
}

#[cfg(not(unix))]
pub fn send_sigint(_pid: u32) -> Result<(), DaemonError> {
    Ok(())
}
