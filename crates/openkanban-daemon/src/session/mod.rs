pub mod registry;

use std::path::PathBuf;
use std::sync::{Arc, Mutex, Weak};
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::env_scrub::scrub_env;
use crate::errors::DaemonError;
use crate::pty::manager::{ManagedPty, PtySpawnSpec, send_sigint};
use openkanban_protocol::SessionStatus;

const DEFAULT_ROWS: u16 = 24;
const DEFAULT_COLS: u16 = 80;
const READ_CHUNK: usize = 64 * 1024;

/// What the creator asked for (§4.3 `create_or_attach(id, spec)`).
#[derive(Debug, Clone)]
pub struct SessionSpec {
    pub command: String,
    pub args: Vec<String>,
    pub workdir: PathBuf,
    /// Extra environment variables the caller wants set (beyond the
    /// daemon's own scrubbed inheritance) — e.g. agent-specific config
    /// that isn't itself a credential.
    pub extra_env: Vec<(String, String)>,
    pub rows: Option<u16>,
    pub cols: Option<u16>,
}

/// One chunk of the child's output, or its terminal event, delivered on the
/// session's single-consumer output channel (the broker's fan-out task).
#[derive(Debug, Clone)]
pub enum SessionEvent {
    Data(Vec<u8>),
    /// Delivered exactly once, after which the channel is closed.
    Exit(Option<i32>),
}

struct SessionInner {
    pty: Option<ManagedPty>,
    rows: u16,
    cols: u16,
    exit_status: Option<Option<i32>>,
}

/// One child process plus its controlling pseudo-terminal (§4.2).
///
/// `running`/`exit_status` live behind a short-lived `std::sync::Mutex`;
/// no `.await` ever happens while it is held, matching the daemon-wide
/// "no blocking I/O under a lock" rule applied to a session's own state.
pub struct Session {
    pub id: String,
    pub command: String,
    pub args: Vec<String>,
    pub workdir: PathBuf,
    running: AtomicBool,
    inner: Mutex<SessionInner>,
    reader_task: Mutex<Option<JoinHandle<()>>>,
}

impl Session {
    /// Open a PTY, spawn `spec.command`, and start the background reader.
    /// On any failure before the child is running, returns `SpawnFailed`
    /// and the session is never constructed (caller must not insert it).
    pub fn start(
        id: String,
        spec: SessionSpec,
        output_tx: mpsc::Sender<SessionEvent>,
    ) -> Result<Arc<Self>, DaemonError> {
        if id.is_empty() {
            return Err(DaemonError::EmptySessionId);
        }

        let rows = spec.rows.unwrap_or(DEFAULT_ROWS);
        let cols = spec.cols.unwrap_or(DEFAULT_COLS);

        let inherited: Vec<(String, String)> = std::env::vars().collect();
        let mut env = scrub_env(&inherited, Some(&id));
        env.extend(spec.extra_env.iter().cloned());

        let pty_spec = PtySpawnSpec {
            command: &spec.command,
            args: &spec.args,
            workdir: &spec.workdir,
            env: &env,
            rows,
            cols,
        };

        let mut pty = ManagedPty::spawn(&pty_spec)?;
        let reader = pty.try_clone_reader().inspect_err(|_| {
            let _ = pty.kill();
        })?;

        let session = Arc::new(Self {
            id: id.clone(),
            command: spec.command,
            args: spec.args,
            workdir: spec.workdir,
            running: AtomicBool::new(true),
            inner: Mutex::new(SessionInner {
                pty: Some(pty),
                rows,
                cols,
                exit_status: None,
            }),
            reader_task: Mutex::new(None),
        });

        let handle = spawn_read_loop(Arc::downgrade(&session), id, reader, output_tx);
        *session.reader_task.lock().unwrap() = Some(handle);

        Ok(session)
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn status(&self) -> SessionStatus {
        if self.is_running() {
            SessionStatus::Running
        } else {
            SessionStatus::Exited
        }
    }

    pub fn rows_cols(&self) -> (u16, u16) {
        let inner = self.inner.lock().unwrap();
        (inner.rows, inner.cols)
    }

    pub fn exit_status(&self) -> Option<Option<i32>> {
        self.inner.lock().unwrap().exit_status
    }

    pub fn pty_pid(&self) -> Option<u32> {
        self.inner
            .lock()
            .unwrap()
            .pty
            .as_ref()
            .and_then(|p| p.child_process_id())
    }

    /// Write `data` to the child. Returns `NOT_RUNNING` if already exited.
    pub fn write(&self, data: &[u8]) -> Result<usize, DaemonError> {
        let inner = self.inner.lock().unwrap();
        match &inner.pty {
            Some(pty) if self.is_running() => pty.write_stdin(data),
            _ => Err(DaemonError::SessionNotRunning(self.id.clone())),
        }
    }

    /// Silently ignored if not running (§4.2).
    pub fn resize(&self, rows: u16, cols: u16) {
        if !self.is_running() {
            return;
        }
        let mut inner = self.inner.lock().unwrap();
        if let Some(pty) = inner.pty.as_mut() {
            match pty.resize(rows, cols) {
                Ok(()) => {
                    inner.rows = rows;
                    inner.cols = cols;
                }
                Err(e) => warn!(event = "daemon.session.resize_failed", session_id = %self.id, error = %e),
            }
        }
    }

    /// SIGINT, then SIGKILL after `timeout` if the child hasn't exited.
    /// Idempotent: a second call on an already-stopped session is a no-op.
    pub async fn stop_graceful(&self, timeout: std::time::Duration) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }

        let pid = self.pty_pid();
        if let Some(pid) = pid {
            if let Err(e) = send_sigint(pid) {
                warn!(event = "daemon.session.sigint_failed", session_id = %self.id, error = %e);
            }
        }

        let reader_task = self.reader_task.lock().unwrap().take();
        if let Some(handle) = reader_task {
            let waited = tokio::time::timeout(timeout, handle).await;
            if waited.is_err() {
                warn!(
                    event = "daemon.session.graceful_timeout_escalating",
                    session_id = %self.id,
                );
                let pty = self.inner.lock().unwrap().pty.take();
                if let Some(mut pty) = pty {
                    let _ = pty.kill();
                    // The orphaned reader task is still blocked on its own
                    // read(); only this SIGKILL escalation path reaps the
                    // child here, so `wait()` is called directly rather than
                    // left for `collect_exit_status` to find a PTY that's
                    // already gone.
                    let session_id = self.id.clone();
                    let code = tokio::task::spawn_blocking(move || match pty.wait() {
                        Ok(status) => Some(status.exit_code() as i32),
                        Err(e) => {
                            warn!(event = "daemon.session.wait_failed", session_id = %session_id, error = %e);
                            None
                        }
                    })
                    .await
                    .unwrap_or(None);
                    let mut inner = self.inner.lock().unwrap();
                    if inner.exit_status.is_none() {
                        inner.exit_status = Some(code);
                    }
                }
            }
        }

        let mut inner = self.inner.lock().unwrap();
        inner.pty = None;
    }

    /// Synonym for `stop_graceful(Duration::ZERO)` (§4.2).
    pub async fn close(&self) {
        self.stop_graceful(std::time::Duration::ZERO).await;
    }

    /// Called by the read loop once it observes EOF/error. Blocks (briefly)
    /// on the child's own `wait()` to collect its exit status — unlike a
    /// read-EOF-only approach, this never leaves a zombie behind and always
    /// has a real exit code to report (§4.2).
    ///
    /// Idempotent against `stop_graceful`'s SIGKILL-escalation path, which
    /// may already have taken `inner.pty` and called `wait()` itself: if
    /// `exit_status` is already set, that recorded value is returned as-is
    /// rather than attempting a second `wait()` on a PTY that's gone.
    fn collect_exit_status(&self) -> Option<i32> {
        let mut inner = self.inner.lock().unwrap();
        if let Some(existing) = inner.exit_status {
            return existing;
        }
        let code = inner.pty.take().and_then(|mut pty| match pty.wait() {
            Ok(status) => Some(status.exit_code() as i32),
            Err(e) => {
                warn!(event = "daemon.session.wait_failed", session_id = %self.id, error = %e);
                None
            }
        });
        self.running.store(false, Ordering::SeqCst);
        inner.exit_status = Some(code);
        code
    }
}

fn spawn_read_loop(
    session: Weak<Session>,
    session_id: String,
    mut reader: Box<dyn std::io::Read + Send>,
    output_tx: mpsc::Sender<SessionEvent>,
) -> JoinHandle<()> {
    tokio::task::spawn_blocking(move || {
        let mut buf = vec![0u8; READ_CHUNK];
        loop {
            match reader.read(&mut buf) {
                Ok(0) => {
                    debug!(event = "daemon.session.reader_eof", session_id = %session_id);
                    break;
                }
                Ok(n) => {
                    if output_tx
                        .blocking_send(SessionEvent::Data(buf[..n].to_vec()))
                        .is_err()
                    {
                        // Fan-out task gone (session already being torn down).
                        break;
                    }
                }
                Err(e) => {
                    error!(
                        event = "daemon.session.reader_error",
                        session_id = %session_id,
                        error = %e,
                    );
                    break;
                }
            }
        }

        let exit_code = session.upgrade().and_then(|s| s.collect_exit_status());
        let _ = output_tx.blocking_send(SessionEvent::Exit(exit_code));
        info!(
            event = "daemon.session.reader_task_completed",
            session_id = %session_id,
            exit_code = ?exit_code,
        );
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(command: &str, args: &[&str]) -> SessionSpec {
        SessionSpec {
            command: command.to_string(),
            args: args.iter().map(|s| s.to_string()).collect(),
            workdir: PathBuf::from("/tmp"),
            extra_env: Vec::new(),
            rows: None,
            cols: None,
        }
    }

    #[tokio::test]
    async fn test_start_running_and_write() {
        let (tx, mut rx) = mpsc::channel(16);
        let session = Session::start("s1".to_string(), spec("/bin/cat", &[]), tx).unwrap();
        assert!(session.is_running());
        assert_eq!(session.status(), SessionStatus::Running);

        session.write(b"hello\n").unwrap();

        let mut got = Vec::new();
        while got.len() < 6 {
            match rx.recv().await {
                Some(SessionEvent::Data(chunk)) => got.extend(chunk),
                Some(SessionEvent::Exit(_)) => break,
                None => break,
            }
        }
        assert_eq!(&got, b"hello\n");

        session.close().await;
        assert!(!session.is_running());
    }

    #[tokio::test]
    async fn test_empty_session_id_rejected() {
        let (tx, _rx) = mpsc::channel(16);
        let err = Session::start(String::new(), spec("/bin/cat", &[]), tx).unwrap_err();
        assert!(matches!(err, DaemonError::EmptySessionId));
    }

    #[tokio::test]
    async fn test_spawn_failed_missing_binary() {
        let (tx, _rx) = mpsc::channel(16);
        let err = Session::start(
            "s2".to_string(),
            spec("/nonexistent/binary/xyz", &[]),
            tx,
        )
        .unwrap_err();
        assert!(matches!(err, DaemonError::SpawnFailed(_)));
    }

    #[tokio::test]
    async fn test_write_after_close_is_not_running() {
        let (tx, _rx) = mpsc::channel(16);
        let session = Session::start("s3".to_string(), spec("/bin/cat", &[]), tx).unwrap();
        session.close().await;
        let err = session.write(b"x").unwrap_err();
        assert!(matches!(err, DaemonError::SessionNotRunning(_)));
    }

    #[tokio::test]
    async fn test_resize_ignored_when_not_running() {
        let (tx, _rx) = mpsc::channel(16);
        let session = Session::start("s4".to_string(), spec("/bin/cat", &[]), tx).unwrap();
        session.close().await;
        // Must not panic even though the PTY handle has been dropped.
        session.resize(50, 100);
    }

    #[tokio::test]
    async fn test_exit_status_collected_on_eof() {
        let (tx, mut rx) = mpsc::channel(16);
        let session =
            Session::start("s5".to_string(), spec("/bin/sh", &["-c", "exit 7"]), tx).unwrap();
        let mut saw_exit = 0;
        loop {
            match rx.recv().await {
                Some(SessionEvent::Data(_)) => continue,
                Some(SessionEvent::Exit(_)) => {
                    saw_exit += 1;
                    break;
                }
                None => break,
            }
        }
        assert_eq!(saw_exit, 1);
        assert!(!session.is_running());
        assert!(session.exit_status().is_some());
    }
}
