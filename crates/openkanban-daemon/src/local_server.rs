//! The Unix-socket accept loop: single-instance enforcement, per-connection
//! frame reader/writer tasks, and the graceful shutdown sequence (§4.5, §6).

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::UnixListener;
use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::agent_status::run_agent_status_poller;
use crate::board::BoardStore;
use crate::broker::Broker;
use crate::config::DaemonConfig;
use crate::connection::ClientConnection;
use crate::errors::DaemonError;
use crate::{pid, shutdown};
use openkanban_paths::OpenKanbanPaths;
use openkanban_protocol::{read_frame, write_frame};

/// Entry point for `daemon run`. Performs single-instance enforcement, binds
/// the rendezvous socket, and runs the accept loop until a shutdown signal
/// arrives, then tears everything down.
pub async fn run_server(config: DaemonConfig) -> Result<(), DaemonError> {
    if let Some(existing_pid) = pid::check_daemon_running(&config.pid_path) {
        return Err(DaemonError::AlreadyRunning(existing_pid));
    }

    if config.socket_path.exists() {
        if pid::probe_stale_socket(&config.socket_path) {
            std::fs::remove_file(&config.socket_path)?;
        } else {
            return Err(DaemonError::SocketInUse(
                config.socket_path.display().to_string(),
            ));
        }
    }

    if let Some(parent) = config.socket_path.parent() {
        std::fs::create_dir_all(parent)?;
        set_user_only_permissions(parent);
    }

    pid::write_pid_file(&config.pid_path)?;
    let listener = UnixListener::bind(&config.socket_path)?;
    set_user_only_permissions(&config.socket_path);

    info!(
        event = "daemon.local_server.started",
        pid = std::process::id(),
        socket = %config.socket_path.display(),
    );

    let board = Arc::new(BoardStore::load(config.board_path.clone()));
    let broker = Broker::new(board.clone(), config.subscriber_queue_depth);
    let cancel = CancellationToken::new();

    let flush_cancel = cancel.clone();
    let flush_board = board.clone();
    let debounce = Duration::from_millis(config.board_flush_debounce_ms);
    tokio::spawn(async move { flush_board.run_flush_task(debounce, flush_cancel).await });

    let signal_cancel = cancel.clone();
    tokio::spawn(async move { shutdown::wait_for_shutdown_signal(signal_cancel).await });

    let status_cancel = cancel.clone();
    let status_board = board.clone();
    let status_paths = resolved_paths();
    tokio::spawn(async move { run_agent_status_poller(status_board, status_paths, status_cancel).await });

    if let Some(http_bind) = config.http_bind {
        let http_broker = broker.clone();
        let http_cancel = cancel.clone();
        tokio::spawn(async move { run_http_server(http_broker, http_bind, http_cancel).await });
    }

    accept_loop(listener, broker.clone(), cancel.clone()).await;

    broker
        .shutdown(Duration::from_secs(config.shutdown_timeout_secs))
        .await;
    cleanup(&config.pid_path, &config.socket_path);
    info!(event = "daemon.local_server.shutdown_completed");
    Ok(())
}

async fn run_http_server(broker: Arc<Broker>, bind_addr: std::net::SocketAddr, cancel: CancellationToken) {
    let router = crate::http::build_router(broker, bind_addr);
    let listener = match tokio::net::TcpListener::bind(bind_addr).await {
        Ok(listener) => listener,
        Err(e) => {
            error!(event = "daemon.http.bind_failed", bind = %bind_addr, error = %e);
            return;
        }
    };
    info!(event = "daemon.http.started", bind = %bind_addr);
    let serve = axum::serve(listener, router).with_graceful_shutdown(async move {
        cancel.cancelled().await;
    });
    if let Err(e) = serve.await {
        error!(event = "daemon.http.serve_failed", error = %e);
    }
}

async fn accept_loop(listener: UnixListener, broker: Arc<Broker>, cancel: CancellationToken) {
    loop {
        tokio::select! {
            accepted = listener.accept() => {
                match accepted {
                    Ok((stream, _addr)) => {
                        let broker = broker.clone();
                        let cancel = cancel.child_token();
                        tokio::spawn(async move {
                            handle_connection(stream, broker, cancel).await;
                        });
                    }
                    Err(e) => {
                        error!(event = "daemon.local_server.accept_failed", error = %e);
                    }
                }
            }
            _ = cancel.cancelled() => {
                info!(event = "daemon.local_server.accept_loop_stopped");
                break;
            }
        }
    }
}

async fn handle_connection(stream: tokio::net::UnixStream, broker: Arc<Broker>, cancel: CancellationToken) {
    let (read_half, write_half) = stream.into_split();
    let conn = broker.register_connection().await;

    let writer_cancel = cancel.clone();
    let writer_conn = conn.clone();
    let writer_task = tokio::spawn(async move {
        writer_loop(write_half, writer_conn, writer_cancel).await;
    });

    reader_loop(read_half, &conn, &broker, &cancel).await;

    cancel.cancel();
    let _ = writer_task.await;
    broker.on_disconnect(&conn).await;
}

async fn reader_loop(
    mut read_half: OwnedReadHalf,
    conn: &Arc<ClientConnection>,
    broker: &Arc<Broker>,
    cancel: &CancellationToken,
) {
    loop {
        tokio::select! {
            frame = read_frame(&mut read_half) => {
                match frame {
                    Ok(Some(frame)) => {
                        if let Some(reply) = broker.handle_frame(conn, frame).await {
                            conn.send(reply).await;
                        }
                    }
                    Ok(None) => break,
                    Err(e) => {
                        warn!(event = "daemon.local_server.frame_read_failed", connection_id = conn.id, error = %e);
                        break;
                    }
                }
            }
            _ = cancel.cancelled() => break,
        }
    }
}

async fn writer_loop(
    mut write_half: OwnedWriteHalf,
    conn: Arc<ClientConnection>,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            frame = conn.outbound.pop() => {
                if write_frame(&mut write_half, &frame).await.is_err() {
                    break;
                }
            }
            _ = cancel.cancelled() => break,
        }
    }
}

fn resolved_paths() -> OpenKanbanPaths {
    OpenKanbanPaths::resolve().unwrap_or_else(|e| {
        warn!(event = "daemon.local_server.paths_resolve_failed", error = %e);
        OpenKanbanPaths::from_dir(std::path::PathBuf::from("/tmp/.openkanban"))
    })
}

fn cleanup(pid_path: &Path, socket_path: &Path) {
    if let Err(e) = pid::remove_pid_file(pid_path) {
        error!(event = "daemon.local_server.pid_cleanup_failed", error = %e);
    }
    if socket_path.exists() {
        if let Err(e) = std::fs::remove_file(socket_path) {
            error!(event = "daemon.local_server.socket_cleanup_failed", error = %e);
        }
    }
}

#[cfg(unix)]
fn set_user_only_permissions(path: &Path) {
    use std::os::unix::fs::PermissionsExt;
    if let Err(e) = std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o700)) {
        warn!(event = "daemon.local_server.chmod_failed", path = %path.display(), error = %e);
    }
}

#[cfg(not(unix))]
fn set_user_only_permissions(_path: &Path) {}

#[cfg(test)]
mod tests {
    use super::*;
    use openkanban_protocol::{Frame, MessageType};
    use tokio::io::AsyncWriteExt;
    use tokio::net::UnixStream;

    async fn start_test_server() -> (std::path::PathBuf, CancellationToken, tokio::task::JoinHandle<()>) {
        let dir = tempfile::tempdir().unwrap();
        let socket_path = dir.path().join("daemon.sock");
        let mut config = DaemonConfig::default();
        config.socket_path = socket_path.clone();
        config.pid_path = dir.path().join("daemon.pid");
        config.board_path = dir.path().join("board.json");

        let handle = tokio::spawn(async move {
            let _ = run_server(config).await;
        });
        // Give the listener a moment to bind.
        tokio::time::sleep(Duration::from_millis(50)).await;
        (socket_path, CancellationToken::new(), handle)
    }

    #[tokio::test]
    async fn test_create_echo_roundtrip_over_socket() {
        let (socket_path, _cancel, _handle) = start_test_server().await;
        let mut stream = UnixStream::connect(&socket_path).await.unwrap();

        let create = Frame::encode_create("s1", "/tmp", "/bin/sh", &["-c".to_string(), "echo hi".to_string()]);
        write_frame(&mut stream, &create).await.unwrap();

        let (mut read_half, mut write_half) = stream.into_split();
        let ok = read_frame(&mut read_half).await.unwrap().unwrap();
        assert_eq!(ok.msg_type, MessageType::SessionOk);

        let mut saw_hi = false;
        for _ in 0..20 {
            let frame = read_frame(&mut read_half).await.unwrap();
            match frame {
                Some(f) if f.msg_type == MessageType::Data => {
                    if String::from_utf8_lossy(&f.payload).contains("hi") {
                        saw_hi = true;
                        break;
                    }
                }
                Some(f) if f.msg_type == MessageType::Exit => break,
                _ => break,
            }
        }
        assert!(saw_hi);
        let _ = write_half.shutdown().await;
    }

    #[tokio::test]
    async fn test_second_daemon_on_same_socket_fails() {
        let (socket_path, _cancel, _handle) = start_test_server().await;
        let mut config = DaemonConfig::default();
        config.socket_path = socket_path;
        config.pid_path = tempfile::tempdir().unwrap().path().join("daemon.pid");
        let err = run_server(config).await.unwrap_err();
        assert!(matches!(err, DaemonError::SocketInUse(_)));
    }
}
