//! End-to-end tests driving a real daemon over its Unix-socket protocol.
//!
//! Each test spawns `run_server` against a temp socket/board path, then
//! speaks raw frames at it exactly as a client would.

use std::time::Duration;

use openkanban_daemon::{BoardStore, DaemonConfig};
use openkanban_protocol::{Frame, MessageType, TicketStatus, read_frame, write_frame};
use tokio::net::UnixStream;

fn test_config(dir: &std::path::Path) -> DaemonConfig {
    let mut config = DaemonConfig::default();
    config.socket_path = dir.join("daemon.sock");
    config.pid_path = dir.join("daemon.pid");
    config.board_path = dir.join("board.json");
    config.shutdown_timeout_secs = 2;
    config
}

async fn start_server(config: DaemonConfig) -> tokio::task::JoinHandle<()> {
    let socket_path = config.socket_path.clone();
    let handle = tokio::spawn(async move {
        let _ = openkanban_daemon::run_server(config).await;
    });
    for _ in 0..50 {
        if socket_path.exists() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    handle
}

async fn read_until(stream: &mut UnixStream, want: MessageType, max_tries: usize) -> Option<Frame> {
    for _ in 0..max_tries {
        match read_frame(stream).await {
            Ok(Some(frame)) if frame.msg_type == want => return Some(frame),
            Ok(Some(_)) => continue,
            _ => return None,
        }
    }
    None
}

#[tokio::test]
async fn scenario_create_echo_exit() {
    let dir = tempfile::tempdir().unwrap();
    let _server = start_server(test_config(dir.path())).await;
    let mut stream = UnixStream::connect(dir.path().join("daemon.sock")).await.unwrap();

    let create = Frame::encode_create(
        "s1",
        "/tmp",
        "/bin/sh",
        &["-c".to_string(), "echo hi; exit 7".to_string()],
    );
    write_frame(&mut stream, &create).await.unwrap();

    let ok = read_frame(&mut stream).await.unwrap().unwrap();
    assert_eq!(ok.msg_type, MessageType::SessionOk);

    let mut seen_hi = false;
    let mut saw_exit = false;
    for _ in 0..50 {
        match read_frame(&mut stream).await.unwrap() {
            Some(f) if f.msg_type == MessageType::Data => {
                if String::from_utf8_lossy(&f.payload).contains("hi") {
                    seen_hi = true;
                }
            }
            Some(f) if f.msg_type == MessageType::Exit => {
                saw_exit = true;
                break;
            }
            Some(_) => continue,
            None => break,
        }
    }
    assert!(seen_hi, "expected DATA frames to contain 'hi'");
    assert!(saw_exit, "expected an EXIT frame after the child exits");

    write_frame(&mut stream, &Frame::empty(MessageType::List)).await.unwrap();
    let list = read_until(&mut stream, MessageType::ListResponse, 10).await.unwrap();
    let ids = list.decode_list_response_payload().unwrap();
    assert!(!ids.contains(&"s1".to_string()));
}

#[tokio::test]
async fn scenario_multi_client_attach_and_detach() {
    let dir = tempfile::tempdir().unwrap();
    let _server = start_server(test_config(dir.path())).await;
    let socket_path = dir.path().join("daemon.sock");

    let mut a = UnixStream::connect(&socket_path).await.unwrap();
    let create = Frame::encode_create("s2", "/tmp", "/bin/cat", &[]);
    write_frame(&mut a, &create).await.unwrap();
    assert_eq!(read_frame(&mut a).await.unwrap().unwrap().msg_type, MessageType::SessionOk);

    let mut b = UnixStream::connect(&socket_path).await.unwrap();
    write_frame(&mut b, &Frame::new(MessageType::Attach, b"s2".to_vec())).await.unwrap();
    assert_eq!(read_frame(&mut b).await.unwrap().unwrap().msg_type, MessageType::SessionOk);

    write_frame(&mut a, &Frame::new(MessageType::Data, b"hello\n".to_vec())).await.unwrap();

    let a_saw = read_until(&mut a, MessageType::Data, 20)
        .await
        .map(|f| String::from_utf8_lossy(&f.payload).contains("hello"))
        .unwrap_or(false);
    let b_saw = read_until(&mut b, MessageType::Data, 20)
        .await
        .map(|f| String::from_utf8_lossy(&f.payload).contains("hello"))
        .unwrap_or(false);
    assert!(a_saw, "creator should see its own echoed input");
    assert!(b_saw, "attached client should see the same output");

    write_frame(&mut b, &Frame::empty(MessageType::Detach)).await.unwrap();
    assert_eq!(read_frame(&mut b).await.unwrap().unwrap().msg_type, MessageType::SessionOk);

    write_frame(&mut a, &Frame::new(MessageType::Data, b"world\n".to_vec())).await.unwrap();
    let a_saw_world = read_until(&mut a, MessageType::Data, 20)
        .await
        .map(|f| String::from_utf8_lossy(&f.payload).contains("world"))
        .unwrap_or(false);
    assert!(a_saw_world);

    // B detached before "world" was written, so it should not see it arrive.
    let b_result = tokio::time::timeout(Duration::from_millis(300), read_frame(&mut b)).await;
    if let Ok(Ok(Some(f))) = b_result {
        assert!(!String::from_utf8_lossy(&f.payload).contains("world"));
    }
}

#[tokio::test]
async fn scenario_disconnect_survives_session() {
    let dir = tempfile::tempdir().unwrap();
    let _server = start_server(test_config(dir.path())).await;
    let socket_path = dir.path().join("daemon.sock");

    {
        let mut a = UnixStream::connect(&socket_path).await.unwrap();
        let create = Frame::encode_create("s3", "/tmp", "/bin/sh", &[]);
        write_frame(&mut a, &create).await.unwrap();
        assert_eq!(read_frame(&mut a).await.unwrap().unwrap().msg_type, MessageType::SessionOk);
        // `a` is dropped here without sending DETACH.
    }
    tokio::time::sleep(Duration::from_millis(100)).await;

    let mut c = UnixStream::connect(&socket_path).await.unwrap();
    write_frame(&mut c, &Frame::new(MessageType::Attach, b"s3".to_vec())).await.unwrap();
    assert_eq!(read_frame(&mut c).await.unwrap().unwrap().msg_type, MessageType::SessionOk);

    write_frame(&mut c, &Frame::new(MessageType::Data, b"exit\n".to_vec())).await.unwrap();
    let saw_exit = read_until(&mut c, MessageType::Exit, 50).await.is_some();
    assert!(saw_exit);

    write_frame(&mut c, &Frame::empty(MessageType::List)).await.unwrap();
    let list = read_until(&mut c, MessageType::ListResponse, 10).await.unwrap();
    assert!(!list.decode_list_response_payload().unwrap().contains(&"s3".to_string()));
}

#[tokio::test]
async fn scenario_resize_propagates() {
    let dir = tempfile::tempdir().unwrap();
    let _server = start_server(test_config(dir.path())).await;
    let mut stream = UnixStream::connect(dir.path().join("daemon.sock")).await.unwrap();

    let create = Frame::encode_create(
        "s4",
        "/tmp",
        "/bin/sh",
        &["-c".to_string(), "stty size; sleep 1; stty size".to_string()],
    );
    write_frame(&mut stream, &create).await.unwrap();
    assert_eq!(read_frame(&mut stream).await.unwrap().unwrap().msg_type, MessageType::SessionOk);

    write_frame(&mut stream, &Frame::encode_resize(40, 132)).await.unwrap();

    let mut saw_size = false;
    for _ in 0..50 {
        match read_frame(&mut stream).await.unwrap() {
            Some(f) if f.msg_type == MessageType::Data => {
                if String::from_utf8_lossy(&f.payload).contains("40 132") {
                    saw_size = true;
                    break;
                }
            }
            Some(f) if f.msg_type == MessageType::Exit => break,
            Some(_) => continue,
            None => break,
        }
    }
    assert!(saw_size, "expected 'stty size' output to report the resized dimensions");
}

#[tokio::test]
async fn scenario_graceful_shutdown() {
    let dir = tempfile::tempdir().unwrap();
    let config = test_config(dir.path());
    let socket_path = config.socket_path.clone();
    let pid_path = config.pid_path.clone();
    let server = tokio::spawn(async move { openkanban_daemon::run_server(config).await });
    for _ in 0..50 {
        if socket_path.exists() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    let mut stream = UnixStream::connect(&socket_path).await.unwrap();
    let create = Frame::encode_create(
        "s5",
        "/tmp",
        "/bin/sh",
        &["-c".to_string(), "sleep 100".to_string()],
    );
    write_frame(&mut stream, &create).await.unwrap();
    assert_eq!(read_frame(&mut stream).await.unwrap().unwrap().msg_type, MessageType::SessionOk);

    // SIGTERM ourselves -> nothing: instead, simulate by sending the signal
    // to our own process, since `wait_for_shutdown_signal` listens process-wide.
    #[cfg(unix)]
    {
        use nix::sys::signal::{self, Signal};
        use nix::unistd::Pid;
        signal::kill(Pid::this(), Signal::SIGTERM).unwrap();
    }

    let saw_exit = read_until(&mut stream, MessageType::Exit, 50).await.is_some();
    assert!(saw_exit, "attached client should see EXIT during graceful shutdown");

    let result = tokio::time::timeout(Duration::from_secs(6), server).await;
    assert!(result.is_ok(), "server task should finish within 6s of SIGTERM");
    assert!(result.unwrap().unwrap().is_ok());
    assert!(!socket_path.exists(), "rendezvous socket should be removed");
    assert!(!pid_path.exists(), "pid file should be removed");
}

#[tokio::test]
async fn scenario_board_persistence_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let board_path = dir.path().join("board.json");
    let store = BoardStore::load(board_path.clone());

    let ticket = store.create_ticket("x".to_string(), String::new()).await;
    store.move_ticket(&ticket.id, TicketStatus::InProgress).await.unwrap();
    store
        .update_ticket(&ticket.id, None, Some("y".to_string()))
        .await
        .unwrap();
    store.flush_now().await.unwrap();

    let reloaded = BoardStore::load(board_path);
    let snapshot = reloaded.snapshot().await;
    let persisted = snapshot.tickets.get(&ticket.id).unwrap();
    assert_eq!(persisted.status, TicketStatus::InProgress);
    assert_eq!(persisted.description, "y");
    assert!(persisted.started_at.is_some());
    assert!(persisted.completed_at.is_none());
}
