//! Adapts one WebSocket connection into the same broker operation set the
//! local binary protocol drives (§4.4, §6).

use std::sync::Arc;
use std::sync::atomic::Ordering;

use axum::extract::State;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::response::IntoResponse;
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use super::AppState;
use crate::board::BOARD_SUBSCRIBER_QUEUE_DEPTH;
use crate::broker::Broker;
use crate::connection::ClientConnection;
use openkanban_protocol::ws::{ClientMessage, ServerMessage};
use openkanban_protocol::{Frame, MessageType, SessionId};

pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let broker = state.broker;
    let conn = broker.register_connection().await;
    let (mut sender, mut receiver) = socket.split();
    let (board_tx, mut board_rx) = mpsc::channel::<ServerMessage>(BOARD_SUBSCRIBER_QUEUE_DEPTH);

    loop {
        tokio::select! {
            incoming = receiver.next() => {
                match incoming {
                    Some(Ok(Message::Text(text))) => {
                        handle_client_message(&broker, &conn, &board_tx, &text).await;
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        warn!(event = "daemon.http.ws_read_failed", connection_id = conn.id, error = %e);
                        break;
                    }
                }
            }
            frame = conn.outbound.pop() => {
                if let Some(msg) = terminal_frame_to_server_message(&conn, frame) {
                    if send_json(&mut sender, &msg).await.is_err() {
                        break;
                    }
                }
            }
            Some(msg) = board_rx.recv() => {
                if send_json(&mut sender, &msg).await.is_err() {
                    break;
                }
            }
        }
    }

    broker.on_disconnect(&conn).await;
}

async fn handle_client_message(
    broker: &Arc<Broker>,
    conn: &Arc<ClientConnection>,
    board_tx: &mpsc::Sender<ServerMessage>,
    text: &str,
) {
    let msg: ClientMessage = match serde_json::from_str(text) {
        Ok(m) => m,
        Err(e) => {
            debug!(event = "daemon.http.ws_malformed_message", error = %e);
            return;
        }
    };

    match msg {
        ClientMessage::TerminalSubscribe { session_id } => {
            let _ = broker.attach_for_ws(conn, &session_id).await;
        }
        ClientMessage::TerminalUnsubscribe { .. } => {
            broker.detach_for_ws(conn).await;
        }
        ClientMessage::TerminalInput { data, .. } => {
            if let Ok(bytes) = BASE64.decode(data.as_bytes()) {
                broker.write_for_ws(conn, &bytes).await;
            }
        }
        ClientMessage::TerminalResize { rows, cols, .. } => {
            broker.resize_for_ws(conn, rows, cols).await;
        }
        ClientMessage::AgentSpawn { session_id, workdir, command, args } => {
            let _ = broker
                .create_or_attach_for_ws(conn, session_id, workdir, command, args)
                .await;
        }
        ClientMessage::AgentKill { session_id } => {
            broker.kill_session(&session_id).await;
        }
        ClientMessage::BoardSubscribe => {
            conn.board_subscribed.store(true, Ordering::SeqCst);
            broker.board.subscribe(conn.id, board_tx.clone()).await;
        }
        ClientMessage::BoardUnsubscribe => {
            conn.board_subscribed.store(false, Ordering::SeqCst);
            broker.board.unsubscribe(conn.id).await;
        }
        ClientMessage::TicketCreate { title, description } => {
            broker.board.create_ticket(title, description).await;
        }
        ClientMessage::TicketUpdate { id, title, description } => {
            let _ = broker.board.update_ticket(&id, title, description).await;
        }
        ClientMessage::TicketDelete { id, force } => {
            if let Err(e) = broker.board.delete_ticket(&id, force).await {
                let _ = board_tx
                    .send(ServerMessage::Error { message: e.client_message() })
                    .await;
            }
        }
        ClientMessage::TicketMove { id, status } => {
            let _ = broker.board.move_ticket(&id, status).await;
        }
        ClientMessage::Ping => {
            conn.send(Frame::empty(MessageType::SessionOk)).await;
        }
    }
}

/// Convert one of the connection's queued `Frame`s into the equivalent JSON
/// `ServerMessage`. Returns `None` for frame types a WebSocket client never
/// needs to see directly (`SESSION_OK`/`SESSION_ERROR` in response to an
/// unrecognized frame type, which the adapter never produces itself).
fn terminal_frame_to_server_message(conn: &ClientConnection, frame: Frame) -> Option<ServerMessage> {
    let session_id = conn.attached_session().unwrap_or_else(|| SessionId::from(""));
    match frame.msg_type {
        MessageType::Data => Some(ServerMessage::TerminalOutput {
            session_id,
            data: BASE64.encode(&frame.payload),
        }),
        MessageType::Exit => Some(ServerMessage::TerminalExit {
            session_id,
            exit_code: None,
        }),
        MessageType::SessionError => Some(ServerMessage::Error {
            message: frame.decode_text_payload().unwrap_or_default(),
        }),
        MessageType::SessionOk => Some(ServerMessage::Pong),
        _ => None,
    }
}

async fn send_json(
    sender: &mut futures::stream::SplitSink<WebSocket, Message>,
    msg: &ServerMessage,
) -> Result<(), axum::Error> {
    let text = serde_json::to_string(msg)
        .unwrap_or_else(|_| r#"{"type":"error","message":"serialization failure"}"#.to_string());
    sender.send(Message::Text(text.into())).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::board::BoardStore;

    fn board_channel() -> mpsc::Sender<ServerMessage> {
        mpsc::channel(8).0
    }

    #[tokio::test]
    async fn test_ticket_create_message_creates_ticket() {
        let dir = tempfile::tempdir().unwrap();
        let board = Arc::new(BoardStore::load(dir.path().join("board.json")));
        let broker = Broker::new(board.clone(), 64);
        let conn = broker.register_connection().await;

        handle_client_message(&broker, &conn, &board_channel(), r#"{"type":"ticket:create","title":"x"}"#).await;
        assert_eq!(board.snapshot().await.tickets.len(), 1);
    }

    #[tokio::test]
    async fn test_malformed_message_does_not_panic() {
        let dir = tempfile::tempdir().unwrap();
        let board = Arc::new(BoardStore::load(dir.path().join("board.json")));
        let broker = Broker::new(board, 64);
        let conn = broker.register_connection().await;
        handle_client_message(&broker, &conn, &board_channel(), "not json").await;
    }

    #[tokio::test]
    async fn test_agent_spawn_then_terminal_input_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let board = Arc::new(BoardStore::load(dir.path().join("board.json")));
        let broker = Broker::new(board, 64);
        let conn = broker.register_connection().await;

        handle_client_message(
            &broker,
            &conn,
            &board_channel(),
            r#"{"type":"agent:spawn","session_id":"ws1","workdir":"/tmp","command":"/bin/cat","args":[]}"#,
        )
        .await;
        assert!(conn.attached_session().is_some());

        if let Some(session) = broker.lookup_session(&SessionId::from("ws1")).await {
            session.close().await;
        }
    }

    #[tokio::test]
    async fn test_ticket_delete_without_force_on_dirty_worktree_sends_error() {
        let dir = tempfile::tempdir().unwrap();
        let board = Arc::new(BoardStore::load(dir.path().join("board.json")));
        let broker = Broker::new(board.clone(), 64);
        let conn = broker.register_connection().await;
        let ticket = board.create_ticket("t".to_string(), String::new()).await;

        let worktree = dir.path().join("worktree");
        std::fs::create_dir_all(&worktree).unwrap();
        let git = |args: &[&str]| {
            assert!(std::process::Command::new("git")
                .args(args)
                .current_dir(&worktree)
                .status()
                .unwrap()
                .success());
        };
        git(&["init", "-q"]);
        git(&["config", "user.email", "test@example.com"]);
        git(&["config", "user.name", "test"]);
        std::fs::write(worktree.join("a.txt"), "uncommitted").unwrap();
        board
            .set_worktree_path_for_test(&ticket.id, worktree.display().to_string())
            .await;

        let (tx, mut rx) = mpsc::channel(8);
        let payload = format!(r#"{{"type":"ticket:delete","id":"{}"}}"#, ticket.id);
        handle_client_message(&broker, &conn, &tx, &payload).await;

        let msg = rx.recv().await.unwrap();
        assert!(matches!(msg, ServerMessage::Error { .. }));
        assert!(board.snapshot().await.tickets.contains_key(&ticket.id));

        let payload = format!(r#"{{"type":"ticket:delete","id":"{}","force":true}}"#, ticket.id);
        handle_client_message(&broker, &conn, &tx, &payload).await;
        assert!(!board.snapshot().await.tickets.contains_key(&ticket.id));
    }

    #[tokio::test]
    async fn test_board_subscribe_then_create_delivers_event() {
        let dir = tempfile::tempdir().unwrap();
        let board = Arc::new(BoardStore::load(dir.path().join("board.json")));
        let broker = Broker::new(board, 64);
        let conn = broker.register_connection().await;
        let (tx, mut rx) = mpsc::channel(8);

        handle_client_message(&broker, &conn, &tx, r#"{"type":"board:subscribe"}"#).await;
        handle_client_message(&broker, &conn, &tx, r#"{"type":"ticket:create","title":"x"}"#).await;

        let msg = rx.recv().await.unwrap();
        assert!(matches!(msg, ServerMessage::TicketCreated { .. }));
    }
}
