//! The central coordinator: demultiplexes inbound frames, fans session
//! output out to attached connections, owns the registry (§4.5).

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, mpsc};
use tracing::{info, warn};

use crate::board::BoardStore;
use crate::connection::{ClientConnection, ConnectionId};
use crate::errors::DaemonError;
use crate::session::registry::{AttachOutcome, SessionRegistry};
use crate::session::{SessionEvent, SessionSpec};
use openkanban_protocol::{Frame, MessageType, SessionId};

/// Output channel depth for a session's reader-to-fanout handoff. Distinct
/// from a subscriber's own bounded queue (§5) — this one only ever has a
/// single consumer (the fan-out task for that session).
const SESSION_OUTPUT_CHANNEL_DEPTH: usize = 256;

pub struct Broker {
    registry: SessionRegistry,
    connections: Mutex<HashMap<ConnectionId, Arc<ClientConnection>>>,
    subscribers: Mutex<HashMap<SessionId, HashSet<ConnectionId>>>,
    pub board: Arc<BoardStore>,
    subscriber_queue_depth: usize,
}

impl Broker {
    pub fn new(board: Arc<BoardStore>, subscriber_queue_depth: usize) -> Arc<Self> {
        Arc::new(Self {
            registry: SessionRegistry::new(),
            connections: Mutex::new(HashMap::new()),
            subscribers: Mutex::new(HashMap::new()),
            board,
            subscriber_queue_depth,
        })
    }

    pub async fn register_connection(&self) -> Arc<ClientConnection> {
        let id = crate::connection::next_connection_id();
        let conn = Arc::new(ClientConnection::new(id, self.subscriber_queue_depth));
        self.connections.lock().await.insert(id, conn.clone());
        conn
    }

    /// Release everything this connection held: its session attachment (if
    /// any) and its board subscription.
    pub async fn on_disconnect(&self, conn: &Arc<ClientConnection>) {
        self.connections.lock().await.remove(&conn.id);
        if let Some(session_id) = conn.attached_session() {
            self.detach_connection_from(&session_id, conn.id).await;
        }
        self.board.unsubscribe(conn.id).await;
        info!(event = "daemon.broker.connection_disconnected", connection_id = conn.id);
    }

    async fn detach_connection_from(&self, session_id: &SessionId, conn_id: ConnectionId) {
        let mut subs = self.subscribers.lock().await;
        if let Some(set) = subs.get_mut(session_id) {
            set.remove(&conn_id);
            if set.is_empty() {
                subs.remove(session_id);
            }
        }
    }

    /// Route one decoded frame from `conn` into the control-operation table
    /// (§4.5). Returns the reply frame to send back, if any.
    pub async fn handle_frame(&self, conn: &Arc<ClientConnection>, frame: Frame) -> Option<Frame> {
        match frame.msg_type {
            MessageType::Create => Some(self.handle_create(conn, &frame).await),
            MessageType::Attach => Some(self.handle_attach(conn, &frame).await),
            MessageType::Detach => {
                self.handle_detach(conn).await;
                None
            }
            MessageType::List => Some(self.handle_list().await),
            MessageType::Data => {
                self.handle_data(conn, &frame.payload).await;
                None
            }
            MessageType::Resize => {
                self.handle_resize(conn, &frame).await;
                None
            }
            other => {
                warn!(event = "daemon.broker.unexpected_client_frame", msg_type = ?other);
                None
            }
        }
    }

    async fn handle_create(&self, conn: &Arc<ClientConnection>, frame: &Frame) -> Frame {
        let (session_id, workdir, command, args) = match frame.decode_create_payload() {
            Ok(parts) => parts,
            Err(e) => return error_frame(&e.to_string()),
        };
        if session_id.is_empty() {
            return error_frame(&DaemonError::EmptySessionId.client_message());
        }

        let spec = SessionSpec {
            command,
            args,
            workdir: std::path::PathBuf::from(workdir),
            extra_env: Vec::new(),
            rows: None,
            cols: None,
        };

        let (tx, rx) = mpsc::channel(SESSION_OUTPUT_CHANNEL_DEPTH);
        let id = SessionId::from(session_id.as_str());
        match self.registry.create_or_attach(id.clone(), spec, tx).await {
            Ok(outcome) => {
                if let AttachOutcome::Created(_) = &outcome {
                    self.spawn_session_fanout(id.clone(), rx);
                }
                self.bind_attachment(conn, &id).await;
                info!(event = "daemon.broker.session_attached", session_id = %id, connection_id = conn.id);
                Frame::empty(MessageType::SessionOk)
            }
            Err(e) => error_frame(&e.client_message()),
        }
    }

    async fn handle_attach(&self, conn: &Arc<ClientConnection>, frame: &Frame) -> Frame {
        let text = match frame.decode_text_payload() {
            Ok(t) => t,
            Err(e) => return error_frame(&e.to_string()),
        };
        if text.is_empty() {
            return error_frame(&DaemonError::EmptySessionId.client_message());
        }
        let id = SessionId::from(text.as_str());
        match self.attach_for_ws(conn, &id).await {
            Ok(()) => Frame::empty(MessageType::SessionOk),
            Err(e) => error_frame(&e.client_message()),
        }
    }

    /// ATTACH without the binary-frame encoding, for the WebSocket adapter
    /// (§4.4's "same abstract thing... routed through an adapter").
    pub async fn attach_for_ws(&self, conn: &Arc<ClientConnection>, id: &SessionId) -> Result<(), DaemonError> {
        if id.is_empty() {
            return Err(DaemonError::EmptySessionId);
        }
        match self.registry.lookup(id).await {
            Some(session) if session.is_running() => {
                self.bind_attachment(conn, id).await;
                Ok(())
            }
            Some(_) => Err(DaemonError::SessionNotRunning(id.to_string())),
            None => Err(DaemonError::SessionNotFound(id.to_string())),
        }
    }

    pub async fn detach_for_ws(&self, conn: &Arc<ClientConnection>) {
        self.handle_detach(conn).await;
    }

    pub async fn write_for_ws(&self, conn: &Arc<ClientConnection>, payload: &[u8]) {
        self.handle_data(conn, payload).await;
    }

    pub async fn resize_for_ws(&self, conn: &Arc<ClientConnection>, rows: u16, cols: u16) {
        let Some(id) = conn.attached_session() else {
            return;
        };
        if let Some(session) = self.registry.lookup(&id).await {
            session.resize(rows, cols);
        }
    }

    /// `agent:kill` — stop the session rather than waiting for the child to
    /// exit on its own. Fan-out of the `EXIT` frame and the registry removal
    /// both stay owned by `spawn_session_fanout`'s `SessionEvent::Exit` arm,
    /// which the killed session's reader task still drives once it observes
    /// EOF; calling it again here would deliver a second `EXIT` to every
    /// subscriber (§8: exactly once).
    pub async fn kill_session(&self, id: &SessionId) {
        if let Some(session) = self.registry.lookup(id).await {
            session.stop_graceful(Duration::from_secs(5)).await;
        }
    }

    async fn bind_attachment(&self, conn: &Arc<ClientConnection>, id: &SessionId) {
        if let Some(previous) = conn.attached_session() {
            self.detach_connection_from(&previous, conn.id).await;
        }
        conn.set_attached_session(Some(id.clone()));
        self.subscribers
            .lock()
            .await
            .entry(id.clone())
            .or_default()
            .insert(conn.id);
    }

    async fn handle_detach(&self, conn: &Arc<ClientConnection>) {
        if let Some(id) = conn.attached_session() {
            self.detach_connection_from(&id, conn.id).await;
        }
        conn.set_attached_session(None);
    }

    async fn handle_list(&self) -> Frame {
        let ids: Vec<String> = self
            .registry
            .list()
            .await
            .into_iter()
            .filter(|s| s.is_running())
            .map(|s| s.id.clone())
            .collect();
        Frame::encode_list_response(&ids)
    }

    async fn handle_data(&self, conn: &Arc<ClientConnection>, payload: &[u8]) {
        let Some(id) = conn.attached_session() else {
            return;
        };
        if let Some(session) = self.registry.lookup(&id).await {
            if let Err(e) = session.write(payload) {
                warn!(event = "daemon.broker.write_on_dead_session", session_id = %id, error = %e);
            }
        }
    }

    async fn handle_resize(&self, conn: &Arc<ClientConnection>, frame: &Frame) {
        let Some(id) = conn.attached_session() else {
            return;
        };
        let Ok((rows, cols)) = frame.decode_resize_payload() else {
            return;
        };
        if let Some(session) = self.registry.lookup(&id).await {
            session.resize(rows, cols);
        }
    }

    fn spawn_session_fanout(self: &Arc<Self>, session_id: SessionId, mut rx: mpsc::Receiver<SessionEvent>) {
        let broker = self.clone();
        tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                match event {
                    SessionEvent::Data(bytes) => {
                        broker
                            .fanout(&session_id, Frame::new(MessageType::Data, bytes))
                            .await;
                    }
                    SessionEvent::Exit(_code) => {
                        broker.fanout(&session_id, Frame::empty(MessageType::Exit)).await;
                        broker.finish_session(&session_id).await;
                        break;
                    }
                }
            }
        });
    }

    async fn fanout(&self, session_id: &SessionId, frame: Frame) {
        let subscriber_ids: Vec<ConnectionId> = {
            let subs = self.subscribers.lock().await;
            subs.get(session_id).map(|s| s.iter().copied().collect()).unwrap_or_default()
        };
        let connections = self.connections.lock().await;
        for conn_id in subscriber_ids {
            if let Some(conn) = connections.get(&conn_id) {
                conn.send(frame.clone()).await;
            }
        }
    }

    /// Called only from `spawn_session_fanout`'s `Exit` arm, right after it
    /// fans the one-and-only `EXIT` frame out; this clears attachments and
    /// drops the session from the registry.
    async fn finish_session(&self, session_id: &SessionId) {
        let subscriber_ids: Vec<ConnectionId> = {
            let mut subs = self.subscribers.lock().await;
            subs.remove(session_id).map(|s| s.into_iter().collect()).unwrap_or_default()
        };
        let connections = self.connections.lock().await;
        for conn_id in subscriber_ids {
            if let Some(conn) = connections.get(&conn_id) {
                conn.set_attached_session(None);
            }
        }
        drop(connections);
        self.registry.remove(session_id).await;
        info!(event = "daemon.broker.session_finished", session_id = %session_id);
    }

    /// Create (or attach to) a session on behalf of the WebSocket/REST
    /// front end, which drives the same operation set through a JSON
    /// adapter instead of binary frames (§4.4).
    pub async fn create_or_attach_for_ws(
        self: &Arc<Self>,
        conn: &Arc<ClientConnection>,
        session_id: SessionId,
        workdir: String,
        command: String,
        args: Vec<String>,
    ) -> Result<(), DaemonError> {
        let spec = SessionSpec {
            command,
            args,
            workdir: std::path::PathBuf::from(workdir),
            extra_env: Vec::new(),
            rows: None,
            cols: None,
        };
        let (tx, rx) = mpsc::channel(SESSION_OUTPUT_CHANNEL_DEPTH);
        let outcome = self
            .registry
            .create_or_attach(session_id.clone(), spec, tx)
            .await?;
        if let AttachOutcome::Created(_) = &outcome {
            self.spawn_session_fanout(session_id.clone(), rx);
        }
        self.bind_attachment(conn, &session_id).await;
        Ok(())
    }

    pub async fn lookup_session(&self, id: &SessionId) -> Option<Arc<crate::session::Session>> {
        self.registry.lookup(id).await
    }

    pub async fn running_session_ids(&self) -> Vec<String> {
        self.registry
            .list()
            .await
            .into_iter()
            .filter(|s| s.is_running())
            .map(|s| s.id.clone())
            .collect()
    }

    /// Stop accepting has already happened by the time this runs (the
    /// caller owns the listener); this stops every session, flushes the
    /// board, and returns once all of that settles (§4.5 steps b–c).
    pub async fn shutdown(&self, session_timeout: Duration) {
        let sessions = self.registry.list().await;
        info!(event = "daemon.broker.shutdown_started", session_count = sessions.len());

        let stops = sessions.iter().map(|s| s.stop_graceful(session_timeout));
        futures::future::join_all(stops).await;

        for session in &sessions {
            self.finish_session(&SessionId::from(session.id.as_str())).await;
        }

        if let Err(e) = self.board.flush_now().await {
            warn!(event = "daemon.broker.final_flush_failed", error = %e);
        }

        info!(event = "daemon.broker.shutdown_completed");
    }
}

fn error_frame(message: &str) -> Frame {
    Frame::new(MessageType::SessionError, message.as_bytes().to_vec())
}
