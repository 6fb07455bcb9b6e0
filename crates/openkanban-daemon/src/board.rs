//! In-memory kanban state plus debounced atomic JSON persistence (§4.6).

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::{Mutex, Notify, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::connection::ConnectionId;
use crate::errors::DaemonError;
use openkanban_protocol::{AgentStatus, Board, BoardSettings, SessionId, Ticket, TicketStatus};
use openkanban_protocol::ws::ServerMessage;

/// Bounded per-subscriber channel depth for board events. Overflow here
/// closes the subscriber rather than dropping events — board mutations are
/// low-frequency and must be lossless for whoever receives them (§5).
pub(crate) const BOARD_SUBSCRIBER_QUEUE_DEPTH: usize = 128;

struct Inner {
    board: Board,
    dirty: bool,
}

/// Owns the in-memory board and the on-disk file exclusively. Mutations go
/// through the methods below, each of which bumps `dirty` and notifies the
/// flush task; broadcasting to board subscribers happens synchronously with
/// the mutation itself so subscribers observe events in application order.
pub struct BoardStore {
    inner: Mutex<Inner>,
    subscribers: Mutex<HashMap<ConnectionId, mpsc::Sender<ServerMessage>>>,
    path: PathBuf,
    tmp_path: PathBuf,
    flush_notify: Notify,
}

impl BoardStore {
    /// Load `path` if present; any read or parse failure yields a fresh
    /// default board rather than failing startup (§4.6: "Never throw on
    /// load").
    pub fn load(path: PathBuf) -> Self {
        let board = match std::fs::read_to_string(&path) {
            Ok(contents) => match serde_json::from_str::<Board>(&contents) {
                Ok(board) => board,
                Err(e) => {
                    warn!(event = "daemon.board.parse_failed", path = %path.display(), error = %e);
                    Board::default()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Board::default(),
            Err(e) => {
                warn!(event = "daemon.board.read_failed", path = %path.display(), error = %e);
                Board::default()
            }
        };

        let tmp_path = tmp_path_for(&path);
        Self {
            inner: Mutex::new(Inner { board, dirty: false }),
            subscribers: Mutex::new(HashMap::new()),
            path,
            tmp_path,
            flush_notify: Notify::new(),
        }
    }

    pub async fn snapshot(&self) -> Board {
        self.inner.lock().await.board.clone()
    }

    pub async fn subscribe(&self, id: ConnectionId, tx: mpsc::Sender<ServerMessage>) {
        self.subscribers.lock().await.insert(id, tx);
    }

    pub async fn unsubscribe(&self, id: ConnectionId) {
        self.subscribers.lock().await.remove(&id);
    }

    async fn broadcast(&self, msg: ServerMessage) {
        let mut subscribers = self.subscribers.lock().await;
        let mut dead = Vec::new();
        for (id, tx) in subscribers.iter() {
            if tx.try_send(msg.clone()).is_err() {
                warn!(event = "daemon.board.subscriber_overflow_closed", connection_id = id);
                dead.push(*id);
            }
        }
        for id in dead {
            subscribers.remove(&id);
        }
    }

    fn mark_dirty(inner: &mut Inner) {
        inner.dirty = true;
    }

    pub async fn create_ticket(&self, title: String, description: String) -> Ticket {
        let now = Utc::now();
        let mut ticket = Ticket::new(Uuid::new_v4().to_string(), title, now);
        ticket.description = description;

        let mut inner = self.inner.lock().await;
        inner.board.tickets.insert(ticket.id.clone(), ticket.clone());
        Self::mark_dirty(&mut inner);
        drop(inner);

        self.flush_notify.notify_one();
        self.broadcast(ServerMessage::TicketCreated { ticket: ticket.clone() }).await;
        info!(event = "daemon.board.ticket_created", ticket_id = %ticket.id);
        ticket
    }

    pub async fn update_ticket(
        &self,
        id: &str,
        title: Option<String>,
        description: Option<String>,
    ) -> Result<Ticket, DaemonError> {
        let mut inner = self.inner.lock().await;
        let ticket = inner
            .board
            .tickets
            .get_mut(id)
            .ok_or_else(|| DaemonError::TicketNotFound(id.to_string()))?;
        if let Some(title) = title {
            ticket.title = title;
        }
        if let Some(description) = description {
            ticket.description = description;
        }
        ticket.updated_at = Utc::now();
        let updated = ticket.clone();
        Self::mark_dirty(&mut inner);
        drop(inner);

        self.flush_notify.notify_one();
        self.broadcast(ServerMessage::TicketUpdated { ticket: updated.clone() }).await;
        Ok(updated)
    }

    /// Delete a ticket. Unless `force` is set, refuses with
    /// `DaemonError::UncommittedChanges` when the ticket's `worktree_path`
    /// is a git worktree with uncommitted changes (§7 `UNCOMMITTED_CHANGES`).
    /// A ticket with no `worktree_path`, or whose path isn't a checkable
    /// repo, has nothing to protect and always deletes.
    pub async fn delete_ticket(&self, id: &str, force: bool) -> Result<(), DaemonError> {
        let mut inner = self.inner.lock().await;
        let ticket = inner
            .board
            .tickets
            .get(id)
            .ok_or_else(|| DaemonError::TicketNotFound(id.to_string()))?;

        if !force {
            if let Some(worktree_path) = ticket.worktree_path.clone() {
                drop(inner);
                let dirty = tokio::task::spawn_blocking(move || {
                    crate::git::has_uncommitted_changes(std::path::Path::new(&worktree_path))
                })
                .await
                .unwrap_or(None);
                if dirty == Some(true) {
                    return Err(DaemonError::UncommittedChanges(id.to_string()));
                }
                inner = self.inner.lock().await;
            }
        }

        inner
            .board
            .tickets
            .remove(id)
            .ok_or_else(|| DaemonError::TicketNotFound(id.to_string()))?;
        Self::mark_dirty(&mut inner);
        drop(inner);

        self.flush_notify.notify_one();
        self.broadcast(ServerMessage::TicketDeleted { id: id.to_string() }).await;
        info!(event = "daemon.board.ticket_deleted", ticket_id = id);
        Ok(())
    }

    pub async fn move_ticket(&self, id: &str, status: TicketStatus) -> Result<Ticket, DaemonError> {
        let mut inner = self.inner.lock().await;
        let ticket = inner
            .board
            .tickets
            .get_mut(id)
            .ok_or_else(|| DaemonError::TicketNotFound(id.to_string()))?;
        ticket.move_to(status, Utc::now());
        let updated = ticket.clone();
        Self::mark_dirty(&mut inner);
        drop(inner);

        self.flush_notify.notify_one();
        self.broadcast(ServerMessage::TicketUpdated { ticket: updated.clone() }).await;
        Ok(updated)
    }

    /// Ticket ids whose `terminal_session_id` is set, for the agent-status
    /// poller to map status files back onto tickets.
    pub async fn tickets_with_session(&self) -> Vec<(String, String)> {
        self.inner
            .lock()
            .await
            .board
            .tickets
            .values()
            .filter_map(|t| t.terminal_session_id.clone().map(|sid| (t.id.clone(), sid)))
            .collect()
    }

    /// Update `ticket_id`'s `agent_status` if it changed. Broadcasts the
    /// lighter `agent:status` event rather than a full `ticket:updated` —
    /// this is called on every poll tick, and most ticks find no change.
    pub async fn set_agent_status(&self, ticket_id: &str, status: AgentStatus) -> Result<(), DaemonError> {
        let (session_id, changed) = {
            let mut inner = self.inner.lock().await;
            let ticket = inner
                .board
                .tickets
                .get_mut(ticket_id)
                .ok_or_else(|| DaemonError::TicketNotFound(ticket_id.to_string()))?;
            let session_id = ticket.terminal_session_id.clone().unwrap_or_default();
            if ticket.agent_status == status {
                (session_id, false)
            } else {
                ticket.agent_status = status;
                ticket.updated_at = Utc::now();
                Self::mark_dirty(&mut inner);
                (session_id, true)
            }
        };
        if changed {
            self.flush_notify.notify_one();
            self.broadcast(ServerMessage::AgentStatusChanged {
                session_id: SessionId::from(session_id.as_str()),
                status,
            })
            .await;
        }
        Ok(())
    }

    #[cfg(test)]
    pub async fn set_worktree_path_for_test(&self, id: &str, worktree_path: String) {
        let mut inner = self.inner.lock().await;
        if let Some(ticket) = inner.board.tickets.get_mut(id) {
            ticket.worktree_path = Some(worktree_path);
        }
    }

    pub async fn update_settings(&self, settings: BoardSettings) {
        let mut inner = self.inner.lock().await;
        inner.board.settings = settings;
        Self::mark_dirty(&mut inner);
        let board = inner.board.clone();
        drop(inner);

        self.flush_notify.notify_one();
        self.broadcast(ServerMessage::BoardState { board }).await;
    }

    /// Serialize to `<path>.tmp`, fsync, then rename over `path`. Leaves no
    /// temporary file behind on success.
    async fn flush_once(&self) -> Result<(), DaemonError> {
        let (board, was_dirty) = {
            let mut inner = self.inner.lock().await;
            let was_dirty = inner.dirty;
            inner.dirty = false;
            (inner.board.clone(), was_dirty)
        };
        if !was_dirty {
            return Ok(());
        }

        let json = serde_json::to_string_pretty(&board)?;
        let path = self.path.clone();
        let tmp_path = self.tmp_path.clone();
        tokio::task::spawn_blocking(move || atomic_write(&tmp_path, &path, json.as_bytes()))
            .await
            .map_err(|e| DaemonError::PersistenceError(format!("flush task panicked: {e}")))??;
        debug!(event = "daemon.board.flush_completed", path = %self.path.display());
        Ok(())
    }

    /// Flush unconditionally, ignoring the dirty flag. Used at shutdown.
    pub async fn flush_now(&self) -> Result<(), DaemonError> {
        self.inner.lock().await.dirty = true;
        self.flush_once().await
    }

    /// Runs until `cancel` fires: on each notification, waits out the
    /// debounce window (collapsing any further notifications that arrive
    /// meanwhile) and then flushes once. Persistence failures are logged
    /// and retried on the next mutation, never surfaced as an error to a
    /// client (§7 `PERSISTENCE_ERROR` policy).
    pub async fn run_flush_task(self: Arc<Self>, debounce: std::time::Duration, cancel: CancellationToken) {
        loop {
            tokio::select! {
                _ = self.flush_notify.notified() => {}
                _ = cancel.cancelled() => break,
            }

            tokio::select! {
                _ = tokio::time::sleep(debounce) => {}
                _ = cancel.cancelled() => {
                    let _ = self.flush_once().await;
                    break;
                }
            }

            if let Err(e) = self.flush_once().await {
                error!(event = "daemon.board.flush_failed", error = %e);
            }
        }
        info!(event = "daemon.board.flush_task_completed");
    }
}

fn tmp_path_for(path: &Path) -> PathBuf {
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    PathBuf::from(tmp)
}

fn atomic_write(tmp_path: &Path, final_path: &Path, data: &[u8]) -> Result<(), DaemonError> {
    if let Some(parent) = final_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let file = std::fs::File::create(tmp_path)?;
    {
        use std::io::Write;
        let mut file = &file;
        file.write_all(data)?;
    }
    file.sync_all()?;
    std::fs::rename(tmp_path, final_path)?;
    Ok(())
}
