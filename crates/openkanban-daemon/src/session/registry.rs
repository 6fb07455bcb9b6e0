//! The session table itself (§4.3).
//!
//! Deliberately narrow: `create_or_attach`, `lookup`, `remove`, `list`.
//! Attachment bookkeeping (which client is watching which session) lives
//! in the broker, not here — this type only ever answers "does a session
//! with this id exist, and if so, here it is."

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{Mutex, mpsc};
use tracing::info;

use crate::errors::DaemonError;
use crate::session::{Session, SessionEvent, SessionSpec};
use openkanban_protocol::SessionId;

/// What `create_or_attach` actually did, so callers can tell a brand new
/// session from one that already existed under that id.
pub enum AttachOutcome {
    Created(Arc<Session>),
    Attached(Arc<Session>),
}

impl AttachOutcome {
    pub fn session(&self) -> &Arc<Session> {
        match self {
            AttachOutcome::Created(s) | AttachOutcome::Attached(s) => s,
        }
    }
}

/// Holds every live session, keyed by id. A single short critical section
/// per operation; nothing blocking ever runs while the lock is held.
pub struct SessionRegistry {
    sessions: Mutex<HashMap<SessionId, Arc<Session>>>,
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
        }
    }

    /// If `id` already names a running session, return it unchanged
    /// (`spec` is ignored — §4.3's CREATE-is-idempotent-for-attach rule).
    /// Otherwise spawn a new one and insert it.
    ///
    /// `Session::start` opens a PTY and forks/execs a child, so it must
    /// never run while the table lock is held (§4.3, §5: the lock's
    /// critical section is O(1), no PTY or network operation under it). The
    /// existence check and the final insert are each their own short
    /// critical section; the spawn happens in between, unlocked. If another
    /// caller wins the race and inserts first, the session we just spawned
    /// is discarded in favor of theirs rather than leaking two PTYs under
    /// one id.
    pub async fn create_or_attach(
        &self,
        id: SessionId,
        spec: SessionSpec,
        output_tx: mpsc::Sender<SessionEvent>,
    ) -> Result<AttachOutcome, DaemonError> {
        if let Some(existing) = self.running_session(&id).await {
            return Ok(AttachOutcome::Attached(existing));
        }

        let session = Session::start(id.to_string(), spec, output_tx)?;

        let mut sessions = self.sessions.lock().await;
        if let Some(existing) = sessions.get(&id) {
            if existing.is_running() {
                drop(sessions);
                session.close().await;
                return Ok(AttachOutcome::Attached(existing.clone()));
            }
        }
        sessions.insert(id.clone(), session.clone());
        drop(sessions);
        info!(event = "daemon.registry.session_created", session_id = %id);
        Ok(AttachOutcome::Created(session))
    }

    async fn running_session(&self, id: &SessionId) -> Option<Arc<Session>> {
        let sessions = self.sessions.lock().await;
        sessions
            .get(id)
            .filter(|s| s.is_running())
            .cloned()
    }

    pub async fn lookup(&self, id: &SessionId) -> Option<Arc<Session>> {
        self.sessions.lock().await.get(id).cloned()
    }

    /// Remove and return the session, if any. Does not stop it — callers
    /// that want a clean shutdown must call `stop_graceful` themselves
    /// before or after removing it from the table.
    pub async fn remove(&self, id: &SessionId) -> Option<Arc<Session>> {
        let removed = self.sessions.lock().await.remove(id);
        if removed.is_some() {
            info!(event = "daemon.registry.session_removed", session_id = %id);
        }
        removed
    }

    pub async fn list(&self) -> Vec<Arc<Session>> {
        self.sessions.lock().await.values().cloned().collect()
    }

    pub async fn len(&self) -> usize {
        self.sessions.lock().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn spec(command: &str) -> SessionSpec {
        SessionSpec {
            command: command.to_string(),
            args: Vec::new(),
            workdir: PathBuf::from("/tmp"),
            extra_env: Vec::new(),
            rows: None,
            cols: None,
        }
    }

    #[tokio::test]
    async fn test_create_then_attach_returns_same_session() {
        let registry = SessionRegistry::new();
        let (tx, _rx) = mpsc::channel(16);
        let id = SessionId::from("r1");

        let first = registry
            .create_or_attach(id.clone(), spec("/bin/cat"), tx.clone())
            .await
            .unwrap();
        assert!(matches!(first, AttachOutcome::Created(_)));

        let second = registry
            .create_or_attach(id.clone(), spec("/bin/cat"), tx)
            .await
            .unwrap();
        assert!(matches!(second, AttachOutcome::Attached(_)));
        assert!(Arc::ptr_eq(first.session(), second.session()));

        first.session().close().await;
    }

    #[tokio::test]
    async fn test_lookup_missing_returns_none() {
        let registry = SessionRegistry::new();
        assert!(registry.lookup(&SessionId::from("nope")).await.is_none());
    }

    #[tokio::test]
    async fn test_remove_drops_from_table() {
        let registry = SessionRegistry::new();
        let (tx, _rx) = mpsc::channel(16);
        let id = SessionId::from("r2");
        registry
            .create_or_attach(id.clone(), spec("/bin/cat"), tx)
            .await
            .unwrap();
        assert_eq!(registry.len().await, 1);

        let removed = registry.remove(&id).await;
        assert!(removed.is_some());
        assert_eq!(registry.len().await, 0);
        removed.unwrap().close().await;
    }

    #[tokio::test]
    async fn test_list_returns_all_sessions() {
        let registry = SessionRegistry::new();
        let (tx, _rx) = mpsc::channel(16);
        registry
            .create_or_attach(SessionId::from("a"), spec("/bin/cat"), tx.clone())
            .await
            .unwrap();
        registry
            .create_or_attach(SessionId::from("b"), spec("/bin/cat"), tx)
            .await
            .unwrap();
        let all = registry.list().await;
        assert_eq!(all.len(), 2);
        for session in all {
            session.close().await;
        }
    }

    #[tokio::test]
    async fn test_exited_session_id_is_recreated_not_attached() {
        let registry = SessionRegistry::new();
        let (tx, _rx) = mpsc::channel(16);
        let id = SessionId::from("r3");

        let first = registry
            .create_or_attach(id.clone(), spec("/bin/sh"), tx.clone())
            .await
            .unwrap();
        first.session().close().await;

        let second = registry
            .create_or_attach(id.clone(), spec("/bin/cat"), tx)
            .await
            .unwrap();
        assert!(matches!(second, AttachOutcome::Created(_)));
        assert!(!Arc::ptr_eq(first.session(), second.session()));
        second.session().close().await;
    }
}
