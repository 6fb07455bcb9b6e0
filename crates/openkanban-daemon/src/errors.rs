use std::io;

/// Error taxonomy for the daemon core (§7).
///
/// Each variant's `error_code()` is what a `SESSION_ERROR` frame or a JSON
/// `error` envelope carries back to a client; the taxonomy also drives the
/// policy split in §7: local/recoverable errors are surfaced to the
/// originating client, lifecycle errors are broadcast to every attached
/// subscriber as `EXIT`, and background errors (persistence) are logged and
/// retried rather than propagated.
#[derive(Debug, thiserror::Error)]
pub enum DaemonError {
    #[error("spawn failed: {0}")]
    SpawnFailed(String),

    #[error("session not found: {0}")]
    SessionNotFound(String),

    #[error("session not running: {0}")]
    SessionNotRunning(String),

    #[error("empty session ID")]
    EmptySessionId,

    #[error("pty error: {0}")]
    PtyError(String),

    #[error("config invalid: {0}")]
    ConfigInvalid(String),

    #[error("daemon already running (pid {0})")]
    AlreadyRunning(u32),

    #[error("socket already in use: {0}")]
    SocketInUse(String),

    #[error("shutdown timeout exceeded")]
    ShutdownTimeout,

    /// Board flush failures fall under this variant. Per policy they are
    /// logged and retried on the next mutation, never surfaced to a client.
    #[error("board persistence error: {0}")]
    PersistenceError(String),

    #[error("ticket not found: {0}")]
    TicketNotFound(String),

    /// Ticket delete refused because its worktree has uncommitted changes;
    /// the client must retry with `force: true` (§7 `UNCOMMITTED_CHANGES`).
    #[error("ticket {0} has uncommitted changes in its worktree")]
    UncommittedChanges(String),

    #[error(transparent)]
    Io(#[from] io::Error),

    #[error(transparent)]
    Serde(#[from] serde_json::Error),

    #[error(transparent)]
    Frame(#[from] openkanban_protocol::FrameError),
}

impl DaemonError {
    /// Error code string carried in a `SESSION_ERROR` payload or a JSON
    /// `error` envelope (§7).
    pub fn error_code(&self) -> &'static str {
        match self {
            DaemonError::SpawnFailed(_) => "spawn_failed",
            DaemonError::SessionNotFound(_) => "not_found",
            DaemonError::SessionNotRunning(_) => "not_running",
            DaemonError::EmptySessionId => "empty_session_id",
            DaemonError::PtyError(_) => "pty_error",
            DaemonError::ConfigInvalid(_) => "config_invalid",
            DaemonError::AlreadyRunning(_) => "daemon_already_running",
            DaemonError::SocketInUse(_) => "socket_in_use",
            DaemonError::ShutdownTimeout => "shutdown_timeout",
            DaemonError::PersistenceError(_) => "persistence_error",
            DaemonError::TicketNotFound(_) => "ticket_not_found",
            DaemonError::UncommittedChanges(_) => "uncommitted_changes",
            DaemonError::Io(_) => "io_error",
            DaemonError::Serde(_) => "serialization_error",
            DaemonError::Frame(_) => "frame_error",
        }
    }

    /// Text to send back to the originating client in a `SESSION_ERROR`
    /// frame, matching the exact wording §7 and §8 specify for the two
    /// boundary cases clients are expected to match against.
    pub fn client_message(&self) -> String {
        match self {
            DaemonError::SessionNotFound(id) => format!("session not found: {id}"),
            DaemonError::SessionNotRunning(id) => format!("session not running: {id}"),
            DaemonError::EmptySessionId => "empty session ID".to_string(),
            other => other.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = DaemonError::SessionNotFound("s1".to_string());
        assert_eq!(err.to_string(), "session not found: s1");
        assert_eq!(err.error_code(), "not_found");
    }

    #[test]
    fn test_client_message_matches_spec_wording() {
        assert_eq!(
            DaemonError::SessionNotFound("s1".into()).client_message(),
            "session not found: s1"
        );
        assert_eq!(
            DaemonError::SessionNotRunning("s1".into()).client_message(),
            "session not running: s1"
        );
        assert_eq!(
            DaemonError::EmptySessionId.client_message(),
            "empty session ID"
        );
    }

    #[test]
    fn test_uncommitted_changes_error_code() {
        let err = DaemonError::UncommittedChanges("t1".to_string());
        assert_eq!(err.error_code(), "uncommitted_changes");
        assert!(err.client_message().contains("t1"));
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = io::Error::new(io::ErrorKind::NotFound, "file not found");
        let daemon_err: DaemonError = io_err.into();
        assert_eq!(daemon_err.error_code(), "io_error");
    }
}
