use serde::{Deserialize, Serialize};

/// Generate a newtype wrapper around `String` with standard trait impls.
///
/// Each generated type gets: `Debug`, `Clone`, `PartialEq`, `Eq`, `Hash`,
/// `Serialize`/`Deserialize` (transparent), `Display`, `Deref<Target=str>`,
/// `AsRef<str>`, `Borrow<str>`, `From<String>`, `From<&str>`.
macro_rules! newtype_string {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            pub fn new(s: impl Into<String>) -> Self {
                Self(s.into())
            }

            pub fn into_inner(self) -> String {
                self.0
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                self.0.fmt(f)
            }
        }

        impl std::ops::Deref for $name {
            type Target = str;
            fn deref(&self) -> &str {
                &self.0
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }

        impl std::borrow::Borrow<str> for $name {
            fn borrow(&self) -> &str {
                &self.0
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_string())
            }
        }
    };
}

newtype_string! {
    /// Caller-chosen, registry-unique identifier for a session (e.g. `"myapp_feature-auth"`).
    SessionId
}

newtype_string! {
    /// Stable identifier for a ticket (a UUID string).
    TicketId
}

/// Lifecycle state of a session, as observed by the registry.
///
/// Mirrors the state machine in the daemon's session module: `New` is never
/// externally visible (sessions are inserted already `Running` or not at
/// all), so the wire enum only distinguishes the two durable states plus
/// the in-between `draining` used while a graceful stop is underway.
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Running,
    Draining,
    Exited,
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionStatus::Running => write!(f, "running"),
            SessionStatus::Draining => write!(f, "draining"),
            SessionStatus::Exited => write!(f, "exited"),
        }
    }
}

/// Summary of a session as returned over the wire (`LIST_RESPONSE`, REST, WS).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionInfo {
    pub id: SessionId,
    pub command: String,
    pub args: Vec<String>,
    pub workdir: String,
    pub status: SessionStatus,
    pub rows: u16,
    pub cols: u16,
    pub created_at: String,
    pub client_count: usize,
    pub pty_pid: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
}

/// Status hint written by an agent process into its `.status` sidecar file.
///
/// Unrecognized strings (or a missing file) map to [`AgentStatus::None`] —
/// see `agent_status::read_agent_status`.
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentStatus {
    None,
    Idle,
    Working,
    Waiting,
    Completed,
    Error,
}

impl AgentStatus {
    /// Parse a raw status-file string into the closed vocabulary.
    ///
    /// `permission` and `done` are conventions some agents use in place of
    /// `waiting`/`completed`; everything else unrecognized collapses to `None`
    /// rather than being propagated, per the daemon's "unrecognized -> none" rule.
    pub fn from_raw(raw: &str) -> Self {
        match raw.trim() {
            "idle" => AgentStatus::Idle,
            "working" => AgentStatus::Working,
            "waiting" | "permission" => AgentStatus::Waiting,
            "completed" | "done" => AgentStatus::Completed,
            "error" => AgentStatus::Error,
            _ => AgentStatus::None,
        }
    }
}

impl std::fmt::Display for AgentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AgentStatus::None => write!(f, "none"),
            AgentStatus::Idle => write!(f, "idle"),
            AgentStatus::Working => write!(f, "working"),
            AgentStatus::Waiting => write!(f, "waiting"),
            AgentStatus::Completed => write!(f, "completed"),
            AgentStatus::Error => write!(f, "error"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_info_serde() {
        let info = SessionInfo {
            id: SessionId::new("myapp_feature-auth"),
            command: "claude".to_string(),
            args: vec![],
            workdir: "/tmp/wt".to_string(),
            status: SessionStatus::Running,
            rows: 24,
            cols: 80,
            created_at: "2026-02-09T14:30:00Z".to_string(),
            client_count: 2,
            pty_pid: Some(12345),
            exit_code: None,
        };
        let json = serde_json::to_string(&info).unwrap();
        assert!(json.contains(r#""status":"running""#));
        assert!(!json.contains("exit_code"));
        let parsed: SessionInfo = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.id, info.id);
        assert_eq!(parsed.client_count, 2);
    }

    #[test]
    fn test_session_status_display() {
        assert_eq!(SessionStatus::Running.to_string(), "running");
        assert_eq!(SessionStatus::Draining.to_string(), "draining");
        assert_eq!(SessionStatus::Exited.to_string(), "exited");
    }

    #[test]
    fn test_agent_status_from_raw_known() {
        assert_eq!(AgentStatus::from_raw("working"), AgentStatus::Working);
        assert_eq!(AgentStatus::from_raw("done"), AgentStatus::Completed);
        assert_eq!(AgentStatus::from_raw("permission"), AgentStatus::Waiting);
        assert_eq!(AgentStatus::from_raw(" idle \n"), AgentStatus::Idle);
    }

    #[test]
    fn test_agent_status_from_raw_unrecognized_is_none() {
        assert_eq!(AgentStatus::from_raw("banana"), AgentStatus::None);
        assert_eq!(AgentStatus::from_raw(""), AgentStatus::None);
    }

    #[test]
    fn test_session_id_newtype_roundtrip() {
        let id = SessionId::new("s1");
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, r#""s1""#);
        let parsed: SessionId = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, id);
    }
}
