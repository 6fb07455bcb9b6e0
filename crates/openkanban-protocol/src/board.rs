//! Board/ticket data model persisted to `board.json` (§3, §4.6).

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::AgentStatus;

/// Column a ticket currently sits in. Order within a column is insertion
/// order; column order itself is fixed (`Backlog`, `InProgress`, `Done`,
/// `Archived`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TicketStatus {
    Backlog,
    InProgress,
    Done,
    Archived,
}

impl TicketStatus {
    pub const ALL: [TicketStatus; 4] = [
        TicketStatus::Backlog,
        TicketStatus::InProgress,
        TicketStatus::Done,
        TicketStatus::Archived,
    ];

    pub fn column_id(self) -> &'static str {
        match self {
            TicketStatus::Backlog => "backlog",
            TicketStatus::InProgress => "in_progress",
            TicketStatus::Done => "done",
            TicketStatus::Archived => "archived",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    Medium,
    High,
}

impl Default for Priority {
    fn default() -> Self {
        Priority::Medium
    }
}

/// A single unit of work tracked on the board.
///
/// Timestamps only ever move forward: `started_at` is set the first time a
/// ticket transitions into `InProgress` and never overwritten afterward;
/// `completed_at` behaves the same way for `Done` (§3, §8).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Ticket {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub status: TicketStatus,
    #[serde(default)]
    pub agent_status: AgentStatus,
    #[serde(default)]
    pub priority: Priority,
    #[serde(default)]
    pub labels: Vec<String>,
    pub worktree_path: Option<String>,
    pub branch_name: Option<String>,
    pub base_branch: Option<String>,
    pub agent_type: Option<String>,
    pub terminal_session_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    /// Opaque, arbitrary metadata a client attached; preserved byte-for-byte
    /// across load/save even if this daemon version doesn't understand it.
    #[serde(default)]
    pub meta: serde_json::Map<String, serde_json::Value>,
}

impl Ticket {
    pub fn new(id: String, title: String, now: DateTime<Utc>) -> Self {
        Self {
            id,
            title,
            description: String::new(),
            status: TicketStatus::Backlog,
            agent_status: AgentStatus::None,
            priority: Priority::default(),
            labels: Vec::new(),
            worktree_path: None,
            branch_name: None,
            base_branch: None,
            agent_type: None,
            terminal_session_id: None,
            created_at: now,
            updated_at: now,
            started_at: None,
            completed_at: None,
            meta: serde_json::Map::new(),
        }
    }

    /// Move this ticket to `status`, stamping `started_at`/`completed_at`
    /// the first time it enters `InProgress`/`Done` respectively. No-op
    /// (but still bumps `updated_at`) if already in `status`.
    pub fn move_to(&mut self, status: TicketStatus, now: DateTime<Utc>) {
        self.status = status;
        match status {
            TicketStatus::InProgress if self.started_at.is_none() => {
                self.started_at = Some(now);
            }
            TicketStatus::Done if self.completed_at.is_none() => {
                self.completed_at = Some(now);
            }
            _ => {}
        }
        self.updated_at = now;
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BoardSettings {
    #[serde(default = "default_wip_limit")]
    pub wip_limit: Option<u32>,
    #[serde(default)]
    pub default_base_branch: Option<String>,
    #[serde(default)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

fn default_wip_limit() -> Option<u32> {
    None
}

impl Default for BoardSettings {
    fn default() -> Self {
        Self {
            wip_limit: None,
            default_base_branch: None,
            extra: serde_json::Map::new(),
        }
    }
}

/// A column as persisted (id + display title); tickets reference columns
/// by `TicketStatus`, this just carries column metadata/ordering.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Column {
    pub id: String,
    pub title: String,
}

fn default_columns() -> Vec<Column> {
    vec![
        Column {
            id: "backlog".to_string(),
            title: "Backlog".to_string(),
        },
        Column {
            id: "in_progress".to_string(),
            title: "In Progress".to_string(),
        },
        Column {
            id: "done".to_string(),
            title: "Done".to_string(),
        },
        Column {
            id: "archived".to_string(),
            title: "Archived".to_string(),
        },
    ]
}

/// The full board: columns, tickets keyed by id, and settings. This is the
/// exact in-memory shape serialized to `board.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Board {
    #[serde(default = "default_columns")]
    pub columns: Vec<Column>,
    #[serde(default)]
    pub tickets: BTreeMap<String, Ticket>,
    #[serde(default)]
    pub settings: BoardSettings,
}

impl Default for Board {
    fn default() -> Self {
        Self {
            columns: default_columns(),
            tickets: BTreeMap::new(),
            settings: BoardSettings::default(),
        }
    }
}

impl Board {
    /// Tickets in a given column, in insertion order (BTreeMap keys on
    /// ticket id, which we mint as time-ordered UUIDs, so this preserves
    /// creation order within the column).
    pub fn tickets_in(&self, status: TicketStatus) -> Vec<&Ticket> {
        self.tickets
            .values()
            .filter(|t| t.status == status)
            .collect()
    }
}
