//! JSON message envelopes for the WebSocket/REST front end (§6).
//!
//! These mirror the same operations as the binary local protocol
//! ([`crate::frame`]) but are tagged, self-describing JSON — the natural
//! shape for a browser client. The HTTP layer adapts between the two; a
//! WebSocket connection is "the same abstract thing" as a Unix-socket
//! client, routed through this adapter into the broker's control-op table.

use serde::{Deserialize, Serialize};

use crate::board::Ticket;
use crate::types::{AgentStatus, SessionId, SessionInfo};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    #[serde(rename = "terminal:subscribe")]
    TerminalSubscribe { session_id: SessionId },

    #[serde(rename = "terminal:unsubscribe")]
    TerminalUnsubscribe { session_id: SessionId },

    #[serde(rename = "terminal:input")]
    TerminalInput {
        session_id: SessionId,
        /// Base64-encoded bytes, since terminal input is not guaranteed UTF-8.
        data: String,
    },

    #[serde(rename = "terminal:resize")]
    TerminalResize {
        session_id: SessionId,
        rows: u16,
        cols: u16,
    },

    #[serde(rename = "agent:spawn")]
    AgentSpawn {
        session_id: SessionId,
        workdir: String,
        command: String,
        #[serde(default)]
        args: Vec<String>,
    },

    #[serde(rename = "agent:kill")]
    AgentKill { session_id: SessionId },

    #[serde(rename = "board:subscribe")]
    BoardSubscribe,

    #[serde(rename = "board:unsubscribe")]
    BoardUnsubscribe,

    #[serde(rename = "ticket:create")]
    TicketCreate { title: String, #[serde(default)] description: String },

    #[serde(rename = "ticket:update")]
    TicketUpdate {
        id: String,
        title: Option<String>,
        description: Option<String>,
    },

    #[serde(rename = "ticket:delete")]
    TicketDelete {
        id: String,
        #[serde(default)]
        force: bool,
    },

    #[serde(rename = "ticket:move")]
    TicketMove {
        id: String,
        status: crate::board::TicketStatus,
    },

    Ping,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    #[serde(rename = "terminal:output")]
    TerminalOutput { session_id: SessionId, data: String },

    #[serde(rename = "terminal:buffer")]
    TerminalBuffer { session_id: SessionId, data: String },

    #[serde(rename = "terminal:exit")]
    TerminalExit {
        session_id: SessionId,
        exit_code: Option<i32>,
    },

    #[serde(rename = "board:state")]
    BoardState { board: crate::board::Board },

    #[serde(rename = "board:patch")]
    BoardPatch { patch: serde_json::Value },

    #[serde(rename = "ticket:created")]
    TicketCreated { ticket: Ticket },

    #[serde(rename = "ticket:updated")]
    TicketUpdated { ticket: Ticket },

    #[serde(rename = "ticket:deleted")]
    TicketDeleted { id: String },

    #[serde(rename = "agent:status")]
    AgentStatusChanged {
        session_id: SessionId,
        status: AgentStatus,
    },

    #[serde(rename = "session:list")]
    SessionList { sessions: Vec<SessionInfo> },

    Error { message: String },

    Pong,
}
