//! Wire types and framing shared between the daemon and its clients.
//!
//! [`frame`] is the binary length-prefixed protocol for the local
//! rendezvous socket (§4.1). [`ws`] is the JSON envelope used by the
//! WebSocket/REST front end (§6); it mirrors the same operations. [`board`]
//! is the persisted kanban data model (§3, §4.6), and [`types`] holds the
//! small wire-level newtypes and enums shared by both front ends.

pub mod board;
pub mod errors;
pub mod frame;
pub mod types;
pub mod ws;

pub use board::{Board, BoardSettings, Column, Priority, Ticket, TicketStatus};
pub use errors::{FrameError, WsProtocolError};
pub use frame::{Frame, MAX_FRAME_LEN, MessageType, read_frame, write_frame};
pub use types::{AgentStatus, SessionId, SessionInfo, SessionStatus, TicketId};
pub use ws::{ClientMessage, ServerMessage};
