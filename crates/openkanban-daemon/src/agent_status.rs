//! Background poller for `~/.cache/openkanban-status/<session_id>.status`
//! files, republishing `agent_status` changes onto the board (§6, §9).

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::board::BoardStore;
use openkanban_protocol::AgentStatus;
use openkanban_paths::OpenKanbanPaths;

const POLL_INTERVAL: Duration = Duration::from_millis(1000);

/// Runs until `cancel` fires: each tick, reads every ticket with a live
/// `terminal_session_id`'s status file and pushes the parsed value through
/// [`BoardStore::set_agent_status`], which itself no-ops when unchanged.
pub async fn run_agent_status_poller(board: Arc<BoardStore>, paths: OpenKanbanPaths, cancel: CancellationToken) {
    loop {
        tokio::select! {
            _ = tokio::time::sleep(POLL_INTERVAL) => {}
            _ = cancel.cancelled() => break,
        }

        for (ticket_id, session_id) in board.tickets_with_session().await {
            let status = read_status_file(&paths, &session_id);
            if let Err(e) = board.set_agent_status(&ticket_id, status).await {
                // The ticket could have been deleted between the listing
                // and this update; that's expected under concurrent edits.
                debug!(event = "daemon.agent_status.update_skipped", ticket_id = %ticket_id, error = %e);
            }
        }
    }
    debug!(event = "daemon.agent_status.poller_stopped");
}

fn read_status_file(paths: &OpenKanbanPaths, session_id: &str) -> AgentStatus {
    let path = paths.session_status_file(session_id);
    match std::fs::read_to_string(&path) {
        Ok(raw) => AgentStatus::from_raw(&raw),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => AgentStatus::None,
        Err(e) => {
            warn!(event = "daemon.agent_status.read_failed", path = %path.display(), error = %e);
            AgentStatus::None
        }
    }
}
