//! Worktree dirty checks for the ticket-delete guard (§7 `UNCOMMITTED_CHANGES`).
//!
//! Narrow on purpose: this daemon doesn't manage worktrees itself (that's a
//! client/agent-runner concern), it only needs to know whether the one a
//! ticket points at is safe to discard.

use std::path::Path;

use git2::Repository;
use tracing::{debug, warn};

/// `Some(true)` if `path` is a git worktree with uncommitted changes
/// (tracked or untracked), `Some(false)` if clean, `None` if the check
/// couldn't be performed (not a repo, path missing, git2 error) — callers
/// treat `None` as "nothing to protect" rather than blocking the delete.
pub fn has_uncommitted_changes(path: &Path) -> Option<bool> {
    let repo = match Repository::open(path) {
        Ok(r) => r,
        Err(e) => {
            debug!(event = "daemon.git.status_repo_open_failed", path = %path.display(), error = %e);
            return None;
        }
    };

    let mut opts = git2::StatusOptions::new();
    opts.include_untracked(true);
    opts.include_ignored(false);
    match repo.statuses(Some(&mut opts)) {
        Ok(statuses) => Some(!statuses.is_empty()),
        Err(e) => {
            warn!(event = "daemon.git.status_check_failed", path = %path.display(), error = %e);
            None
        }
    }
}
