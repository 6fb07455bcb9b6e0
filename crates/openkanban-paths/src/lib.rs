use std::path::{Path, PathBuf};

#[derive(Debug, thiserror::Error)]
pub enum PathError {
    #[error("home directory not found — set $HOME environment variable")]
    HomeNotFound,
    #[error("cache directory not found — set $HOME or $XDG_CACHE_HOME")]
    CacheNotFound,
}

/// Centralized path construction for the `~/.openkanban/` directory layout (§6).
///
/// Single source of truth for every path the daemon reads or writes. Use
/// `resolve()` in production code and `from_dir()` in tests.
#[derive(Debug, Clone)]
pub struct OpenKanbanPaths {
    config_dir: PathBuf,
    /// Base directory for the agent status cache (`~/.cache/openkanban-status/`
    /// by convention, §6). Kept separate from `config_dir` because it follows
    /// `$XDG_CACHE_HOME` rather than the config root.
    status_cache_dir: PathBuf,
}

impl OpenKanbanPaths {
    /// Resolve paths from the user's home/cache directories.
    pub fn resolve() -> Result<Self, PathError> {
        let home = dirs::home_dir().ok_or(PathError::HomeNotFound)?;
        let cache = dirs::cache_dir().ok_or(PathError::CacheNotFound)?;
        Ok(Self {
            config_dir: home.join(".openkanban"),
            status_cache_dir: cache.join("openkanban-status"),
        })
    }

    /// Create paths from an explicit base directory. Use in tests; the
    /// status cache directory is nested under it for isolation.
    pub fn from_dir(config_dir: PathBuf) -> Self {
        let status_cache_dir = config_dir.join("cache").join("openkanban-status");
        Self {
            config_dir,
            status_cache_dir,
        }
    }

    /// The base `~/.openkanban` directory.
    pub fn config_dir(&self) -> &Path {
        &self.config_dir
    }

    pub fn status_cache_dir(&self) -> &Path {
        &self.status_cache_dir
    }

    // --- Rendezvous and lifecycle files ---

    /// The user-private local rendezvous socket (§6). Directory is created
    /// with mode `0700` by the daemon before binding.
    pub fn daemon_socket(&self) -> PathBuf {
        self.config_dir.join("daemon.sock")
    }

    pub fn daemon_pid_file(&self) -> PathBuf {
        self.config_dir.join("daemon.pid")
    }

    pub fn daemon_log_file(&self) -> PathBuf {
        self.config_dir.join("daemon.log")
    }

    // --- Board store ---

    pub fn board_file(&self) -> PathBuf {
        self.config_dir.join("board.json")
    }

    /// Scratch path the board store renames over `board_file()` (§4.6, §7).
    pub fn board_tmp_file(&self) -> PathBuf {
        self.config_dir.join("board.json.tmp")
    }

    // --- Configuration ---

    pub fn user_config(&self) -> PathBuf {
        self.config_dir.join("config.toml")
    }

    // --- Agent status hints ---

    /// `~/.cache/openkanban-status/<session_id>.status` (§6). The agent
    /// process writes a single recognized-vocabulary word here; unrecognized
    /// content maps to `AgentStatus::None`.
    pub fn session_status_file(&self, session_id: &str) -> PathBuf {
        let safe_id = session_id.replace('/', "_");
        self.status_cache_dir.join(format!("{safe_id}.status"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_paths() -> OpenKanbanPaths {
        OpenKanbanPaths::from_dir(PathBuf::from("/home/user/.openkanban"))
    }

    #[test]
    fn test_resolve_returns_ok_when_home_set() {
        let result = OpenKanbanPaths::resolve();
        assert!(result.is_ok());
        let paths = result.unwrap();
        assert!(paths.config_dir().to_string_lossy().contains(".openkanban"));
    }

    #[test]
    fn test_from_dir() {
        let paths = OpenKanbanPaths::from_dir(PathBuf::from("/tmp/test-openkanban"));
        assert_eq!(paths.config_dir(), Path::new("/tmp/test-openkanban"));
    }

    #[test]
    fn test_daemon_socket() {
        assert_eq!(
            test_paths().daemon_socket(),
            PathBuf::from("/home/user/.openkanban/daemon.sock")
        );
    }

    #[test]
    fn test_daemon_pid_file() {
        assert_eq!(
            test_paths().daemon_pid_file(),
            PathBuf::from("/home/user/.openkanban/daemon.pid")
        );
    }

    #[test]
    fn test_daemon_log_file() {
        assert_eq!(
            test_paths().daemon_log_file(),
            PathBuf::from("/home/user/.openkanban/daemon.log")
        );
    }

    #[test]
    fn test_board_file() {
        assert_eq!(
            test_paths().board_file(),
            PathBuf::from("/home/user/.openkanban/board.json")
        );
    }

    #[test]
    fn test_board_tmp_file() {
        assert_eq!(
            test_paths().board_tmp_file(),
            PathBuf::from("/home/user/.openkanban/board.json.tmp")
        );
    }

    #[test]
    fn test_user_config() {
        assert_eq!(
            test_paths().user_config(),
            PathBuf::from("/home/user/.openkanban/config.toml")
        );
    }

    #[test]
    fn test_session_status_file() {
        let paths = OpenKanbanPaths::from_dir(PathBuf::from("/home/user/.openkanban"));
        assert_eq!(
            paths.session_status_file("myapp_feature-auth"),
            paths.status_cache_dir().join("myapp_feature-auth.status")
        );
    }

    #[test]
    fn test_session_status_file_sanitizes_slashes() {
        let paths = test_paths();
        assert_eq!(
            paths.session_status_file("project/branch"),
            paths.status_cache_dir().join("project_branch.status")
        );
    }

    #[test]
    fn test_path_error_messages() {
        assert!(
            PathError::HomeNotFound
                .to_string()
                .contains("home directory")
        );
        assert!(
            PathError::CacheNotFound
                .to_string()
                .contains("cache directory")
        );
    }
}
