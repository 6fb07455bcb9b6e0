use std::net::SocketAddr;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::errors::DaemonError;

/// Daemon-wide configuration, read from `~/.openkanban/config.toml`'s
/// `[daemon]` section with defaults filling in anything absent (§6, §7 —
/// config loading never fails the daemon, it logs and falls back).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonConfig {
    /// Path to the local rendezvous socket. Default: `~/.openkanban/daemon.sock`.
    #[serde(default = "default_socket_path")]
    pub socket_path: PathBuf,

    /// Path to the PID file. Default: `~/.openkanban/daemon.pid`.
    #[serde(default = "default_pid_path")]
    pub pid_path: PathBuf,

    /// Path the board store persists to. Default: `~/.openkanban/board.json`.
    #[serde(default = "default_board_path")]
    pub board_path: PathBuf,

    /// Per-subscriber bounded send queue depth (§5: "256-1024 frames
    /// recommended"). `DATA` frames are dropped oldest-first on overflow;
    /// other frame types never overflow this queue into a drop.
    #[serde(default = "default_subscriber_queue_depth")]
    pub subscriber_queue_depth: usize,

    /// Board mutation flush debounce interval in milliseconds (§4.6: 500ms
    /// coalescing).
    #[serde(default = "default_board_flush_debounce_ms")]
    pub board_flush_debounce_ms: u64,

    /// Upper bound `t` for `stop_graceful(t)` during shutdown (§4.5: 5s).
    #[serde(default = "default_shutdown_timeout_secs")]
    pub shutdown_timeout_secs: u64,

    /// Optional HTTP/WebSocket bind address. `None` disables that front end.
    /// Overridden by the `PORT` environment variable if set (§6).
    #[serde(default = "default_http_bind")]
    pub http_bind: Option<SocketAddr>,
}

impl DaemonConfig {
    pub fn validate(&self) -> Result<(), DaemonError> {
        if self.subscriber_queue_depth < 64 {
            return Err(DaemonError::ConfigInvalid(
                "subscriber_queue_depth must be >= 64".to_string(),
            ));
        }
        if self.shutdown_timeout_secs == 0 {
            return Err(DaemonError::ConfigInvalid(
                "shutdown_timeout_secs must be > 0".to_string(),
            ));
        }
        if self.board_flush_debounce_ms == 0 {
            return Err(DaemonError::ConfigInvalid(
                "board_flush_debounce_ms must be > 0".to_string(),
            ));
        }
        Ok(())
    }
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            socket_path: default_socket_path(),
            pid_path: default_pid_path(),
            board_path: default_board_path(),
            subscriber_queue_depth: default_subscriber_queue_depth(),
            board_flush_debounce_ms: default_board_flush_debounce_ms(),
            shutdown_timeout_secs: default_shutdown_timeout_secs(),
            http_bind: default_http_bind(),
        }
    }
}

fn resolved_paths() -> openkanban_paths::OpenKanbanPaths {
    openkanban_paths::OpenKanbanPaths::resolve().unwrap_or_else(|e| {
        tracing::warn!(
            event = "daemon.config.paths_resolve_failed",
            error = %e,
            fallback = "/tmp/.openkanban",
        );
        openkanban_paths::OpenKanbanPaths::from_dir(PathBuf::from("/tmp/.openkanban"))
    })
}

fn default_socket_path() -> PathBuf {
    resolved_paths().daemon_socket()
}

fn default_pid_path() -> PathBuf {
    resolved_paths().daemon_pid_file()
}

fn default_board_path() -> PathBuf {
    resolved_paths().board_file()
}

fn default_subscriber_queue_depth() -> usize {
    512
}

fn default_board_flush_debounce_ms() -> u64 {
    500
}

fn default_shutdown_timeout_secs() -> u64 {
    5
}

/// `PORT` is read here rather than left to the config file, matching §6's
/// "environment variables the core consumes" list.
fn default_http_bind() -> Option<SocketAddr> {
    let port: u16 = std::env::var("PORT").ok()?.parse().ok()?;
    Some(SocketAddr::from(([127, 0, 0, 1], port)))
}

/// Wrapper for deserializing just the `[daemon]` section of the user config file.
#[derive(Debug, Deserialize)]
struct ConfigFile {
    #[serde(default)]
    daemon: DaemonConfig,
}

/// Load daemon configuration from `~/.openkanban/config.toml`, falling back
/// to defaults if the file is absent, unparsable, or missing the `[daemon]`
/// section — loading config never aborts daemon startup (§4.6 load
/// philosophy applied here too).
pub fn load_daemon_config() -> Result<DaemonConfig, DaemonError> {
    let config_path = resolved_paths().user_config();

    let config = match std::fs::read_to_string(&config_path) {
        Ok(contents) => match toml::from_str::<ConfigFile>(&contents) {
            Ok(file) => file.daemon,
            Err(e) => {
                tracing::warn!(
                    event = "daemon.config.parse_failed",
                    path = %config_path.display(),
                    error = %e,
                );
                DaemonConfig::default()
            }
        },
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => DaemonConfig::default(),
        Err(e) => {
            tracing::warn!(
                event = "daemon.config.read_failed",
                path = %config_path.display(),
                error = %e,
            );
            DaemonConfig::default()
        }
    };
    config.validate()?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = DaemonConfig::default();
        assert!(config.validate().is_ok());
        assert!(config.socket_path.ends_with("daemon.sock"));
        assert_eq!(config.subscriber_queue_depth, 512);
        assert_eq!(config.board_flush_debounce_ms, 500);
        assert_eq!(config.shutdown_timeout_secs, 5);
    }

    #[test]
    fn test_validate_rejects_tiny_queue_depth() {
        let mut config = DaemonConfig::default();
        config.subscriber_queue_depth = 8;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_zero_shutdown_timeout() {
        let mut config = DaemonConfig::default();
        config.shutdown_timeout_secs = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_from_toml_section() {
        let toml_src = r#"
[daemon]
subscriber_queue_depth = 256
shutdown_timeout_secs = 10
"#;
        let file: ConfigFile = toml::from_str(toml_src).unwrap();
        assert_eq!(file.daemon.subscriber_queue_depth, 256);
        assert_eq!(file.daemon.shutdown_timeout_secs, 10);
        assert_eq!(file.daemon.board_flush_debounce_ms, 500);
    }

    #[test]
    fn test_load_missing_daemon_section_uses_defaults() {
        let toml_src = r#"
[other]
foo = "bar"
"#;
        let file: ConfigFile = toml::from_str(toml_src).unwrap();
        assert_eq!(file.daemon.subscriber_queue_depth, 512);
    }
}
