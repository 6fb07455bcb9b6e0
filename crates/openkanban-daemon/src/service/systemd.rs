//! Linux systemd user-unit installer (§6, §9).
//!
//! Grounded on the general shape of a systemd unit targeting a user-level
//! socket-activated daemon (cf. `shell-pool-shpool`'s
//! `daemon/systemd.rs::activation_socket`, which assumes the unit already
//! exists and focuses on consuming `LISTEN_FDS`); this module is the other
//! half — generating and registering that unit in the first place. This
//! daemon binds its own socket directly rather than relying on systemd
//! socket activation, so the unit is a plain `Type=simple` service.

use std::path::{Path, PathBuf};
use std::process::Command;

use tracing::{info, warn};

use super::{ServiceManager, ServiceStatus};
use crate::errors::DaemonError;

const UNIT_NAME: &str = "openkanban.service";

pub struct SystemdUserService {
    unit_dir: PathBuf,
}

impl SystemdUserService {
    pub fn new() -> Self {
        let config_home = std::env::var_os("XDG_CONFIG_HOME")
            .map(PathBuf::from)
            .or_else(|| dirs::home_dir().map(|h| h.join(".config")))
            .unwrap_or_else(|| PathBuf::from(".config"));
        Self {
            unit_dir: config_home.join("systemd").join("user"),
        }
    }

    fn unit_path(&self) -> PathBuf {
        self.unit_dir.join(UNIT_NAME)
    }

    fn systemctl(&self, args: &[&str]) -> Result<std::process::Output, DaemonError> {
        Command::new("systemctl")
            .arg("--user")
            .args(args)
            .output()
            .map_err(|e| DaemonError::SpawnFailed(format!("systemctl {args:?}: {e}")))
    }

    fn unit_contents(daemon_binary: &Path) -> String {
        format!(
            "[Unit]\n\
             Description=OpenKanban PTY daemon\n\
             After=network.target\n\
             \n\
             [Service]\n\
             Type=simple\n\
             ExecStart={} daemon run\n\
             Restart=on-failure\n\
             RestartSec=1\n\
             \n\
             [Install]\n\
             WantedBy=default.target\n",
            daemon_binary.display()
        )
    }
}

impl Default for SystemdUserService {
    fn default() -> Self {
        Self::new()
    }
}

impl ServiceManager for SystemdUserService {
    fn install(&self, daemon_binary: &PathBuf) -> Result<(), DaemonError> {
        std::fs::create_dir_all(&self.unit_dir)?;
        std::fs::write(self.unit_path(), Self::unit_contents(daemon_binary))?;
        self.systemctl(&["daemon-reload"])?;
        self.systemctl(&["enable", UNIT_NAME])?;
        info!(event = "daemon.service.systemd_installed", unit = %self.unit_path().display());
        Ok(())
    }

    fn uninstall(&self) -> Result<(), DaemonError> {
        let _ = self.systemctl(&["disable", "--now", UNIT_NAME]);
        match std::fs::remove_file(self.unit_path()) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(DaemonError::Io(e)),
        }
        let _ = self.systemctl(&["daemon-reload"]);
        info!(event = "daemon.service.systemd_uninstalled");
        Ok(())
    }

    fn start(&self) -> Result<(), DaemonError> {
        let output = self.systemctl(&["start", UNIT_NAME])?;
        if !output.status.success() {
            warn!(event = "daemon.service.systemd_start_failed", stderr = %String::from_utf8_lossy(&output.stderr));
            return Err(DaemonError::SpawnFailed(
                String::from_utf8_lossy(&output.stderr).into_owned(),
            ));
        }
        Ok(())
    }

    fn stop(&self) -> Result<(), DaemonError> {
        let output = self.systemctl(&["stop", UNIT_NAME])?;
        if !output.status.success() {
            warn!(event = "daemon.service.systemd_stop_failed", stderr = %String::from_utf8_lossy(&output.stderr));
        }
        Ok(())
    }

    fn status(&self) -> ServiceStatus {
        if !self.is_installed() {
            return ServiceStatus::NotInstalled;
        }
        match self.systemctl(&["is-active", UNIT_NAME]) {
            Ok(output) => match String::from_utf8_lossy(&output.stdout).trim() {
                "active" => ServiceStatus::Running,
                "inactive" | "failed" => ServiceStatus::Stopped,
                _ => ServiceStatus::Unknown,
            },
            Err(_) => ServiceStatus::Unknown,
        }
    }

    fn is_installed(&self) -> bool {
        self.unit_path().exists()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unit_contents_references_daemon_run() {
        let contents = SystemdUserService::unit_contents(Path::new("/usr/local/bin/openkanband"));
        assert!(contents.contains("ExecStart=/usr/local/bin/openkanband daemon run"));
        assert!(contents.contains("[Unit]"));
        assert!(contents.contains("[Service]"));
        assert!(contents.contains("[Install]"));
    }

    #[test]
    fn test_not_installed_when_unit_file_absent() {
        let mut service = SystemdUserService::new();
        service.unit_dir = std::env::temp_dir().join("openkanban_test_systemd_nonexistent");
        assert!(!service.is_installed());
        assert_eq!(service.status(), ServiceStatus::NotInstalled);
    }
}
