//! macOS launchd user-agent installer (§6, §9).

use std::path::{Path, PathBuf};
use std::process::Command;

use tracing::{info, warn};

use super::{ServiceManager, ServiceStatus};
use crate::errors::DaemonError;

const LABEL: &str = "com.openkanban.daemon";

pub struct LaunchdService {
    plist_dir: PathBuf,
}

impl LaunchdService {
    pub fn new() -> Self {
        let home = dirs::home_dir().unwrap_or_else(|| PathBuf::from("."));
        Self {
            plist_dir: home.join("Library").join("LaunchAgents"),
        }
    }

    fn plist_path(&self) -> PathBuf {
        self.plist_dir.join(format!("{LABEL}.plist"))
    }

    fn plist_contents(daemon_binary: &Path) -> String {
        format!(
            "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n\
             <!DOCTYPE plist PUBLIC \"-//Apple//DTD PLIST 1.0//EN\" \"http://www.apple.com/DTDs/PropertyList-1.0.dtd\">\n\
             <plist version=\"1.0\">\n\
             <dict>\n\
             \t<key>Label</key>\n\
             \t<string>{LABEL}</string>\n\
             \t<key>ProgramArguments</key>\n\
             \t<array>\n\
             \t\t<string>{}</string>\n\
             \t\t<string>daemon</string>\n\
             \t\t<string>run</string>\n\
             \t</array>\n\
             \t<key>RunAtLoad</key>\n\
             \t<true/>\n\
             \t<key>KeepAlive</key>\n\
             \t<dict>\n\
             \t\t<key>SuccessfulExit</key>\n\
             \t\t<false/>\n\
             \t</dict>\n\
             </dict>\n\
             </plist>\n",
            daemon_binary.display(),
        )
    }

    fn launchctl(&self, args: &[&str]) -> Result<std::process::Output, DaemonError> {
        Command::new("launchctl")
            .args(args)
            .output()
            .map_err(|e| DaemonError::SpawnFailed(format!("launchctl {args:?}: {e}")))
    }
}

impl Default for LaunchdService {
    fn default() -> Self {
        Self::new()
    }
}

impl ServiceManager for LaunchdService {
    fn install(&self, daemon_binary: &PathBuf) -> Result<(), DaemonError> {
        std::fs::create_dir_all(&self.plist_dir)?;
        std::fs::write(self.plist_path(), Self::plist_contents(daemon_binary))?;
        self.launchctl(&["load", "-w", &self.plist_path().display().to_string()])?;
        info!(event = "daemon.service.launchd_installed", plist = %self.plist_path().display());
        Ok(())
    }

    fn uninstall(&self) -> Result<(), DaemonError> {
        let _ = self.launchctl(&["unload", "-w", &self.plist_path().display().to_string()]);
        match std::fs::remove_file(self.plist_path()) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(DaemonError::Io(e)),
        }
        info!(event = "daemon.service.launchd_uninstalled");
        Ok(())
    }

    fn start(&self) -> Result<(), DaemonError> {
        let output = self.launchctl(&["start", LABEL])?;
        if !output.status.success() {
            warn!(event = "daemon.service.launchd_start_failed", stderr = %String::from_utf8_lossy(&output.stderr));
            return Err(DaemonError::SpawnFailed(
                String::from_utf8_lossy(&output.stderr).into_owned(),
            ));
        }
        Ok(())
    }

    fn stop(&self) -> Result<(), DaemonError> {
        let output = self.launchctl(&["stop", LABEL])?;
        if !output.status.success() {
            warn!(event = "daemon.service.launchd_stop_failed", stderr = %String::from_utf8_lossy(&output.stderr));
        }
        Ok(())
    }

    fn status(&self) -> ServiceStatus {
        if !self.is_installed() {
            return ServiceStatus::NotInstalled;
        }
        match self.launchctl(&["list", LABEL]) {
            Ok(output) if output.status.success() => ServiceStatus::Running,
            Ok(_) => ServiceStatus::Stopped,
            Err(_) => ServiceStatus::Unknown,
        }
    }

    fn is_installed(&self) -> bool {
        self.plist_path().exists()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plist_contents_references_daemon_run() {
        let contents = LaunchdService::plist_contents(Path::new("/usr/local/bin/openkanband"));
        assert!(contents.contains("<string>/usr/local/bin/openkanband</string>"));
        assert!(contents.contains("<string>daemon</string>"));
        assert!(contents.contains("<string>run</string>"));
        assert!(contents.contains(LABEL));
    }

    #[test]
    fn test_not_installed_when_plist_absent() {
        let mut service = LaunchdService::new();
        service.plist_dir = std::env::temp_dir().join("openkanban_test_launchd_nonexistent");
        assert!(!service.is_installed());
        assert_eq!(service.status(), ServiceStatus::NotInstalled);
    }
}
