//! Fallback for platforms with no supported service manager (e.g. WSL
//! without systemd, or any other unrecognized OS) — §1's "OS-specific
//! service-manager integration... treated as a thin installer" extends
//! here to "no integration at all, just tell the user how to run it".

use std::path::PathBuf;

use crate::errors::DaemonError;

use super::{ServiceManager, ServiceStatus};

pub struct ManualService;

impl ManualService {
    pub fn new() -> Self {
        Self
    }
}

impl Default for ManualService {
    fn default() -> Self {
        Self::new()
    }
}

impl ServiceManager for ManualService {
    fn install(&self, daemon_binary: &PathBuf) -> Result<(), DaemonError> {
        println!(
            "No supported service manager detected on this platform.\n\
             Start the daemon manually or from your own init system with:\n\
             \n    {} daemon run\n",
            daemon_binary.display()
        );
        Ok(())
    }

    fn uninstall(&self) -> Result<(), DaemonError> {
        Ok(())
    }

    fn start(&self) -> Result<(), DaemonError> {
        Err(DaemonError::SpawnFailed(
            "no service manager available on this platform; run `daemon run` directly".to_string(),
        ))
    }

    fn stop(&self) -> Result<(), DaemonError> {
        Err(DaemonError::SpawnFailed(
            "no service manager available on this platform".to_string(),
        ))
    }

    fn status(&self) -> ServiceStatus {
        ServiceStatus::NotInstalled
    }

    fn is_installed(&self) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manual_service_always_reports_not_installed() {
        let service = ManualService::new();
        assert!(!service.is_installed());
        assert_eq!(service.status(), ServiceStatus::NotInstalled);
    }

    #[test]
    fn test_manual_install_prints_instructions_and_succeeds() {
        let service = ManualService::new();
        assert!(service.install(&PathBuf::from("/usr/local/bin/openkanband")).is_ok());
    }
}
