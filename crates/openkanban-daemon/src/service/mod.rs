//! Platform service-manager integration: a thin installer around the
//! `daemon run` binary (§6, §9 "model platform service managers as a small
//! capability set with a factory").
//!
//! This is deliberately shallow: the daemon itself knows nothing about
//! systemd/launchd, it just needs to be invoked as `openkanband daemon run`
//! by whatever init system the OS prefers.

mod launchd;
mod manual;
mod systemd;

use std::path::PathBuf;

use crate::errors::DaemonError;

/// One recognized state a service can be in, as reported by `status`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceStatus {
    Running,
    Stopped,
    NotInstalled,
    Unknown,
}

impl ServiceStatus {
    /// Matches §6's CLI surface: `status` prints one of
    /// `running|stopped|not installed|unknown`.
    pub fn as_str(self) -> &'static str {
        match self {
            ServiceStatus::Running => "running",
            ServiceStatus::Stopped => "stopped",
            ServiceStatus::NotInstalled => "not installed",
            ServiceStatus::Unknown => "unknown",
        }
    }
}

/// The capability set every platform installer implements (§9 Design Notes).
/// No method here ever fails the daemon process itself — installer errors
/// are reported back to the CLI caller, never escalated into a daemon
/// lifecycle event.
pub trait ServiceManager {
    /// Write whatever unit/plist/script the platform needs and register it
    /// with the platform's service manager, pointing at `daemon_binary`.
    fn install(&self, daemon_binary: &PathBuf) -> Result<(), DaemonError>;
    fn uninstall(&self) -> Result<(), DaemonError>;
    fn start(&self) -> Result<(), DaemonError>;
    fn stop(&self) -> Result<(), DaemonError>;
    fn status(&self) -> ServiceStatus;
    fn is_installed(&self) -> bool;
}

/// Pick the platform-appropriate implementation (§9's explicit instruction:
/// "a factory that picks the implementation from OS detection").
pub fn service_manager() -> Box<dyn ServiceManager> {
    if cfg!(target_os = "linux") {
        Box::new(systemd::SystemdUserService::new())
    } else if cfg!(target_os = "macos") {
        Box::new(launchd::LaunchdService::new())
    } else {
        Box::new(manual::ManualService::new())
    }
}
