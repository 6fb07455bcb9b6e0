use std::path::PathBuf;
use std::time::{Duration, Instant};

use clap::{Parser, Subcommand};
use tracing::{error, info, warn};

use openkanban_daemon::service::{self, ServiceStatus};
use openkanban_daemon::{DaemonError, load_daemon_config};

#[derive(Parser)]
#[command(name = "openkanband", about = "OpenKanban PTY daemon")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Manage the daemon process and its platform service registration.
    Daemon {
        #[command(subcommand)]
        action: DaemonAction,
    },
}

#[derive(Subcommand)]
enum DaemonAction {
    /// Run the daemon in the foreground until a shutdown signal arrives.
    Run,
    /// Install a platform service unit pointing at this binary.
    Install,
    /// Remove the platform service unit, if any.
    Uninstall,
    /// Start the installed service (or spawn it detached if none is installed).
    Start,
    /// Stop the running daemon, however it was started.
    Stop,
    /// Report whether the daemon is running.
    Status {
        #[arg(long)]
        json: bool,
    },
}

fn main() {
    let cli = Cli::parse();
    let paths = resolved_paths();
    let _logging_guard = openkanban_daemon::logging::init_logging(
        &paths.daemon_log_file(),
        matches!(cli.command, Commands::Daemon { action: DaemonAction::Run }),
    );

    let exit_code = match cli.command {
        Commands::Daemon { action } => match action {
            DaemonAction::Run => run_foreground(),
            DaemonAction::Install => install(),
            DaemonAction::Uninstall => uninstall(),
            DaemonAction::Start => start(),
            DaemonAction::Stop => stop(),
            DaemonAction::Status { json } => status(json),
        },
    };
    std::process::exit(exit_code);
}

fn resolved_paths() -> openkanban_paths::OpenKanbanPaths {
    openkanban_paths::OpenKanbanPaths::resolve()
        .unwrap_or_else(|_| openkanban_paths::OpenKanbanPaths::from_dir(PathBuf::from("/tmp/.openkanban")))
}

/// `daemon run` (§6): 0 on clean shutdown, 1 if another daemon already owns
/// the rendezvous socket.
fn run_foreground() -> i32 {
    info!(event = "daemon.cli.run_started", pid = std::process::id());
    eprintln!("Starting openkanband in foreground (PID: {})...", std::process::id());

    let config = match load_daemon_config() {
        Ok(c) => c,
        Err(e) => {
            error!(event = "daemon.cli.config_load_failed", error = %e);
            eprintln!("openkanband: {e}");
            return 1;
        }
    };

    let rt = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            error!(event = "daemon.cli.runtime_init_failed", error = %e);
            eprintln!("openkanband: failed to start async runtime: {e}");
            return 1;
        }
    };

    match rt.block_on(openkanban_daemon::run_server(config)) {
        Ok(()) => {
            info!(event = "daemon.cli.run_completed");
            0
        }
        Err(DaemonError::AlreadyRunning(pid)) => {
            eprintln!("openkanband: another daemon is already running (PID {pid})");
            1
        }
        Err(DaemonError::SocketInUse(path)) => {
            eprintln!("openkanband: rendezvous socket already in use: {path}");
            1
        }
        Err(e) => {
            error!(event = "daemon.cli.run_failed", error = %e);
            eprintln!("openkanband: {e}");
            1
        }
    }
}

fn current_daemon_binary() -> PathBuf {
    std::env::current_exe().unwrap_or_else(|_| PathBuf::from("openkanband"))
}

fn install() -> i32 {
    let manager = service::service_manager();
    match manager.install(&current_daemon_binary()) {
        Ok(()) => {
            println!("Service installed.");
            0
        }
        Err(e) => {
            eprintln!("openkanband: install failed: {e}");
            1
        }
    }
}

fn uninstall() -> i32 {
    let manager = service::service_manager();
    match manager.uninstall() {
        Ok(()) => {
            println!("Service uninstalled.");
            0
        }
        Err(e) => {
            eprintln!("openkanband: uninstall failed: {e}");
            1
        }
    }
}

/// `daemon start` (§6): prefer the platform service if installed; otherwise
/// spawn the daemon detached and poll for the rendezvous socket to appear,
/// the same readiness pattern the monolithic CLI uses for its own daemon.
fn start() -> i32 {
    let manager = service::service_manager();
    if manager.is_installed() {
        return match manager.start() {
            Ok(()) => {
                println!("Daemon started.");
                0
            }
            Err(e) => {
                eprintln!("openkanband: start failed: {e}");
                1
            }
        };
    }

    let paths = resolved_paths();
    if pid_file_shows_running(&paths.daemon_pid_file()) {
        println!("Daemon already running.");
        return 0;
    }

    let binary = current_daemon_binary();
    let mut child = match std::process::Command::new(&binary)
        .args(["daemon", "run"])
        .stdout(std::process::Stdio::null())
        .stderr(std::process::Stdio::null())
        .stdin(std::process::Stdio::null())
        .spawn()
    {
        Ok(child) => child,
        Err(e) => {
            eprintln!("openkanband: failed to spawn daemon: {e}");
            return 1;
        }
    };

    let socket_path = paths.daemon_socket();
    let deadline = Instant::now() + Duration::from_secs(5);
    loop {
        if let Ok(Some(status)) = child.try_wait() {
            eprintln!("openkanband: daemon exited with {status} before becoming ready");
            return 1;
        }
        if socket_path.exists() {
            break;
        }
        if Instant::now() > deadline {
            eprintln!("openkanband: daemon socket not available after 5s");
            return 1;
        }
        std::thread::sleep(Duration::from_millis(100));
    }

    println!("Daemon started (PID: {}).", child.id());
    0
}

/// `daemon stop` (§6): send SIGTERM and poll for the PID file's removal,
/// which `run_server`'s own shutdown sequence unlinks (§4.5 step e).
fn stop() -> i32 {
    let manager = service::service_manager();
    if manager.is_installed() {
        return match manager.stop() {
            Ok(()) => {
                println!("Daemon stopped.");
                0
            }
            Err(e) => {
                eprintln!("openkanband: stop failed: {e}");
                1
            }
        };
    }

    let paths = resolved_paths();
    let pid_path = paths.daemon_pid_file();
    let Some(pid) = openkanban_daemon::pid::read_pid_file(&pid_path) else {
        println!("Daemon is not running.");
        return 0;
    };

    if let Err(e) = send_sigterm(pid) {
        warn!(event = "daemon.cli.stop_signal_failed", pid = pid, error = %e);
    }

    let deadline = Instant::now() + Duration::from_secs(5);
    while pid_path.exists() {
        if Instant::now() > deadline {
            eprintln!("openkanband: daemon did not stop gracefully after 5s");
            return 1;
        }
        std::thread::sleep(Duration::from_millis(100));
    }
    println!("Daemon stopped.");
    0
}

/// `daemon status` (§6): always exits 0, prints
/// `running|stopped|not installed|unknown`.
fn status(json: bool) -> i32 {
    let manager = service::service_manager();
    let service_status = if manager.is_installed() {
        manager.status()
    } else {
        let paths = resolved_paths();
        if pid_file_shows_running(&paths.daemon_pid_file()) {
            ServiceStatus::Running
        } else {
            ServiceStatus::Stopped
        }
    };

    if json {
        println!(
            "{}",
            serde_json::json!({ "status": service_status.as_str() })
        );
    } else {
        println!("Daemon: {}", service_status.as_str());
    }
    0
}

fn pid_file_shows_running(pid_path: &std::path::Path) -> bool {
    openkanban_daemon::pid::check_daemon_running(pid_path).is_some()
}

#[cfg(unix)]
fn send_sigterm(pid: u32) -> Result<(), DaemonError> {
    use nix::sys::signal::{self, Signal};
    use nix::unistd::Pid;
    match signal::kill(Pid::from_raw(pid as i32), Signal::SIGTERM) {
        Ok(()) => Ok(()),
        Err(nix::errno::Errno::ESRCH) => Ok(()),
        Err(e) => Err(DaemonError::PtyError(format!("sigterm: {e}"))),
    }
}

#[cfg(not(unix))]
fn send_sigterm(_pid: u32) -> Result<(), DaemonError> {
    Ok(())
}
