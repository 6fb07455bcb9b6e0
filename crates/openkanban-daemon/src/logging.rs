//! Tracing setup for the daemon binary (§2 ambient "Logging" component).
//!
//! JSON events go to `~/.openkanban/daemon.log` (append-only, §6) via a
//! non-blocking writer so a slow disk never stalls the async runtime; a
//! human-readable copy also goes to stderr when running in the foreground
//! so `daemon run` is legible at a terminal. `RUST_LOG` controls verbosity
//! through the usual `tracing-subscriber` `EnvFilter`, defaulting to `info`.

use std::path::Path;

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, fmt};

/// Must be kept alive for the lifetime of the process — dropping it flushes
/// and closes the non-blocking file appender.
pub struct LoggingGuard {
    _file_guard: tracing_appender::non_blocking::WorkerGuard,
}

pub fn init_logging(log_file: &Path, foreground: bool) -> LoggingGuard {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let file_appender = log_file
        .parent()
        .map(|dir| {
            std::fs::create_dir_all(dir).ok();
            tracing_appender::rolling::never(
                dir,
                log_file.file_name().unwrap_or_else(|| log_file.as_os_str()),
            )
        })
        .unwrap_or_else(|| tracing_appender::rolling::never(".", "daemon.log"));
    let (non_blocking, file_guard) = tracing_appender::non_blocking(file_appender);

    let file_layer = fmt::layer().json().with_writer(non_blocking).with_ansi(false);

    let registry = tracing_subscriber::registry().with(env_filter).with(file_layer);

    if foreground {
        registry.with(fmt::layer().with_writer(std::io::stderr)).init();
    } else {
        registry.init();
    }

    LoggingGuard { _file_guard: file_guard }
}
