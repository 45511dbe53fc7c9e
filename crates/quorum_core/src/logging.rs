use anyhow::Result;
use std::path::Path;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use crate::config::QuorumConfig;

/// Prefix of the daily-rotated log files.
const LOG_FILE_PREFIX: &str = "quorum";

/// Initializes file + stderr logging under `~/.quorum/logs`.
/// Returns a guard that must be kept alive for the duration of the process.
///
/// `RUST_LOG` overrides `default_filter` when set.
pub fn init_logging(default_filter: &str) -> Result<WorkerGuard> {
    let logs_dir = QuorumConfig::logs_dir()?;
    init_logging_with(&logs_dir, default_filter, true)
}

/// Initialize file-only logging in a custom directory.
/// Useful for tests or embedded use where `~/.quorum/logs` is not desired.
pub fn init_logging_to_dir(logs_dir: &Path, filter: &str) -> Result<WorkerGuard> {
    init_logging_with(logs_dir, filter, false)
}

fn init_logging_with(logs_dir: &Path, filter: &str, console: bool) -> Result<WorkerGuard> {
    std::fs::create_dir_all(logs_dir)?;

    let file_appender = tracing_appender::rolling::daily(logs_dir, LOG_FILE_PREFIX);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    // stdout carries command output, so the console layer writes to stderr.
    let console_layer = console.then(|| {
        fmt::layer()
            .with_target(false)
            .with_writer(std::io::stderr)
            .compact()
    });

    tracing_subscriber::registry()
        .with(env_filter)
        .with(
            fmt::layer()
                .with_target(true)
                .with_thread_ids(false)
                .with_ansi(false)
                .with_writer(non_blocking),
        )
        .with(console_layer)
        .try_init()
        .map_err(|e| anyhow::anyhow!("Failed to initialize logging: {e}"))?;

    Ok(guard)
}
