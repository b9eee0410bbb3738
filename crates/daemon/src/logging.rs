//! Tracing setup for the daemon binary.
//!
//! Logs always go to stderr. When `daemon.log_file` is set they are also
//! written, without ANSI colors, to that file through a non-blocking
//! appender.

use std::path::Path;

use anyhow::{Context, Result};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use crate::config::DaemonConfig;

/// Keeps the file writer flushing. Hold it for the life of the process.
pub struct LoggingGuard {
    _file_guard: Option<WorkerGuard>,
}

/// Build the filter: `RUST_LOG` wins, then `--verbose`, then the config.
pub fn build_filter(verbose: bool, config_level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        let level = if verbose { "debug" } else { config_level };
        EnvFilter::new(level)
    })
}

/// Install the global subscriber.
pub fn init_logging(config: &DaemonConfig, verbose: bool) -> Result<LoggingGuard> {
    let filter = build_filter(verbose, &config.log_level);
    let stderr_layer = tracing_subscriber::fmt::layer().with_writer(std::io::stderr);

    let (file_layer, file_guard) = match &config.log_file {
        Some(path) => {
            let (writer, guard) = file_writer(path)?;
            let layer = tracing_subscriber::fmt::layer()
                .with_writer(writer)
                .with_ansi(false)
                .with_target(true);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(stderr_layer)
        .with(file_layer)
        .try_init()
        .context("Failed to install tracing subscriber")?;

    if let Some(path) = &config.log_file {
        tracing::debug!(log_file = %path.display(), "File logging enabled");
    }

    Ok(LoggingGuard {
        _file_guard: file_guard,
    })
}

fn file_writer(
    path: &Path,
) -> Result<(tracing_appender::non_blocking::NonBlocking, WorkerGuard)> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    let file_name = path
        .file_name()
        .with_context(|| format!("Log file path has no file name: {}", path.display()))?;

    std::fs::create_dir_all(dir)
        .with_context(|| format!("Failed to create log directory: {}", dir.display()))?;

    let appender = tracing_appender::rolling::never(dir, file_name);
    Ok(tracing_appender::non_blocking(appender))
}
