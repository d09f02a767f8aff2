//! Tracing setup for the host binary.
//!
//! stdout carries the bridge protocol, so human-readable logs always go to
//! stderr. When [`LoggingConfig::log_dir`] is set, a daily-rolling file
//! named `huddle.YYYY-MM-DD` is written as well and old files beyond
//! [`LoggingConfig::max_files`] are pruned on startup.

use crate::config::LoggingConfig;
use crate::error::{HuddleError, Result};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, fmt};

/// File name prefix of rolled log files.
pub const LOG_FILE_PREFIX: &str = "huddle";

/// Install the global subscriber.
///
/// `RUST_LOG` overrides [`LoggingConfig::level`]. The returned guard flushes
/// the file writer on drop and must be held until shutdown.
///
/// # Errors
///
/// Returns an error if the filter directive is invalid, the log directory
/// cannot be created, or a global subscriber is already installed.
pub fn init_tracing(config: &LoggingConfig) -> Result<Option<WorkerGuard>> {
    let filter = build_filter(&config.level)?;

    let stderr_layer = fmt::layer().with_writer(std::io::stderr).with_target(true);

    let (file_layer, guard) = match &config.log_dir {
        Some(dir) => {
            fs::create_dir_all(dir)?;
            prune_old_logs(dir, config.max_files);
            let appender = tracing_appender::rolling::daily(dir, LOG_FILE_PREFIX);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer().with_writer(writer).with_ansi(false);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(stderr_layer)
        .with(file_layer)
        .try_init()
        .map_err(|e| HuddleError::Config(format!("tracing already initialised: {e}")))?;

    Ok(guard)
}

fn build_filter(default_level: &str) -> Result<EnvFilter> {
    match EnvFilter::try_from_default_env() {
        Ok(filter) => Ok(filter),
        Err(_) => EnvFilter::try_new(default_level)
            .map_err(|e| HuddleError::Config(format!("invalid log level {default_level:?}: {e}"))),
    }
}

/// Remove rolled log files beyond `max_files`, newest kept.
///
/// Best effort: unreadable entries are skipped.
pub fn prune_old_logs(log_dir: &Path, max_files: usize) {
    let mut entries: Vec<(PathBuf, SystemTime)> = match fs::read_dir(log_dir) {
        Ok(dir) => dir
            .flatten()
            .filter_map(|e| {
                let path = e.path();
                let name = path.file_name()?.to_str()?;
                if !name.starts_with(&format!("{LOG_FILE_PREFIX}.")) {
                    return None;
                }
                let mtime = path.metadata().ok()?.modified().ok()?;
                Some((path, mtime))
            })
            .collect(),
        Err(_) => return,
    };

    entries.sort_by(|a, b| b.1.cmp(&a.1));

    for (path, _) in entries.iter().skip(max_files) {
        let _ = fs::remove_file(path);
    }
}
