//! Log output for binaries and tests.
//!
//! The library itself only emits `tracing` events. A caller that wants to
//! see them builds a [`LogConfig`] and calls [`install`]; the subscriber
//! stays active for the current thread until the returned guard drops.

use crate::error::StorageError;
use std::fs::{File, OpenOptions};
use std::path::PathBuf;
use std::sync::Mutex;
use tracing::subscriber::DefaultGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::{fmt, EnvFilter};

/// Environment variable overriding the configured filter.
pub const LOG_ENV: &str = "CONTINUITY_LOG";

#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Filter directive, e.g. `info` or `continuity_core=debug`.
    pub filter: String,
    /// Also append events to this file.
    pub file: Option<PathBuf>,
    pub ansi: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            filter: "info".to_string(),
            file: None,
            ansi: true,
        }
    }
}

impl LogConfig {
    pub fn with_filter(mut self, filter: impl Into<String>) -> Self {
        self.filter = filter.into();
        self
    }

    pub fn with_file(mut self, file: impl Into<PathBuf>) -> Self {
        self.file = Some(file.into());
        self
    }

    pub fn with_ansi(mut self, ansi: bool) -> Self {
        self.ansi = ansi;
        self
    }

    /// The filter to use: `CONTINUITY_LOG`, then `RUST_LOG`, then `filter`.
    fn env_filter(&self) -> EnvFilter {
        EnvFilter::try_from_env(LOG_ENV)
            .or_else(|_| EnvFilter::try_from_default_env())
            .unwrap_or_else(|_| EnvFilter::new(&self.filter))
    }
}

/// Keeps the installed subscriber active until dropped.
pub struct LogGuard {
    _default: DefaultGuard,
}

/// Install a subscriber as the current thread's default.
///
/// Events go to stderr and, if configured, are appended to the log file.
pub fn install(config: &LogConfig) -> Result<LogGuard, StorageError> {
    let file_layer = match &config.file {
        Some(path) => {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent).map_err(|e| StorageError::io(parent, e))?;
            }
            let file: File = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .map_err(|e| StorageError::io(path, e))?;
            Some(
                fmt::layer()
                    .with_ansi(false)
                    .with_target(false)
                    .with_writer(Mutex::new(file)),
            )
        }
        None => None,
    };

    let subscriber = tracing_subscriber::registry()
        .with(config.env_filter())
        .with(
            fmt::layer()
                .with_ansi(config.ansi)
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .with(file_layer);

    Ok(LogGuard {
        _default: tracing::subscriber::set_default(subscriber),
    })
}
