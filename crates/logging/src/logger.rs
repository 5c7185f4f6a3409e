//! Tracing subscriber setup
//!
//! The pipeline only emits `tracing` events; this module decides where they go.
//! Installing the subscriber is best effort: a process that already has one, or
//! that cannot open its log file, keeps running with a warning on stderr.

use std::path::{Path, PathBuf};
use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};
use tracing::debug;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::EnvFilter;

use common::error::{Error, Result};

static INITIALIZED: OnceCell<()> = OnceCell::new();

/// Output format of log records
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable single-line records
    #[default]
    Text,
    /// One JSON object per record
    Json,
}

/// Logging settings, usually embedded in the pipeline configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogSettings {
    /// Filter directive used when `RUST_LOG` is not set
    pub level: String,

    /// Record format
    pub format: LogFormat,

    /// Log file; stderr when absent
    pub file: Option<PathBuf>,

    /// Whether to print the event target (module path)
    pub with_target: bool,
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Text,
            file: None,
            with_target: true,
        }
    }
}

/// Keeps the background writer of a file sink alive; drop it last.
#[must_use = "dropping the guard stops the file writer"]
pub struct LogGuard {
    _worker: Option<WorkerGuard>,
}

impl LogGuard {
    fn none() -> Self {
        Self { _worker: None }
    }
}

/// Installs the global tracing subscriber.
///
/// Calling this more than once is harmless: later calls return an inert guard.
/// An invalid filter directive is a configuration error; failing to install the
/// subscriber is not.
pub fn init_logging(settings: &LogSettings) -> Result<LogGuard> {
    if INITIALIZED.get().is_some() {
        debug!("Logging already initialized");
        return Ok(LogGuard::none());
    }

    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(&settings.level).map_err(|e| {
            Error::Configuration(format!("Invalid log level '{}': {}", settings.level, e))
        })?,
    };

    let (writer, worker) = match &settings.file {
        Some(path) => {
            let (directory, file_name) = split_log_path(path)?;
            let appender = tracing_appender::rolling::never(directory, file_name);
            let (non_blocking, worker) = tracing_appender::non_blocking(appender);
            (BoxMakeWriter::new(non_blocking), Some(worker))
        }
        None => (BoxMakeWriter::new(std::io::stderr), None),
    };

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(settings.with_target)
        .with_writer(writer);

    let installed = match settings.format {
        LogFormat::Text => builder.try_init(),
        LogFormat::Json => builder.json().try_init(),
    };

    if let Err(e) = installed {
        eprintln!("warning: could not install log subscriber: {}", e);
        return Ok(LogGuard::none());
    }

    let _ = INITIALIZED.set(());
    Ok(LogGuard { _worker: worker })
}

fn split_log_path(path: &Path) -> Result<(PathBuf, PathBuf)> {
    let file_name = path
        .file_name()
        .ok_or_else(|| Error::Configuration(format!("Log path {:?} has no file name", path)))?;
    let directory = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };
    Ok((directory, PathBuf::from(file_name)))
}
