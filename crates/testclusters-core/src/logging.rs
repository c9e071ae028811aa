//! Structured logging for testclusters
//!
//! Uses `tracing` with a pretty or JSON formatter on stderr and an optional
//! append-only log file. Lifecycle events carry consistent fields so a run
//! can be filtered per node:
//!
//! - `node`: node identifier, `node{<path>:<name>}`
//! - `pid`: OS process id
//! - `path`: file or directory being acted on
//! - `tool`: bin script being run
//!
//! Progress messages are additionally appended to the node's own stdout log
//! (see [`log_to_process_stdout`]) so that a log read on failure shows what
//! the harness did between server output.

use std::fs::{File, OpenOptions};
use std::io::{self, Write as _};
#[cfg(unix)]
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, OnceLock};

use serde::{Deserialize, Serialize};
use tracing_subscriber::fmt::time::SystemTime;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{EnvFilter, Layer, Registry, fmt};

pub use crate::config::LogFormat;

/// Set once the global subscriber is installed.
static SUBSCRIBER_INSTALLED: OnceLock<()> = OnceLock::new();

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync>;

/// `[logging]` section of the harness configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Level filter used when `RUST_LOG` is unset
    pub level: String,

    pub format: LogFormat,

    /// Harness log file, appended to across runs
    pub file: Option<PathBuf>,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Pretty,
            file: None,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum LogError {
    #[error("logging already initialized")]
    AlreadyInitialized,

    #[error("cannot open harness log file: {0}")]
    FileCreate(#[from] io::Error),

    #[error("cannot install tracing subscriber: {0}")]
    SetSubscriber(#[from] tracing::subscriber::SetGlobalDefaultError),
}

/// Open the harness log for appending. A newly created file is private to
/// the current user.
fn open_log_file(path: &Path) -> io::Result<File> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    let created = !path.exists();
    let file = OpenOptions::new().create(true).append(true).open(path)?;
    #[cfg(unix)]
    if created {
        file.set_permissions(std::fs::Permissions::from_mode(0o600))?;
    }
    #[cfg(not(unix))]
    let _ = created;
    Ok(file)
}

fn stderr_layer(format: LogFormat) -> BoxedLayer {
    match format {
        LogFormat::Pretty => fmt::layer()
            .with_writer(io::stderr)
            .with_target(true)
            .with_thread_ids(false)
            .with_file(false)
            .with_line_number(false)
            .boxed(),
        LogFormat::Json => fmt::layer()
            .json()
            .with_timer(SystemTime)
            .with_writer(io::stderr)
            .with_current_span(true)
            .with_span_list(false)
            .flatten_event(true)
            .boxed(),
    }
}

fn file_layer(format: LogFormat, file: File) -> BoxedLayer {
    let writer = Mutex::new(file);
    match format {
        LogFormat::Pretty => fmt::layer().with_writer(writer).with_ansi(false).boxed(),
        LogFormat::Json => fmt::layer()
            .json()
            .with_timer(SystemTime)
            .with_writer(writer)
            .flatten_event(true)
            .boxed(),
    }
}

/// Install the global subscriber described by `config`.
///
/// `RUST_LOG` takes precedence over `config.level`. Only the first call
/// succeeds; later calls return [`LogError::AlreadyInitialized`].
pub fn init_logging(config: &LogConfig) -> Result<(), LogError> {
    if SUBSCRIBER_INSTALLED.get().is_some() {
        return Err(LogError::AlreadyInitialized);
    }

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));

    let mut layers = vec![stderr_layer(config.format)];
    if let Some(path) = &config.file {
        layers.push(file_layer(config.format, open_log_file(path)?));
    }

    tracing::subscriber::set_global_default(Registry::default().with(layers.with_filter(filter)))?;
    let _ = SUBSCRIBER_INSTALLED.set(());

    tracing::debug!(
        level = %config.level,
        format = %config.format,
        file = ?config.file,
        "Harness logging ready"
    );
    Ok(())
}

pub fn is_logging_initialized() -> bool {
    SUBSCRIBER_INSTALLED.get().is_some()
}

/// `[<rfc3339 timestamp>] [BUILD] <message>`
#[must_use]
pub fn build_line(message: &str) -> String {
    format!(
        "[{}] [BUILD] {message}\n",
        chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
    )
}

/// Append a harness progress line to a node's stdout log and emit it as a
/// tracing event.
pub fn log_to_process_stdout(stdout_file: &Path, node: &str, message: &str) -> crate::Result<()> {
    use crate::error::IoContext;

    tracing::info!(node, "{message}");
    if let Some(parent) = stdout_file.parent() {
        std::fs::create_dir_all(parent).io_context("create directory", parent)?;
    }
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(stdout_file)
        .io_context("open for append", stdout_file)?;
    file.write_all(build_line(message).as_bytes())
        .io_context("append", stdout_file)
}
