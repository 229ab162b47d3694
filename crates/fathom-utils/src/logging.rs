//! # Logging
//!
//! `tracing` subscriber setup shared by fathom binaries, tools and tests.
//!
//! The `fathom-core` library only emits events; nothing is printed until an
//! application installs a subscriber with one of the `init_*` functions here.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use fathom_utils::init_logging;
//!
//! // Keep the guard alive for as long as file logs should be flushed.
//! let _guard = init_logging().expect("failed to initialize logging");
//! tracing::info!("inspecting core dump");
//! ```
//!
//! ## Environment Variables
//!
//! - `RUST_LOG`: filter directives (`debug`, `fathom_core::unwind=trace`, ...)
//! - `FATHOM_LOG_FORMAT`: `pretty` (default) or `json`
//! - `FATHOM_LOG_FILE`: also write logs to this file; if it names a
//!   directory, a dated `YYYY-MM-DD-fathom.log` is created inside it
//!
//! Console output goes to stderr so it never mixes with a tool's own output
//! on stdout.

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::{env, fs, io};

use chrono::Utc;
use tracing::Level;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::fmt::time::ChronoUtc;
use tracing_subscriber::fmt::{self};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, Registry};

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync>;

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat
{
    /// Human-readable, one event per line
    #[default]
    Pretty,
    /// One JSON object per event, with span context
    Json,
}

impl FromStr for LogFormat
{
    type Err = LoggingError;

    fn from_str(s: &str) -> Result<Self, Self::Err>
    {
        match s.trim().to_lowercase().as_str() {
            "pretty" | "text" | "dev" => Ok(LogFormat::Pretty),
            "json" | "prod" => Ok(LogFormat::Json),
            _ => Err(LoggingError::InvalidFormat(format!("{s:?}; use 'pretty' or 'json'"))),
        }
    }
}

/// Log level
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel
{
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl From<LogLevel> for Level
{
    fn from(level: LogLevel) -> Self
    {
        match level {
            LogLevel::Error => Level::ERROR,
            LogLevel::Warn => Level::WARN,
            LogLevel::Info => Level::INFO,
            LogLevel::Debug => Level::DEBUG,
            LogLevel::Trace => Level::TRACE,
        }
    }
}

impl FromStr for LogLevel
{
    type Err = LoggingError;

    fn from_str(s: &str) -> Result<Self, Self::Err>
    {
        match s.trim().to_lowercase().as_str() {
            "error" | "err" => Ok(LogLevel::Error),
            "warn" | "warning" => Ok(LogLevel::Warn),
            "info" => Ok(LogLevel::Info),
            "debug" | "dbg" => Ok(LogLevel::Debug),
            "trace" => Ok(LogLevel::Trace),
            _ => Err(LoggingError::InvalidLevel(format!(
                "{s:?}; use 'error', 'warn', 'info', 'debug' or 'trace'"
            ))),
        }
    }
}

/// Keeps the file writer alive
///
/// Dropping it flushes and stops the background writer thread; events logged
/// after that are not written to the file.
#[derive(Debug)]
#[must_use = "dropping the guard stops file logging"]
pub struct LoggingGuard
{
    file: Option<WorkerGuard>,
    path: Option<PathBuf>,
}

impl LoggingGuard
{
    /// The log file being written, if any.
    pub fn file_path(&self) -> Option<&Path>
    {
        self.path.as_deref()
    }

    pub fn is_writing_file(&self) -> bool
    {
        self.file.is_some()
    }
}

/// Initialize logging from the environment
///
/// `RUST_LOG` picks the filter (default `info`), `FATHOM_LOG_FORMAT` the
/// format and `FATHOM_LOG_FILE` an optional log file.
///
/// ## Errors
///
/// - [`LoggingError::InvalidFormat`] for an unknown `FATHOM_LOG_FORMAT`
/// - [`LoggingError::FileError`] if the log file cannot be created
/// - [`LoggingError::InitializationFailed`] if a global subscriber is already set
pub fn init_logging() -> Result<LoggingGuard, LoggingError>
{
    let format = match env::var("FATHOM_LOG_FORMAT") {
        Ok(value) if !value.trim().is_empty() => value.parse()?,
        _ => LogFormat::default(),
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(Level::INFO.to_string()));
    install(format, filter, log_file_from_env()?)
}

/// Initialize logging with an explicit level and format
///
/// `RUST_LOG` is ignored; `FATHOM_LOG_FILE` is still honoured.
///
/// ```rust,no_run
/// use fathom_utils::{init_logging_with_level, LogFormat, LogLevel};
///
/// let _guard = init_logging_with_level(LogLevel::Debug, LogFormat::Json)?;
/// # Ok::<(), fathom_utils::LoggingError>(())
/// ```
///
/// ## Errors
///
/// As [`init_logging`], minus the format check.
pub fn init_logging_with_level(level: LogLevel, format: LogFormat) -> Result<LoggingGuard, LoggingError>
{
    install(format, EnvFilter::new(Level::from(level).to_string()), log_file_from_env()?)
}

/// Route events to the test harness's captured output
///
/// Safe to call from every test: only the first call installs a subscriber.
/// The filter comes from `RUST_LOG`, defaulting to `debug` for fathom crates.
pub fn init_test_logging()
{
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("warn,fathom_core=debug,fathom_utils=debug"));
    let _ = fmt::Subscriber::builder()
        .with_env_filter(filter)
        .with_test_writer()
        .with_target(true)
        .try_init();
}

fn log_file_from_env() -> Result<Option<PathBuf>, LoggingError>
{
    match env::var_os("FATHOM_LOG_FILE") {
        Some(value) if !value.is_empty() => resolve_log_file(Path::new(&value)).map(Some),
        _ => Ok(None),
    }
}

/// Directories get a dated file name; parent directories are created.
fn resolve_log_file(path: &Path) -> Result<PathBuf, LoggingError>
{
    let file = if path.is_dir() {
        path.join(format!("{}-fathom.log", Utc::now().format("%Y-%m-%d")))
    } else {
        path.to_path_buf()
    };
    if let Some(parent) = file.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    Ok(file)
}

fn install(format: LogFormat, filter: EnvFilter, log_file: Option<PathBuf>) -> Result<LoggingGuard, LoggingError>
{
    let mut layers: Vec<BoxedLayer> = vec![console_layer(format, filter.clone())];
    let mut guard = LoggingGuard {
        file: None,
        path: None,
    };

    if let Some(path) = log_file {
        let directory = path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .map_or_else(|| PathBuf::from("."), Path::to_path_buf);
        let name = path
            .file_name()
            .ok_or_else(|| LoggingError::FileError(io::Error::other(format!("{} is not a file", path.display()))))?;
        let appender = tracing_appender::rolling::never(directory, name);
        let (writer, worker) = tracing_appender::non_blocking(appender);
        layers.push(file_layer(format, filter, writer));
        guard.file = Some(worker);
        guard.path = Some(path);
    }

    Registry::default()
        .with(layers)
        .try_init()
        .map_err(|err| LoggingError::InitializationFailed(err.to_string()))?;
    Ok(guard)
}

fn console_layer(format: LogFormat, filter: EnvFilter) -> BoxedLayer
{
    let layer = fmt::layer()
        .with_target(true)
        .with_thread_names(true)
        .with_timer(ChronoUtc::rfc_3339())
        .with_writer(io::stderr);
    match format {
        LogFormat::Pretty => layer.with_ansi(true).with_filter(filter).boxed(),
        LogFormat::Json => layer
            .json()
            .with_current_span(true)
            .with_span_list(true)
            .with_filter(filter)
            .boxed(),
    }
}

fn file_layer(format: LogFormat, filter: EnvFilter, writer: tracing_appender::non_blocking::NonBlocking) -> BoxedLayer
{
    let layer = fmt::layer()
        .with_writer(writer)
        .with_target(true)
        .with_thread_ids(true)
        .with_thread_names(true)
        .with_file(true)
        .with_line_number(true)
        .with_timer(ChronoUtc::rfc_3339());
    match format {
        LogFormat::Pretty => layer.with_ansi(false).with_filter(filter).boxed(),
        LogFormat::Json => layer
            .json()
            .with_current_span(true)
            .with_span_list(true)
            .with_filter(filter)
            .boxed(),
    }
}

/// Logging initialization error
#[derive(Debug, thiserror::Error)]
pub enum LoggingError
{
    #[error("Invalid log format: {0}")]
    InvalidFormat(String),

    #[error("Invalid log level: {0}")]
    InvalidLevel(String),

    /// A global subscriber is already installed.
    #[error("Failed to initialize logging: {0}")]
    InitializationFailed(String),

    #[error("File logging error: {0}")]
    FileError(#[from] io::Error),
}
