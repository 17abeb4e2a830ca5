//! Logging and tracing configuration
//!
//! The sink is chosen by the `logging.file` setting of the loaded spec:
//! stderr (default), stdout or an append-only log file. Diagnostic dumps of
//! request/response payloads are gated by `logging.verbosity` (0-9).

use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use super::{Error, Result};
use crate::config::LoggingSettings;

/// Target used for diagnostic payload dumps
pub const DUMP_TARGET: &str = "apicheck::dump";

/// Where log output goes
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogSink {
    Stderr,
    Stdout,
    File(PathBuf),
}

impl LogSink {
    /// Interpret a `logging.file` setting
    ///
    /// Accepts the stream spellings used by older spec files
    /// (`php://stderr`, `php:stderr`) alongside plain `stderr`/`stdout`.
    pub fn parse(value: &str) -> Self {
        let stream = value
            .trim()
            .trim_start_matches("php://")
            .trim_start_matches("php:");
        match stream {
            "" | "stderr" => LogSink::Stderr,
            "stdout" => LogSink::Stdout,
            _ => LogSink::File(PathBuf::from(value.trim())),
        }
    }
}

fn default_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("apicheck=info,warn"))
}

/// Initialize tracing for a run
///
/// Logs are controlled by the `RUST_LOG` environment variable.
/// Default level is INFO for this crate, WARN for dependencies.
pub fn init(settings: &LoggingSettings) -> Result<()> {
    let registry = tracing_subscriber::registry().with(default_filter());

    let installed = match LogSink::parse(&settings.file) {
        LogSink::Stderr => registry
            .with(
                fmt::layer()
                    .with_writer(std::io::stderr)
                    .with_target(false)
                    .compact(),
            )
            .try_init(),
        LogSink::Stdout => registry
            .with(
                fmt::layer()
                    .with_writer(std::io::stdout)
                    .with_target(false)
                    .compact(),
            )
            .try_init(),
        LogSink::File(path) => {
            let (dir, file_name) = split_log_path(&path)?;
            std::fs::create_dir_all(&dir)?;
            let appender = tracing_appender::rolling::never(dir, file_name);
            registry
                .with(
                    fmt::layer()
                        .with_writer(appender)
                        .with_ansi(false)
                        .with_target(true),
                )
                .try_init()
        }
    };

    installed.map_err(|e| Error::Internal(format!("Failed to install logger: {}", e)))
}

fn split_log_path(path: &Path) -> Result<(PathBuf, PathBuf)> {
    let file_name = path.file_name().ok_or_else(|| {
        Error::config_validation("logging.file", format!("'{}' is not a file", path.display()))
    })?;
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };
    Ok((dir, PathBuf::from(file_name)))
}

/// Verbosity-gated payload dumps
///
/// Level 0 is always shown, 9 is the chattiest.
#[derive(Debug, Clone, Copy, Default)]
pub struct Diagnostics {
    verbosity: u8,
}

impl Diagnostics {
    pub fn new(verbosity: u8) -> Self {
        Self { verbosity }
    }

    /// Whether a message at `level` would be emitted
    pub fn enabled(&self, level: u8) -> bool {
        level <= self.verbosity
    }

    /// Emit a structured dump of `payload` if `level` is within the verbosity
    pub fn dump<T: Serialize + ?Sized>(&self, level: u8, label: &str, payload: &T) {
        if !self.enabled(level) {
            return;
        }
        let rendered = serde_json::to_string_pretty(payload)
            .unwrap_or_else(|e| format!("<unserializable payload: {}>", e));
        tracing::info!(target: DUMP_TARGET, dump_level = level, "{}\n{}", label, rendered);
    }
}
