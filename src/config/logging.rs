//! Logging configuration and subscriber installation.

use serde::{Deserialize, Serialize};
use std::fs::OpenOptions;
use std::str::FromStr;
use std::sync::Mutex;
use tracing_subscriber::EnvFilter;

use crate::error::{KanshiError, Result};

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level.
    pub level: LogLevel,

    /// Log format.
    pub format: LogFormat,

    /// Log output destination.
    pub output: LogOutput,

    /// Log file path (when output = file).
    pub file_path: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: LogLevel::Info,
            format: LogFormat::Text,
            output: LogOutput::Stderr,
            file_path: None,
        }
    }
}

impl LoggingConfig {
    /// Builds the event filter. `RUST_LOG` wins over the configured level.
    pub fn filter(&self, level_override: Option<LogLevel>) -> EnvFilter {
        let level = level_override.unwrap_or(self.level);
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.as_str()))
    }

    /// Installs the global tracing subscriber.
    pub fn install(&self, level_override: Option<LogLevel>) -> Result<()> {
        let filter = self.filter(level_override);
        let builder = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(true);

        let installed = match (self.output, self.format) {
            (LogOutput::File, format) => {
                let path = self.file_path.as_deref().ok_or_else(|| {
                    KanshiError::config("logging.file_path is required when output is file")
                })?;
                let file = OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(path)
                    .map_err(|e| {
                        KanshiError::config_with_source(
                            format!("Failed to open log file '{}'", path),
                            e,
                        )
                    })?;
                let builder = builder.with_writer(Mutex::new(file)).with_ansi(false);
                match format {
                    LogFormat::Json => builder.json().try_init(),
                    LogFormat::Text => builder.try_init(),
                }
            }
            (LogOutput::Stdout, LogFormat::Json) => {
                builder.with_writer(std::io::stdout).json().try_init()
            }
            (LogOutput::Stdout, LogFormat::Text) => builder.with_writer(std::io::stdout).try_init(),
            (LogOutput::Stderr, LogFormat::Json) => {
                builder.with_writer(std::io::stderr).json().try_init()
            }
            (LogOutput::Stderr, LogFormat::Text) => builder.with_writer(std::io::stderr).try_init(),
        };

        installed.map_err(|e| KanshiError::internal(format!("Failed to install logger: {}", e)))
    }
}

/// Log level.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Trace level.
    Trace,
    /// Debug level.
    Debug,
    /// Info level.
    #[default]
    Info,
    /// Warn level.
    Warn,
    /// Error level.
    Error,
}

impl LogLevel {
    /// Filter directive for this level.
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

impl FromStr for LogLevel {
    type Err = KanshiError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "trace" => Ok(LogLevel::Trace),
            "debug" => Ok(LogLevel::Debug),
            "info" => Ok(LogLevel::Info),
            "warn" | "warning" => Ok(LogLevel::Warn),
            "error" => Ok(LogLevel::Error),
            _ => Err(KanshiError::config(format!("Unknown log level: {}", s))),
        }
    }
}

impl From<LogLevel> for tracing::Level {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Trace => tracing::Level::TRACE,
            LogLevel::Debug => tracing::Level::DEBUG,
            LogLevel::Info => tracing::Level::INFO,
            LogLevel::Warn => tracing::Level::WARN,
            LogLevel::Error => tracing::Level::ERROR,
        }
    }
}

/// Log format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// JSON lines.
    Json,
    /// Human readable text.
    #[default]
    Text,
}

impl FromStr for LogFormat {
    type Err = KanshiError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "json" => Ok(LogFormat::Json),
            "text" => Ok(LogFormat::Text),
            _ => Err(KanshiError::config(format!("Unknown log format: {}", s))),
        }
    }
}

/// Log output destination.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogOutput {
    /// Standard output.
    Stdout,
    /// Standard error.
    #[default]
    Stderr,
    /// File output.
    File,
}

impl FromStr for LogOutput {
    type Err = KanshiError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "stdout" => Ok(LogOutput::Stdout),
            "stderr" => Ok(LogOutput::Stderr),
            "file" => Ok(LogOutput::File),
            _ => Err(KanshiError::config(format!("Unknown log output: {}", s))),
        }
    }
}
