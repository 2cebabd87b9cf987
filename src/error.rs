use std::fmt;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Errors that can occur while loading the runtime configuration
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(String),

    #[error("Failed to parse config: {0}")]
    ParseError(String),

    #[error("Missing required config keys: {}", .0.join(", "))]
    MissingKeys(Vec<String>),

    #[error("Invalid configuration value: {0}")]
    ValidationError(String),
}

/// Errors raised by the log tailer
#[derive(Error, Debug)]
pub enum TailError {
    #[error("Log file unavailable: {path}: {reason}")]
    LogUnavailable { path: PathBuf, reason: String },

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

/// Errors from running an external command
#[derive(Error, Debug)]
pub enum ProcessError {
    #[error("Failed to spawn subprocess: {0}")]
    SpawnFailed(String),

    #[error("Subprocess timed out after {0:?}")]
    Timeout(Duration),

    #[error("Subprocess exited with status {0}")]
    NonZeroExit(String),

    #[error("Subprocess produced no output")]
    EmptyOutput,

    #[error("Refusing to pass argument: {0}")]
    InvalidArgument(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

/// Errors that can occur when forwarding a trace to the collector
#[derive(Error, Debug)]
pub enum DispatchError {
    #[error("Failed to build HTTP client: {0}")]
    ClientBuild(String),

    #[error("HTTP error: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("Collector responded with status {0}")]
    Status(u16),

    #[error("Failed to serialize payload: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// The enrichment field a lookup failure belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnrichmentField {
    Vhost,
    GitRoot,
    GitRemote,
    Blame,
}

impl fmt::Display for EnrichmentField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EnrichmentField::Vhost => "vhost",
            EnrichmentField::GitRoot => "git_root",
            EnrichmentField::GitRemote => "git_remote",
            EnrichmentField::Blame => "blame",
        };
        f.write_str(name)
    }
}

/// A single degraded field during enrichment
///
/// These are reported alongside the produced detail and never abort enrichment.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{field} lookup failed: {reason}")]
pub struct EnrichmentFieldFailure {
    pub field: EnrichmentField,
    pub reason: String,
}

impl EnrichmentFieldFailure {
    pub fn new(field: EnrichmentField, reason: impl Into<String>) -> Self {
        Self {
            field,
            reason: reason.into(),
        }
    }
}
