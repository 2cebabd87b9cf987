use crate::error::ConfigError;
use log::debug;
use reqwest::Url;
use serde::Deserialize;
use serde_json::Value;
use std::path::PathBuf;

/// Default location of the web server's enabled virtual-host definitions
pub const DEFAULT_VHOST_DIR: &str = "/etc/apache2/sites-enabled";

const REQUIRED_KEYS: [&str; 3] = ["log_file", "enabled", "n8n_url"];

/// Immutable configuration snapshot
///
/// A reload produces a fresh `Config`; snapshots are never patched in place.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Log file to tail
    pub log_path: PathBuf,
    /// Whether traces are forwarded to the collector
    pub enabled: bool,
    /// Collector endpoint receiving the JSON payloads
    pub endpoint_url: String,
    /// Directory searched for virtual-host definitions
    pub vhost_dir: PathBuf,
}

/// On-disk shape of the config file
#[derive(Debug, Deserialize)]
struct RawConfig {
    log_file: String,
    enabled: bool,
    n8n_url: String,
    #[serde(default)]
    vhost_dir: Option<String>,
}

impl Config {
    /// Parse and validate a config document
    ///
    /// Required keys are checked before typed decoding so a document missing
    /// several keys reports all of them at once.
    ///
    /// # Errors
    ///
    /// * `ConfigError::ParseError` - the text is not valid JSON
    /// * `ConfigError::MissingKeys` - one or more required keys are absent
    /// * `ConfigError::ValidationError` - a key has the wrong type or an invalid value
    pub fn from_json_str(text: &str) -> Result<Self, ConfigError> {
        let value: Value =
            serde_json::from_str(text).map_err(|e| ConfigError::ParseError(e.to_string()))?;

        let object = value.as_object().ok_or_else(|| {
            ConfigError::ValidationError("config must be a JSON object".to_string())
        })?;

        let missing: Vec<String> = REQUIRED_KEYS
            .iter()
            .filter(|key| !object.contains_key(**key))
            .map(|key| key.to_string())
            .collect();
        if !missing.is_empty() {
            return Err(ConfigError::MissingKeys(missing));
        }

        let raw: RawConfig =
            serde_json::from_value(value).map_err(|e| ConfigError::ValidationError(e.to_string()))?;

        Self::from_raw(raw)
    }

    fn from_raw(raw: RawConfig) -> Result<Self, ConfigError> {
        if raw.log_file.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "'log_file' must not be empty".to_string(),
            ));
        }

        let url = Url::parse(&raw.n8n_url).map_err(|e| {
            ConfigError::ValidationError(format!("'n8n_url' is not a valid URL: {}", e))
        })?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(ConfigError::ValidationError(format!(
                "'n8n_url' must use http or https, got '{}'",
                url.scheme()
            )));
        }

        let vhost_dir = raw
            .vhost_dir
            .filter(|dir| !dir.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_VHOST_DIR.to_string());

        Ok(Self {
            log_path: PathBuf::from(raw.log_file),
            enabled: raw.enabled,
            endpoint_url: raw.n8n_url,
            vhost_dir: PathBuf::from(vhost_dir),
        })
    }
}

/// Supplier of configuration snapshots
pub trait ConfigSource {
    /// Produce a fresh, fully validated snapshot
    fn load(&self) -> Result<Config, ConfigError>;

    /// Human-readable origin of the configuration, used in log messages
    fn describe(&self) -> String;
}

/// Config source backed by a JSON file on disk
#[derive(Debug, Clone)]
pub struct JsonConfigFile {
    path: PathBuf,
}

impl JsonConfigFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl ConfigSource for JsonConfigFile {
    fn load(&self) -> Result<Config, ConfigError> {
        debug!(target: "logwatch::config", "Reading config path={}", self.path.display());

        let text = std::fs::read_to_string(&self.path)
            .map_err(|e| ConfigError::ReadError(format!("{}: {}", self.path.display(), e)))?;

        Config::from_json_str(&text)
    }

    fn describe(&self) -> String {
        self.path.display().to_string()
    }
}
