//! Configuration loading, validation, and management for Framelink.
//!
//! Loads configuration from `~/.framelink/config.toml` with environment
//! variable overrides. Validates all settings before a provider is built.

use framelink_core::LogLevel;
pub use framelink_core::status::MIN_HEALTH_CHECK_INTERVAL_MS;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// The root configuration structure.
///
/// Maps directly to `~/.framelink/config.toml`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FramelinkConfig {
    /// Identity of the local participant
    #[serde(default)]
    pub provider: ProviderConfig,

    /// Proxy engine tuning
    #[serde(default)]
    pub proxy: ProxyConfig,

    /// Remote logging
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// Fixed provider id (UUID). Generated per process when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    #[serde(default = "default_provider_name")]
    pub name: String,
}

fn default_provider_name() -> String {
    "framelink".into()
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            id: None,
            name: default_provider_name(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProxyConfig {
    /// Client-side request timeout
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,

    /// Heartbeat interval; 0 disables health checks
    #[serde(default)]
    pub health_check_interval_ms: u64,

    /// Upper bound on messages queued before `ready`; 0 = unbounded
    #[serde(default)]
    pub max_queued_messages: usize,
}

fn default_request_timeout_ms() -> u64 {
    30_000
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            request_timeout_ms: default_request_timeout_ms(),
            health_check_interval_ms: 0,
            max_queued_messages: 0,
        }
    }
}

impl ProxyConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Entries below this level stay local
    #[serde(default = "default_min_remote_level")]
    pub min_remote_level: LogLevel,

    /// Default `source` for log entries
    #[serde(default = "default_source")]
    pub source: String,
}

fn default_min_remote_level() -> LogLevel {
    LogLevel::Info
}
fn default_source() -> String {
    "framelink".into()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            min_remote_level: default_min_remote_level(),
            source: default_source(),
        }
    }
}

impl FramelinkConfig {
    /// Load configuration from the default path (~/.framelink/config.toml).
    ///
    /// Environment variables take priority over the file:
    /// - `FRAMELINK_PROVIDER_ID`
    /// - `FRAMELINK_REQUEST_TIMEOUT_MS`
    /// - `FRAMELINK_HEALTH_CHECK_INTERVAL_MS`
    /// - `FRAMELINK_MIN_REMOTE_LOG_LEVEL`
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::config_dir().join("config.toml");
        let mut config = Self::load_from(&config_path)?;
        config.apply_overrides(|name| std::env::var(name).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific file path.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::info!("No config file found at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Apply overrides from a variable lookup (the process environment in `load`).
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(id) = lookup("FRAMELINK_PROVIDER_ID") {
            self.provider.id = Some(id);
        }

        if let Some(raw) = lookup("FRAMELINK_REQUEST_TIMEOUT_MS") {
            self.proxy.request_timeout_ms = parse_override("FRAMELINK_REQUEST_TIMEOUT_MS", &raw)?;
        }

        if let Some(raw) = lookup("FRAMELINK_HEALTH_CHECK_INTERVAL_MS") {
            self.proxy.health_check_interval_ms =
                parse_override("FRAMELINK_HEALTH_CHECK_INTERVAL_MS", &raw)?;
        }

        if let Some(raw) = lookup("FRAMELINK_MIN_REMOTE_LOG_LEVEL") {
            self.logging.min_remote_level = raw.parse().map_err(|reason| ConfigError::EnvError {
                name: "FRAMELINK_MIN_REMOTE_LOG_LEVEL".into(),
                reason,
            })?;
        }

        Ok(())
    }

    /// Get the configuration directory path.
    pub fn config_dir() -> PathBuf {
        dirs_home().join(".framelink")
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if let Some(id) = &self.provider.id {
            if uuid::Uuid::parse_str(id).is_err() {
                return Err(ConfigError::ValidationError(format!(
                    "provider.id must be a UUID, got '{id}'"
                )));
            }
        }

        let interval = self.proxy.health_check_interval_ms;
        if interval > 0 && interval < MIN_HEALTH_CHECK_INTERVAL_MS {
            return Err(ConfigError::ValidationError(format!(
                "proxy.health_check_interval_ms must be 0 or at least {MIN_HEALTH_CHECK_INTERVAL_MS}, got {interval}"
            )));
        }

        Ok(())
    }

    /// Generate a default config TOML string.
    pub fn default_toml() -> String {
        let config = Self::default();
        toml::to_string_pretty(&config).unwrap_or_default()
    }
}

fn parse_override<T: std::str::FromStr>(name: &str, raw: &str) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    raw.trim().parse().map_err(|e: T::Err| ConfigError::EnvError {
        name: name.into(),
        reason: e.to_string(),
    })
}

/// Get the user's home directory.
fn dirs_home() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        std::env::var("USERPROFILE")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("C:\\Users\\Default"))
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("/tmp"))
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file at {path}: {reason}")]
    ReadError { path: PathBuf, reason: String },

    #[error("Failed to parse config file at {path}: {reason}")]
    ParseError { path: PathBuf, reason: String },

    #[error("Invalid value for {name}: {reason}")]
    EnvError { name: String, reason: String },

    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}
