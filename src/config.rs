//! Configuration management for Formguard.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::debug;

use crate::error::{FormguardError, Result};
use crate::ratelimit::{DEFAULT_LIMIT, DEFAULT_WINDOW_SECS};

/// Main configuration for Formguard.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FormguardConfig {
    /// Rate limiting configuration
    #[serde(default)]
    pub rate_limiting: RateLimitingConfig,

    /// Shared store configuration
    #[serde(default)]
    pub store: StoreConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Rate limiting configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitingConfig {
    /// Maximum submissions admitted per window
    #[serde(default = "default_limit")]
    pub limit: u32,

    /// Length of the trailing window in seconds
    #[serde(default = "default_window_secs")]
    pub window_secs: u64,

    /// How often the local fallback drops keys with no live entries
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,
}

impl Default for RateLimitingConfig {
    fn default() -> Self {
        Self {
            limit: default_limit(),
            window_secs: default_window_secs(),
            sweep_interval_secs: default_sweep_interval(),
        }
    }
}

impl RateLimitingConfig {
    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}

fn default_limit() -> u32 {
    DEFAULT_LIMIT
}

fn default_window_secs() -> u64 {
    DEFAULT_WINDOW_SECS
}

fn default_sweep_interval() -> u64 {
    300
}

/// Shared store (Redis) configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Redis URL. Without one the limiter runs on the local store only.
    #[serde(default)]
    pub url: Option<String>,

    /// Prefix for every key written to Redis
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,

    /// Upper bound for a single store round trip, in milliseconds
    #[serde(default = "default_operation_timeout")]
    pub operation_timeout_ms: u64,

    /// How long to skip the store after it failed, in milliseconds
    #[serde(default = "default_retry_interval")]
    pub retry_interval_ms: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            url: None,
            key_prefix: default_key_prefix(),
            operation_timeout_ms: default_operation_timeout(),
            retry_interval_ms: default_retry_interval(),
        }
    }
}

impl StoreConfig {
    pub fn operation_timeout(&self) -> Duration {
        Duration::from_millis(self.operation_timeout_ms)
    }

    pub fn retry_interval(&self) -> Duration {
        Duration::from_millis(self.retry_interval_ms)
    }
}

fn default_key_prefix() -> String {
    "formguard:ratelimit".to_string()
}

fn default_operation_timeout() -> u64 {
    2000
}

fn default_retry_interval() -> u64 {
    5000
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Filter directive, e.g. `info` or `formguard=debug`
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Emit JSON lines instead of human-readable text
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

impl FormguardConfig {
    /// Load configuration from a file path.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        debug!(path = %path.display(), "Loading configuration");

        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }

    /// Load the file if one is given, otherwise the defaults, then apply
    /// environment overrides.
    ///
    /// Nothing is logged here at `info`: callers usually install their
    /// subscriber from the result and log the source afterwards.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_env();
        config.validate()?;
        Ok(config)
    }

    /// Parse configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: FormguardConfig = serde_yaml::from_str(yaml)
            .map_err(|e| FormguardError::Config(format!("Failed to parse configuration: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Override settings from `REDIS_URL` and `FORMGUARD_LOG`.
    pub fn apply_env(&mut self) {
        if let Ok(url) = std::env::var("REDIS_URL") {
            if !url.is_empty() {
                self.store.url = Some(url);
            }
        }
        if let Ok(level) = std::env::var("FORMGUARD_LOG") {
            if !level.is_empty() {
                self.logging.level = level;
            }
        }
    }

    /// Reject settings the limiter cannot work with.
    pub fn validate(&self) -> Result<()> {
        if self.rate_limiting.limit == 0 {
            return Err(FormguardError::Config(
                "rate_limiting.limit must be at least 1".to_string(),
            ));
        }
        if self.rate_limiting.window_secs == 0 {
            return Err(FormguardError::Config(
                "rate_limiting.window_secs must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}
