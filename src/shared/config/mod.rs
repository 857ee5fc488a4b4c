//! Application configuration module
//!
//! Provides the sync core's tunables, a builder for assembling them in code, and a
//! TOML loader for the agent's configuration file.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

/// Sync core configuration
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Base URL of the entity REST proxy
    pub api_base_url: Option<String>,
    /// Bearer token sent with every remote call
    pub api_token: Option<String>,
    /// SQLite file holding the mutation queue
    pub database_path: Option<PathBuf>,
    pub sync_interval_secs: u64,
    /// Distinct entities synced concurrently
    pub max_concurrency: usize,
    pub request_timeout_secs: u64,
    pub backoff_base_ms: u64,
    pub backoff_cap_ms: u64,
    /// Relative jitter applied to each backoff delay (0.2 = ±20%)
    pub backoff_jitter: f64,
    /// URL hit by the reachability probe; defaults to the API base URL
    pub probe_url: Option<String>,
    pub probe_interval_secs: u64,
    /// Consecutive probe failures before declaring offline
    pub probe_failure_threshold: u32,
    /// Server-side numeric drift beyond which a merged number is flagged for review
    pub numeric_review_threshold: f64,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            api_base_url: None,
            api_token: None,
            database_path: None,
            sync_interval_secs: 30,
            max_concurrency: 4,
            request_timeout_secs: 15,
            backoff_base_ms: 1_000,
            backoff_cap_ms: 30_000,
            backoff_jitter: 0.2,
            probe_url: None,
            probe_interval_secs: 20,
            probe_failure_threshold: 2,
            numeric_review_threshold: 0.0,
        }
    }
}

impl AppConfig {
    /// Create a new AppConfigBuilder
    pub fn builder() -> AppConfigBuilder {
        AppConfigBuilder::default()
    }

    /// Parse a TOML document; missing keys fall back to defaults
    pub fn from_toml_str(source: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(source).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Read and parse a TOML file
    pub fn load_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let source = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        Self::from_toml_str(&source)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        for url in [&self.api_base_url, &self.probe_url].into_iter().flatten() {
            if !(url.starts_with("http://") || url.starts_with("https://")) {
                return Err(ConfigError::InvalidUrl(url.clone()));
            }
        }
        if self.max_concurrency == 0 {
            return Err(ConfigError::OutOfRange("max_concurrency"));
        }
        if self.sync_interval_secs == 0 {
            return Err(ConfigError::OutOfRange("sync_interval_secs"));
        }
        if self.request_timeout_secs == 0 {
            return Err(ConfigError::OutOfRange("request_timeout_secs"));
        }
        if self.backoff_base_ms == 0 || self.backoff_cap_ms < self.backoff_base_ms {
            return Err(ConfigError::OutOfRange("backoff_cap_ms"));
        }
        if !(0.0..1.0).contains(&self.backoff_jitter) {
            return Err(ConfigError::OutOfRange("backoff_jitter"));
        }
        if self.probe_failure_threshold == 0 {
            return Err(ConfigError::OutOfRange("probe_failure_threshold"));
        }
        if self.numeric_review_threshold < 0.0 {
            return Err(ConfigError::OutOfRange("numeric_review_threshold"));
        }
        Ok(())
    }

    pub fn sync_interval(&self) -> Duration {
        Duration::from_secs(self.sync_interval_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn probe_interval(&self) -> Duration {
        Duration::from_secs(self.probe_interval_secs)
    }
}

/// Builder for AppConfig
#[derive(Debug, Default)]
pub struct AppConfigBuilder {
    config: AppConfig,
}

impl AppConfigBuilder {
    /// Set the entity API base URL
    pub fn api_base_url(mut self, url: impl Into<String>) -> Self {
        self.config.api_base_url = Some(url.into());
        self
    }

    pub fn api_token(mut self, token: impl Into<String>) -> Self {
        self.config.api_token = Some(token.into());
        self
    }

    pub fn database_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.database_path = Some(path.into());
        self
    }

    pub fn sync_interval_secs(mut self, secs: u64) -> Self {
        self.config.sync_interval_secs = secs;
        self
    }

    pub fn max_concurrency(mut self, limit: usize) -> Self {
        self.config.max_concurrency = limit;
        self
    }

    pub fn request_timeout_secs(mut self, secs: u64) -> Self {
        self.config.request_timeout_secs = secs;
        self
    }

    pub fn backoff(mut self, base_ms: u64, cap_ms: u64, jitter: f64) -> Self {
        self.config.backoff_base_ms = base_ms;
        self.config.backoff_cap_ms = cap_ms;
        self.config.backoff_jitter = jitter;
        self
    }

    pub fn probe_url(mut self, url: impl Into<String>) -> Self {
        self.config.probe_url = Some(url.into());
        self
    }

    pub fn probe_failure_threshold(mut self, failures: u32) -> Self {
        self.config.probe_failure_threshold = failures;
        self
    }

    pub fn numeric_review_threshold(mut self, threshold: f64) -> Self {
        self.config.numeric_review_threshold = threshold;
        self
    }

    /// Build the configuration
    pub fn build(self) -> Result<AppConfig, ConfigError> {
        self.config.validate()?;
        Ok(self.config)
    }
}

/// Configuration errors
#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("invalid URL: {0}")]
    InvalidUrl(String),
    #[error("missing value: {0}")]
    MissingValue(&'static str),
    #[error("value out of range: {0}")]
    OutOfRange(&'static str),
    #[error("failed to parse configuration: {0}")]
    Parse(String),
    #[error("failed to read {}: {message}", .path.display())]
    Io { path: PathBuf, message: String },
}
