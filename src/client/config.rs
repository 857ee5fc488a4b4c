use std::path::PathBuf;

use crate::shared::config::{AppConfig, ConfigError};

/// Path of an optional TOML configuration file
pub const CONFIG_PATH_ENV: &str = "GARAGE_SYNC_CONFIG";
pub const API_URL_ENV: &str = "GARAGE_API_URL";
pub const API_TOKEN_ENV: &str = "GARAGE_API_TOKEN";
pub const DB_PATH_ENV: &str = "GARAGE_DB_PATH";

/// Runtime configuration: the TOML file, if any, overridden by environment variables
#[derive(Debug, Clone)]
pub struct Config {
    app: AppConfig,
    source: Option<PathBuf>,
}

impl Config {
    /// Load from the process environment
    pub fn load() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load with a custom variable lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let source = lookup(CONFIG_PATH_ENV).map(PathBuf::from);
        let mut app = match &source {
            Some(path) => AppConfig::load_file(path)?,
            None => AppConfig::default(),
        };

        if let Some(url) = lookup(API_URL_ENV) {
            app.api_base_url = Some(url);
        }
        if let Some(token) = lookup(API_TOKEN_ENV) {
            app.api_token = Some(token);
        }
        if let Some(path) = lookup(DB_PATH_ENV) {
            app.database_path = Some(PathBuf::from(path));
        }

        app.validate()?;
        Ok(Self { app, source })
    }

    pub fn app(&self) -> &AppConfig {
        &self.app
    }

    pub fn into_app(self) -> AppConfig {
        self.app
    }

    /// The file the configuration was read from
    pub fn source(&self) -> Option<&PathBuf> {
        self.source.as_ref()
    }

    pub fn api_base_url(&self) -> Result<&str, ConfigError> {
        self.app
            .api_base_url
            .as_deref()
            .ok_or(ConfigError::MissingValue("api_base_url"))
    }

    pub fn api_token(&self) -> Option<&str> {
        self.app.api_token.as_deref()
    }

    /// Probe target, falling back to the API base URL
    pub fn probe_url(&self) -> Option<&str> {
        self.app.probe_url.as_deref().or(self.app.api_base_url.as_deref())
    }

    pub fn database_path(&self) -> PathBuf {
        self.app
            .database_path
            .clone()
            .unwrap_or_else(default_database_path)
    }
}

/// `<data dir>/garage-sync/queue.db`, or relative to the working directory when the
/// platform has no data directory
pub fn default_database_path() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("garage-sync")
        .join("queue.db")
}
