//! # configs
//!
//! Runtime settings for Nodeboard, layered as: built-in defaults, then an
//! optional `nodeboard.toml`, then `NODEBOARD__SECTION__KEY` environment
//! variables (a `.env` file is read first when present).

use config::{Config, Environment, File};
use secrecy::SecretString;
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;
use thiserror::Error;

const ENV_PREFIX: &str = "NODEBOARD";
const ENV_SEPARATOR: &str = "__";
const CONFIG_FILE: &str = "nodeboard";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to load settings: {0}")]
    Load(#[from] config::ConfigError),

    #[error("invalid setting: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    Memory,
    Sqlite,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StoreSettings {
    pub backend: StoreBackend,
    /// May embed credentials for remote stores, hence secret.
    pub database_url: SecretString,
    pub query_timeout_ms: u64,
}

impl StoreSettings {
    pub fn query_timeout(&self) -> Duration {
        Duration::from_millis(self.query_timeout_ms)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LogSettings {
    /// `tracing_subscriber::EnvFilter` directive, e.g. `info,nb_core=debug`
    pub filter: String,
    pub json: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SeedSettings {
    /// Populate an empty store with demo content on startup
    pub demo: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub store: StoreSettings,
    pub log: LogSettings,
    pub seed: SeedSettings,
}

impl Settings {
    /// Loads settings from `.env`, `nodeboard.toml` and the process environment.
    pub fn load() -> Result<Self, ConfigError> {
        if let Ok(path) = dotenvy::dotenv() {
            tracing::debug!(path = %path.display(), "loaded .env");
        }
        Self::build(Some(CONFIG_FILE), None)
    }

    /// Builds settings from defaults plus the given variables only, ignoring
    /// the process environment and config files.
    pub fn from_vars(vars: HashMap<String, String>) -> Result<Self, ConfigError> {
        Self::build(None, Some(vars))
    }

    fn build(file: Option<&str>, vars: Option<HashMap<String, String>>) -> Result<Self, ConfigError> {
        let mut builder = Config::builder()
            .set_default("store.backend", "sqlite")?
            .set_default("store.database_url", "sqlite://nodeboard.db")?
            .set_default("store.query_timeout_ms", 2000)?
            .set_default("log.filter", "info")?
            .set_default("log.json", false)?
            .set_default("seed.demo", false)?;

        if let Some(name) = file {
            builder = builder.add_source(File::with_name(name).required(false));
        }

        builder = builder.add_source(
            Environment::with_prefix(ENV_PREFIX)
                .prefix_separator(ENV_SEPARATOR)
                .separator(ENV_SEPARATOR)
                .try_parsing(true)
                .source(vars),
        );

        let settings: Settings = builder.build()?.try_deserialize()?;
        settings.validate()?;
        Ok(settings)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.store.query_timeout_ms == 0 {
            return Err(ConfigError::Invalid("store.query_timeout_ms must be positive".into()));
        }
        if self.log.filter.trim().is_empty() {
            return Err(ConfigError::Invalid("log.filter must not be empty".into()));
        }
        Ok(())
    }
}
