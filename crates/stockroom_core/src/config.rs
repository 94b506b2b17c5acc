//! Core configuration.
//!
//! # Responsibility
//! - Describe the tunables of the inventory core in one serde-backed struct.
//! - Layer environment overrides on top of JSON or default settings.
//!
//! # Invariants
//! - A `CoreConfig` returned by any constructor has passed `validate()`.
//! - Collection names are `[a-z0-9_-]+`.

use crate::logging::{default_log_level, init_logging, normalize_level};
use crate::sync::DEFAULT_ECHO_SNAPSHOT_LIMIT;
use serde::Deserialize;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::path::PathBuf;

pub const DEFAULT_COLLECTION: &str = "products";

const ENV_COLLECTION: &str = "STOCKROOM_COLLECTION";
const ENV_LOG_LEVEL: &str = "STOCKROOM_LOG_LEVEL";
const ENV_LOG_DIR: &str = "STOCKROOM_LOG_DIR";
const ENV_DB_PATH: &str = "STOCKROOM_DB_PATH";

/// Configuration validation or parse failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    Parse(String),
    InvalidCollection(String),
    InvalidLogLevel(String),
    RelativeLogDir(PathBuf),
    InvalidEchoLimit,
}

impl Display for ConfigError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Parse(message) => write!(f, "invalid config: {message}"),
            Self::InvalidCollection(value) => {
                write!(f, "collection name is invalid: `{value}`; expected [a-z0-9_-]+")
            }
            Self::InvalidLogLevel(message) => write!(f, "{message}"),
            Self::RelativeLogDir(path) => {
                write!(f, "log_dir must be an absolute path, got `{}`", path.display())
            }
            Self::InvalidEchoLimit => write!(f, "echo_snapshot_limit must be at least 1"),
        }
    }
}

impl Error for ConfigError {}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CoreConfig {
    /// Store collection holding product documents.
    pub collection: String,
    /// One of `trace|debug|info|warn|error`.
    pub log_level: String,
    /// Rolling log directory; logging stays off when unset.
    pub log_dir: Option<PathBuf>,
    /// SQLite file for the persistent store; in-memory when unset.
    pub db_path: Option<PathBuf>,
    /// Snapshots to wait after a write acknowledgement before releasing the loading flag.
    pub echo_snapshot_limit: u32,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            collection: DEFAULT_COLLECTION.to_string(),
            log_level: default_log_level().to_string(),
            log_dir: None,
            db_path: None,
            echo_snapshot_limit: DEFAULT_ECHO_SNAPSHOT_LIMIT,
        }
    }
}

impl CoreConfig {
    /// Parses a JSON document; absent keys take their defaults.
    pub fn from_json_str(text: &str) -> Result<Self, ConfigError> {
        let config: Self =
            serde_json::from_str(text).map_err(|err| ConfigError::Parse(err.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Applies `STOCKROOM_*` environment variables on top of `self`.
    pub fn with_env_overrides(self) -> Result<Self, ConfigError> {
        self.with_overrides(|key| std::env::var(key).ok())
    }

    fn with_overrides(
        mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        let non_blank = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());
        if let Some(collection) = non_blank(ENV_COLLECTION) {
            self.collection = collection.trim().to_string();
        }
        if let Some(level) = non_blank(ENV_LOG_LEVEL) {
            self.log_level = level;
        }
        if let Some(dir) = non_blank(ENV_LOG_DIR) {
            self.log_dir = Some(PathBuf::from(dir.trim()));
        }
        if let Some(path) = non_blank(ENV_DB_PATH) {
            self.db_path = Some(PathBuf::from(path.trim()));
        }
        self.validate()?;
        Ok(self)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !is_valid_collection(&self.collection) {
            return Err(ConfigError::InvalidCollection(self.collection.clone()));
        }
        normalize_level(&self.log_level).map_err(ConfigError::InvalidLogLevel)?;
        if let Some(dir) = &self.log_dir {
            if !dir.is_absolute() {
                return Err(ConfigError::RelativeLogDir(dir.clone()));
            }
        }
        if self.echo_snapshot_limit == 0 {
            return Err(ConfigError::InvalidEchoLimit);
        }
        Ok(())
    }

    /// Starts file logging when `log_dir` is set.
    ///
    /// Returns whether logging is active afterwards.
    pub fn init_logging(&self) -> Result<bool, String> {
        let Some(dir) = &self.log_dir else {
            return Ok(false);
        };
        let dir = dir
            .to_str()
            .ok_or_else(|| format!("log_dir is not valid UTF-8: `{}`", dir.display()))?;
        init_logging(&self.log_level, dir)?;
        Ok(true)
    }
}

fn is_valid_collection(value: &str) -> bool {
    !value.is_empty()
        && value
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_' || c == '-')
}
