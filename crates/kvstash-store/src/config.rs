//! Store handle configuration

use crate::{Result, StoreError};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Database name used when none is configured
pub const DEFAULT_DB_NAME: &str = "indexed-db";

/// Schema version used when none is configured
pub const DEFAULT_VERSION: u64 = 1;

fn default_db_name() -> String {
    DEFAULT_DB_NAME.to_string()
}

fn default_version() -> u64 {
    DEFAULT_VERSION
}

/// Which database and store a handle binds to, and how
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Name of the database
    #[serde(default = "default_db_name")]
    pub db_name: String,
    /// Name of the object store within the database
    pub store_name: String,
    /// Field of every record holding its primary key
    pub unique_key: String,
    /// Log every successful request at debug level
    #[serde(default)]
    pub debug: bool,
    /// Schema version to open the database at
    #[serde(default = "default_version")]
    pub version: u64,
}

impl StoreConfig {
    pub fn new(store_name: impl Into<String>, unique_key: impl Into<String>) -> Self {
        Self {
            db_name: default_db_name(),
            store_name: store_name.into(),
            unique_key: unique_key.into(),
            debug: false,
            version: DEFAULT_VERSION,
        }
    }

    pub fn with_db_name(mut self, db_name: impl Into<String>) -> Self {
        self.db_name = db_name.into();
        self
    }

    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    pub fn with_version(mut self, version: u64) -> Self {
        self.version = version;
        self
    }

    /// Parse a JSON configuration document
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self =
            serde_json::from_str(json).map_err(|e| StoreError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load a JSON configuration file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| StoreError::Config(format!("{}: {}", path.display(), e)))?;
        Self::from_json(&content)
    }

    pub fn validate(&self) -> Result<()> {
        if self.db_name.trim().is_empty() {
            return Err(StoreError::Config("db_name must not be empty".into()));
        }
        if self.store_name.trim().is_empty() {
            return Err(StoreError::Config("store_name must not be empty".into()));
        }
        if self.unique_key.trim().is_empty() {
            return Err(StoreError::Config("unique_key must not be empty".into()));
        }
        if self.version == 0 {
            return Err(StoreError::Config("version must be at least 1".into()));
        }
        Ok(())
    }

    /// True if switching to `other` requires initializing again
    ///
    /// Only the debug flag can change without reopening the database.
    pub fn needs_reinit(&self, other: &StoreConfig) -> bool {
        self.db_name != other.db_name
            || self.store_name != other.store_name
            || self.unique_key != other.unique_key
            || self.version != other.version
    }
}
