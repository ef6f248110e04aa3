//! Error types for engine operations

use std::io;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, EngineError>;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Record encoding error: {0}")]
    Encoding(#[from] serde_json::Error),

    #[error("Schema encoding error: {0}")]
    Serialization(#[from] bincode::Error),

    #[error("Database error: {0}")]
    Database(#[from] redb::Error),

    #[error("Database creation error: {0}")]
    DatabaseCreation(#[from] redb::DatabaseError),

    #[error("Transaction error: {0}")]
    Transaction(#[from] redb::TransactionError),

    #[error("Commit error: {0}")]
    Commit(#[from] redb::CommitError),

    #[error("Table error: {0}")]
    Table(#[from] redb::TableError),

    #[error("Storage error: {0}")]
    Storage(#[from] redb::StorageError),

    #[error("Invalid database name: {0:?}")]
    InvalidName(String),

    #[error("Object store not found: {0}")]
    StoreNotFound(String),

    #[error("Object store already exists: {0}")]
    StoreExists(String),

    #[error("Key already exists in store {store}: {key}")]
    ConstraintError { store: String, key: String },

    #[error("Record has no valid key at key path '{0}'")]
    MissingKey(String),

    #[error("Invalid key: {0}")]
    InvalidKey(String),

    #[error("Invalid record: {0}")]
    InvalidRecord(String),

    #[error("Invalid database version {0}: versions start at 1")]
    InvalidVersion(u64),

    #[error("Requested version {requested} is less than the existing version {current}")]
    VersionError { requested: u64, current: u64 },

    #[error("Transaction on store {0} is read-only")]
    ReadOnly(String),

    #[error("Upgrade aborted: {0}")]
    UpgradeAborted(String),

    #[error("Lock poisoned: {0}")]
    Poisoned(String),
}

impl EngineError {
    /// Wrap an error raised by an upgrade hook so the open fails as aborted
    pub fn upgrade_aborted(err: impl std::fmt::Display) -> Self {
        EngineError::UpgradeAborted(err.to_string())
    }
}

impl<T> From<std::sync::PoisonError<T>> for EngineError {
    fn from(err: std::sync::PoisonError<T>) -> Self {
        EngineError::Poisoned(err.to_string())
    }
}
