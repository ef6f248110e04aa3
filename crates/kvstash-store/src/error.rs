//! Error types for store operations

use kvstash_engine::EngineError;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, StoreError>;

/// Failure of a store operation
///
/// Every operation settles with either a value or one of these; nothing
/// panics across the async boundary.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Failed to open database {database}: {source}")]
    Open {
        database: String,
        #[source]
        source: EngineError,
    },

    #[error("Write to store {store} failed: {source}")]
    Write {
        store: String,
        #[source]
        source: EngineError,
    },

    #[error("Read from store {store} failed: {source}")]
    Read {
        store: String,
        #[source]
        source: EngineError,
    },

    #[error("Record conversion failed: {0}")]
    Conversion(#[source] EngineError),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Storage worker stopped before {0} completed")]
    Interrupted(&'static str),
}

/// Coarse classification of a [`StoreError`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Database or connection could not be established
    Open,
    /// Insert, delete or update transaction failed
    Write,
    /// Fetch or list failed
    Read,
    /// A record did not match the requested type
    Conversion,
    Config,
    Interrupted,
}

impl StoreError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            StoreError::Open { .. } => ErrorKind::Open,
            StoreError::Write { .. } => ErrorKind::Write,
            StoreError::Read { .. } => ErrorKind::Read,
            StoreError::Conversion(_) => ErrorKind::Conversion,
            StoreError::Config(_) => ErrorKind::Config,
            StoreError::Interrupted(_) => ErrorKind::Interrupted,
        }
    }

    /// The engine error underneath, if any
    pub fn engine_error(&self) -> Option<&EngineError> {
        match self {
            StoreError::Open { source, .. }
            | StoreError::Write { source, .. }
            | StoreError::Read { source, .. }
            | StoreError::Conversion(source) => Some(source),
            StoreError::Config(_) | StoreError::Interrupted(_) => None,
        }
    }

    /// True when an insert hit an existing key
    pub fn is_duplicate_key(&self) -> bool {
        matches!(self.engine_error(), Some(EngineError::ConstraintError { .. }))
    }

    /// True when the targeted store does not exist in the database
    pub fn is_missing_store(&self) -> bool {
        matches!(self.engine_error(), Some(EngineError::StoreNotFound(_)))
    }
}
