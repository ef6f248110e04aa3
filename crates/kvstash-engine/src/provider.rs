//! Storage engine trait, connection and transaction interfaces

use crate::{Key, Record, Result};
use serde::{Deserialize, Serialize};

/// Hook run while a database is being upgraded to a newer version
///
/// Returning an error aborts the upgrade. The database keeps its old
/// version and schema.
pub type UpgradeHook<'a> = &'a mut dyn FnMut(&mut dyn SchemaEditor) -> Result<()>;

/// Pluggable storage engine interface
///
/// An engine hosts named, versioned databases. Each database holds named
/// object stores keyed by a single field of their records.
pub trait StorageEngine: Send + Sync {
    /// Open a database, upgrading it first if `version` is newer than the
    /// stored one
    ///
    /// - `None` on a missing database creates it at version 1 (upgrade runs)
    /// - `None` on an existing database opens it at its stored version
    /// - `Some(0)` fails with `InvalidVersion`
    /// - `Some(v)` below the stored version fails with `VersionError`
    ///
    /// Only one upgrade runs at a time per database.
    fn open(
        &self,
        name: &str,
        version: Option<u64>,
        upgrade: UpgradeHook<'_>,
    ) -> Result<Box<dyn Connection>>;

    /// List the databases this engine knows about
    fn databases(&self) -> Result<Vec<DatabaseInfo>>;

    /// Delete a database and all its stores. Missing databases are ignored.
    fn delete_database(&self, name: &str) -> Result<()>;
}

/// Schema access handed to an [`UpgradeHook`]
pub trait SchemaEditor {
    /// Version before the upgrade (0 for a new database)
    fn old_version(&self) -> u64;

    /// Version being upgraded to
    fn new_version(&self) -> u64;

    /// Names of the stores currently in the schema
    fn store_names(&self) -> Vec<String>;

    fn contains_store(&self, name: &str) -> bool {
        self.store_names().iter().any(|s| s == name)
    }

    /// Create a store keyed by `key_path`. Fails with `StoreExists` if present.
    fn create_store(&mut self, name: &str, key_path: &str) -> Result<()>;

    /// Drop a store and its records. Fails with `StoreNotFound` if absent.
    fn delete_store(&mut self, name: &str) -> Result<()>;
}

/// A handle bound to one database at one version
pub trait Connection: Send {
    fn name(&self) -> &str;

    fn version(&self) -> u64;

    fn store_names(&self) -> Vec<String>;

    /// Begin a transaction scoped to a single store
    fn transaction(&self, store: &str, mode: TransactionMode)
        -> Result<Box<dyn Transaction + '_>>;
}

/// Transaction over one object store
///
/// Writes are invisible to other connections until [`Transaction::commit`].
/// Dropping a transaction without committing discards them.
pub trait Transaction {
    fn mode(&self) -> TransactionMode;

    /// Key path of the store this transaction is scoped to
    fn key_path(&self) -> &str;

    /// Insert a record whose key must not exist yet (`ConstraintError`)
    fn add(&mut self, record: &Record) -> Result<Key>;

    /// Fetch a record by key
    fn get(&self, key: &Key) -> Result<Option<Record>>;

    /// Insert or replace a record
    fn put(&mut self, record: &Record) -> Result<Key>;

    /// Delete a record by key. Deleting a missing key is not an error.
    fn delete(&mut self, key: &Key) -> Result<()>;

    /// All records in key order
    fn get_all(&self) -> Result<Vec<Record>>;

    /// Commit the transaction atomically
    fn commit(self: Box<Self>) -> Result<()>;

    /// Abort the transaction (discard all changes)
    fn abort(self: Box<Self>) -> Result<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionMode {
    ReadOnly,
    ReadWrite,
}

impl std::fmt::Display for TransactionMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransactionMode::ReadOnly => write!(f, "readonly"),
            TransactionMode::ReadWrite => write!(f, "readwrite"),
        }
    }
}

/// Persisted description of an object store
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreSchema {
    pub key_path: String,
    pub auto_increment: bool,
}

impl StoreSchema {
    pub fn new(key_path: impl Into<String>) -> Self {
        Self {
            key_path: key_path.into(),
            auto_increment: false,
        }
    }
}

/// Name and version of a database
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatabaseInfo {
    pub name: String,
    pub version: u64,
}

impl std::fmt::Display for DatabaseInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} (v{})", self.name, self.version)
    }
}

/// Resolve the version an open request lands on
///
/// Returns `(target, needs_upgrade)` given the stored version (0 if the
/// database does not exist yet).
pub(crate) fn resolve_version(requested: Option<u64>, current: u64) -> Result<(u64, bool)> {
    use crate::EngineError;

    match requested {
        Some(0) => Err(EngineError::InvalidVersion(0)),
        Some(v) if v < current => Err(EngineError::VersionError {
            requested: v,
            current,
        }),
        Some(v) => Ok((v, v > current)),
        None if current == 0 => Ok((1, true)),
        None => Ok((current, false)),
    }
}
