//! kvstash Engine - Versioned object-store substrate
//!
//! This crate provides the storage substrate the store layer runs on:
//! named, versioned databases holding named object stores, each keyed by
//! one field of its records. Two backends are provided:
//! - In-memory (for testing and embedding)
//! - redb (persistent embedded database)
//!
//! ## Model
//!
//! - Opening a database at a newer version runs an upgrade hook inside a
//!   single exclusive schema transaction; that is the only place stores
//!   can be created or dropped.
//! - A connection is bound to one database version and becomes stale once
//!   the database is upgraded past it.
//! - Every read or write goes through a transaction scoped to one store.

mod error;
mod key;
mod memory;
mod provider;
mod record;
mod redb_engine;

pub use error::{EngineError, Result};
pub use key::Key;
pub use memory::MemoryEngine;
pub use provider::{
    Connection, DatabaseInfo, SchemaEditor, StorageEngine, StoreSchema, Transaction,
    TransactionMode, UpgradeHook,
};
pub use record::Record;
pub use redb_engine::RedbEngine;
