//! kvstash - Async CRUD over versioned, embedded object stores
//!
//! This is the root workspace crate that provides integration tests.
//! The actual implementation is in the workspace member crates.

// Re-export main crates for convenience
pub use kvstash_engine as engine;
pub use kvstash_store as store;

pub use kvstash_engine::{Key, MemoryEngine, Record, RedbEngine, StorageEngine};
pub use kvstash_store::{StoreConfig, StoreError, StoreHandle};
