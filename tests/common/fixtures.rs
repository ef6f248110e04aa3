use kvstash::{MemoryEngine, Record, RedbEngine, StorageEngine};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use tempfile::TempDir;

/// Record shape of the demo users store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: u64,
    pub name: String,
    pub email: String,
}

/// Build a user record keyed by `id`
pub fn user(id: u64, name: &str, email: &str) -> Record {
    Record::try_from(json!({ "id": id, "name": name, "email": email }))
        .expect("user fixture is an object")
}

/// Build an arbitrary record from JSON
pub fn record(value: serde_json::Value) -> Record {
    Record::try_from(value).expect("fixture must be a JSON object")
}

pub fn memory_engine() -> Arc<dyn StorageEngine> {
    Arc::new(MemoryEngine::new())
}

/// Persistent engine in a fresh temporary directory
///
/// Keep the returned directory alive for as long as the engine is used.
pub fn redb_engine() -> (Arc<dyn StorageEngine>, TempDir) {
    let dir = tempfile::tempdir().expect("Failed to create temp dir");
    let engine = RedbEngine::new(dir.path()).expect("Failed to create redb engine");
    (Arc::new(engine), dir)
}
