//! Store engine adapter
//!
//! Turns each CRUD intent into exactly one open-connection, one-transaction
//! cycle on a blocking worker, and hands the outcome back through a
//! single-use completion channel.
//!
//! Connections are never pooled or reused: every call opens a fresh one at
//! the version it was given.

use crate::{Result, StoreError};
use kvstash_engine::{
    Connection, EngineError, Key, Record, SchemaEditor, StorageEngine, TransactionMode,
};
use std::sync::Arc;
use tokio::sync::oneshot;
use tracing::{debug, warn};

/// Where an operation lands
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreTarget {
    pub db_name: String,
    pub store_name: String,
    /// Version to open at; `None` opens whatever version is stored
    pub version: Option<u64>,
    pub debug: bool,
}

impl StoreTarget {
    pub fn new(db_name: impl Into<String>, store_name: impl Into<String>) -> Self {
        Self {
            db_name: db_name.into(),
            store_name: store_name.into(),
            version: None,
            debug: false,
        }
    }

    pub fn at_version(mut self, version: u64) -> Self {
        self.version = Some(version);
        self
    }

    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    fn open_error(&self, source: EngineError) -> StoreError {
        StoreError::Open {
            database: self.db_name.clone(),
            source,
        }
    }

    fn write_error(&self, source: EngineError) -> StoreError {
        StoreError::Write {
            store: self.store_name.clone(),
            source,
        }
    }

    fn read_error(&self, source: EngineError) -> StoreError {
        StoreError::Read {
            store: self.store_name.clone(),
            source,
        }
    }
}

/// Async CRUD over a [`StorageEngine`]
#[derive(Clone)]
pub struct StoreAdapter {
    engine: Arc<dyn StorageEngine>,
}

impl StoreAdapter {
    pub fn new(engine: Arc<dyn StorageEngine>) -> Self {
        Self { engine }
    }

    pub fn engine(&self) -> &Arc<dyn StorageEngine> {
        &self.engine
    }

    /// Open the database, creating the store keyed by `key_field` if an
    /// upgrade runs and the store is absent
    ///
    /// Returns the version the database was opened at. Fails if the store
    /// is still missing afterwards (the database existed at this version
    /// without it); bump the version to create it.
    pub async fn initialize(&self, target: &StoreTarget, key_field: &str) -> Result<u64> {
        let engine = Arc::clone(&self.engine);
        let target = target.clone();
        let key_field = key_field.to_string();

        let outcome_target = target.clone();
        let result = run("initialize", move || {
            let conn = engine
                .open(
                    &target.db_name,
                    target.version,
                    &mut |schema: &mut dyn SchemaEditor| -> kvstash_engine::Result<()> {
                        if !schema.contains_store(&target.store_name) {
                            if target.debug {
                                debug!(
                                    database = %target.db_name,
                                    store = %target.store_name,
                                    key = %key_field,
                                    "creating object store"
                                );
                            }
                            schema.create_store(&target.store_name, &key_field)?;
                        }
                        Ok(())
                    },
                )
                .map_err(|e| target.open_error(e))?;

            if !conn.store_names().contains(&target.store_name) {
                return Err(target.open_error(EngineError::StoreNotFound(
                    target.store_name.clone(),
                )));
            }
            Ok(conn.version())
        })
        .await;

        trace_outcome("initialize", &outcome_target, &result);
        result
    }

    /// Insert a record whose key must not exist yet
    pub async fn add(&self, target: &StoreTarget, record: Record) -> Result<Record> {
        let engine = Arc::clone(&self.engine);
        let target = target.clone();

        let outcome_target = target.clone();
        let result = run("add", move || {
            let conn = connect(engine.as_ref(), &target)?;
            let mut tx = conn
                .transaction(&target.store_name, TransactionMode::ReadWrite)
                .map_err(|e| target.write_error(e))?;
            tx.add(&record).map_err(|e| target.write_error(e))?;
            tx.commit().map_err(|e| target.write_error(e))?;
            Ok(record)
        })
        .await;

        trace_outcome("add", &outcome_target, &result);
        result
    }

    /// Delete the record under `key`; an absent key is not an error
    pub async fn delete(&self, target: &StoreTarget, key: impl Into<Key>) -> Result<()> {
        let engine = Arc::clone(&self.engine);
        let target = target.clone();
        let key = key.into();

        let outcome_target = target.clone();
        let result = run("delete", move || {
            key.validate().map_err(StoreError::Conversion)?;
            let conn = connect(engine.as_ref(), &target)?;
            let mut tx = conn
                .transaction(&target.store_name, TransactionMode::ReadWrite)
                .map_err(|e| target.write_error(e))?;
            tx.delete(&key).map_err(|e| target.write_error(e))?;
            tx.commit().map_err(|e| target.write_error(e))?;
            Ok(())
        })
        .await;

        trace_outcome("delete", &outcome_target, &result);
        result
    }

    /// Shallow-merge `patch` over the record under `key` and write it back
    ///
    /// Upserts: an absent key starts from an empty record. If the merged
    /// record has no key field, `key` is written into it.
    pub async fn update(
        &self,
        target: &StoreTarget,
        key: impl Into<Key>,
        patch: Record,
    ) -> Result<Record> {
        let engine = Arc::clone(&self.engine);
        let target = target.clone();
        let key = key.into();

        let outcome_target = target.clone();
        let result = run("update", move || {
            key.validate().map_err(StoreError::Conversion)?;
            let conn = connect(engine.as_ref(), &target)?;
            let mut tx = conn
                .transaction(&target.store_name, TransactionMode::ReadWrite)
                .map_err(|e| target.write_error(e))?;

            let mut merged = tx
                .get(&key)
                .map_err(|e| target.read_error(e))?
                .unwrap_or_default();
            merged.merge(&patch);
            if merged.key(tx.key_path()).is_none() {
                merged.insert(tx.key_path().to_string(), key.to_value());
            }

            tx.put(&merged).map_err(|e| target.write_error(e))?;
            tx.commit().map_err(|e| target.write_error(e))?;
            Ok(merged)
        })
        .await;

        trace_outcome("update", &outcome_target, &result);
        result
    }

    /// Every record in the store, in key order
    pub async fn list_all(&self, target: &StoreTarget) -> Result<Vec<Record>> {
        let engine = Arc::clone(&self.engine);
        let target = target.clone();

        let outcome_target = target.clone();
        let result = run("list_all", move || {
            let conn = connect(engine.as_ref(), &target)?;
            let tx = conn
                .transaction(&target.store_name, TransactionMode::ReadOnly)
                .map_err(|e| target.read_error(e))?;
            tx.get_all().map_err(|e| target.read_error(e))
        })
        .await;

        trace_outcome("list_all", &outcome_target, &result);
        result
    }
}

/// Open a connection for a data operation
///
/// Data operations never upgrade: a version newer than the stored one is
/// refused instead of silently bumping the schema.
fn connect(engine: &dyn StorageEngine, target: &StoreTarget) -> Result<Box<dyn Connection>> {
    engine
        .open(
            &target.db_name,
            target.version,
            &mut |schema: &mut dyn SchemaEditor| -> kvstash_engine::Result<()> {
                Err(EngineError::upgrade_aborted(format!(
                    "version {} has not been initialized",
                    schema.new_version()
                )))
            },
        )
        .map_err(|e| target.open_error(e))
}

/// Run `work` on a blocking worker and wait for its single result
async fn run<T, F>(op: &'static str, work: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T> + Send + 'static,
{
    let (tx, rx) = oneshot::channel();
    tokio::task::spawn_blocking(move || {
        // The caller may have stopped waiting; nothing to do then
        let _ = tx.send(work());
    });
    rx.await.map_err(|_| StoreError::Interrupted(op))?
}

fn trace_outcome<T>(op: &str, target: &StoreTarget, result: &Result<T>) {
    match result {
        Ok(_) if target.debug => debug!(
            op,
            database = %target.db_name,
            store = %target.store_name,
            "request succeeded"
        ),
        Ok(_) => {}
        Err(err) => warn!(
            op,
            database = %target.db_name,
            store = %target.store_name,
            error = %err,
            "request failed"
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kvstash_engine::MemoryEngine;
    use serde_json::json;

    fn record(value: serde_json::Value) -> Record {
        Record::try_from(value).unwrap()
    }

    async fn ready_adapter() -> (StoreAdapter, StoreTarget) {
        let adapter = StoreAdapter::new(Arc::new(MemoryEngine::new()));
        let target = StoreTarget::new("testdb", "users").at_version(1);
        let version = adapter.initialize(&target, "id").await.unwrap();
        assert_eq!(version, 1);
        (adapter, target)
    }

    #[tokio::test]
    async fn test_initialize_is_idempotent() {
        let (adapter, target) = ready_adapter().await;
        assert_eq!(adapter.initialize(&target, "id").await.unwrap(), 1);
        assert_eq!(
            adapter.initialize(&StoreTarget::new("testdb", "users"), "id").await.unwrap(),
            1
        );
    }

    #[tokio::test]
    async fn test_initialize_missing_store_without_upgrade_fails() {
        let (adapter, _) = ready_adapter().await;
        let err = adapter
            .initialize(&StoreTarget::new("testdb", "orders").at_version(1), "orderId")
            .await
            .unwrap_err();
        assert!(err.is_missing_store());

        let version = adapter
            .initialize(&StoreTarget::new("testdb", "orders").at_version(2), "orderId")
            .await
            .unwrap();
        assert_eq!(version, 2);
    }

    #[tokio::test]
    async fn test_add_then_list() {
        let (adapter, target) = ready_adapter().await;
        let ann = record(json!({"id": 1, "name": "Ann", "email": "a@x.com"}));

        assert_eq!(adapter.add(&target, ann.clone()).await.unwrap(), ann);
        assert_eq!(adapter.list_all(&target).await.unwrap(), vec![ann]);
    }

    #[tokio::test]
    async fn test_add_duplicate_reports_error() {
        let (adapter, target) = ready_adapter().await;
        adapter.add(&target, record(json!({"id": 1}))).await.unwrap();

        let err = adapter.add(&target, record(json!({"id": 1}))).await.unwrap_err();
        assert!(err.is_duplicate_key());
        assert_eq!(adapter.list_all(&target).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_update_merges_and_upserts() {
        let (adapter, target) = ready_adapter().await;
        adapter
            .add(&target, record(json!({"id": 1, "name": "Ann", "email": "a@x.com"})))
            .await
            .unwrap();

        let merged = adapter
            .update(&target, 1, record(json!({"email": "ann@y.com"})))
            .await
            .unwrap();
        assert_eq!(merged, record(json!({"id": 1, "name": "Ann", "email": "ann@y.com"})));

        let created = adapter
            .update(&target, 2, record(json!({"name": "Bo"})))
            .await
            .unwrap();
        assert_eq!(created, record(json!({"id": 2, "name": "Bo"})));
        assert_eq!(adapter.list_all(&target).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_delete_is_idempotent() {
        let (adapter, target) = ready_adapter().await;
        adapter.add(&target, record(json!({"id": "a"}))).await.unwrap();

        adapter.delete(&target, "a").await.unwrap();
        adapter.delete(&target, "a").await.unwrap();
        assert!(adapter.list_all(&target).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_operations_before_initialize_fail_without_upgrading() {
        let engine = Arc::new(MemoryEngine::new());
        let adapter = StoreAdapter::new(engine.clone());
        let target = StoreTarget::new("testdb", "users").at_version(1);

        let err = adapter.list_all(&target).await.unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::Open);
        assert!(engine.databases().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_nan_key_is_rejected_before_opening() {
        let (adapter, target) = ready_adapter().await;

        let err = adapter.delete(&target, f64::NAN).await.unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::Conversion);
        let err = adapter
            .update(&target, f64::NAN, record(json!({"name": "x"})))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::Conversion);
        assert!(adapter.list_all(&target).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_update_on_missing_store_fails_without_writing() {
        let (adapter, target) = ready_adapter().await;
        let err = adapter
            .update(
                &StoreTarget::new("testdb", "nope").at_version(1),
                1,
                record(json!({"name": "x"})),
            )
            .await
            .unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::Write);
        assert!(err.is_missing_store());
        assert!(adapter.list_all(&target).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_missing_store_is_a_read_failure() {
        let (adapter, _) = ready_adapter().await;
        let err = adapter
            .list_all(&StoreTarget::new("testdb", "nope").at_version(1))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::Read);
        assert!(err.is_missing_store());
    }
}
