//! End-to-end tests for the store layer
//!
//! These run the same scenarios against the in-memory and redb engines.

mod common;

use common::fixtures::{memory_engine, record, redb_engine, user, User};
use kvstash::engine::{SchemaEditor, StorageEngine};
use kvstash::store::{ErrorKind, StoreAdapter, StoreTarget};
use kvstash::{RedbEngine, StoreConfig, StoreHandle};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// initialize → add → list → update → delete → list
async fn users_scenario(engine: Arc<dyn StorageEngine>) {
    kvstash::store::init_logging();
    let adapter = StoreAdapter::new(engine);
    let target = StoreTarget::new("testdb", "users");

    let version = adapter.initialize(&target, "id").await.unwrap();
    assert_eq!(version, 1);
    let target = target.at_version(version);

    let ann = user(1, "Ann", "a@x.com");
    assert_eq!(adapter.add(&target, ann.clone()).await.unwrap(), ann);
    assert_eq!(adapter.list_all(&target).await.unwrap(), vec![ann]);

    let updated = adapter
        .update(&target, 1, record(serde_json::json!({"email": "ann@y.com"})))
        .await
        .unwrap();
    assert_eq!(updated, user(1, "Ann", "ann@y.com"));

    adapter.delete(&target, 1).await.unwrap();
    assert!(adapter.list_all(&target).await.unwrap().is_empty());
}

#[tokio::test]
async fn e2e_users_scenario_memory() {
    users_scenario(memory_engine()).await;
}

#[tokio::test]
async fn e2e_users_scenario_redb() {
    let (engine, _dir) = redb_engine();
    users_scenario(engine).await;
}

#[tokio::test]
async fn e2e_initialize_twice_keeps_store_and_records() {
    let (engine, _dir) = redb_engine();
    let config = StoreConfig::new("users", "id").with_db_name("testdb");

    let first = StoreHandle::configure(engine.clone(), config.clone()).await.unwrap();
    assert!(first.is_ready());
    first.add(user(7, "Sam", "s@x.com")).await.unwrap();

    let second = StoreHandle::configure(engine.clone(), config).await.unwrap();
    assert!(second.is_ready());
    assert!(second.initialize().await);
    assert_eq!(second.list_all().await.unwrap(), vec![user(7, "Sam", "s@x.com")]);
}

#[tokio::test]
async fn e2e_delete_absent_key_succeeds() {
    let handle = StoreHandle::configure(memory_engine(), StoreConfig::new("users", "id"))
        .await
        .unwrap();
    handle.add(user(1, "Ann", "a@x.com")).await.unwrap();
    handle.add(user(2, "Bo", "b@x.com")).await.unwrap();

    handle.remove(1).await.unwrap();
    handle.remove(42).await.unwrap();
    assert_eq!(handle.list_all().await.unwrap(), vec![user(2, "Bo", "b@x.com")]);
}

#[tokio::test]
async fn e2e_update_absent_key_upserts() {
    let handle = StoreHandle::configure(memory_engine(), StoreConfig::new("users", "id"))
        .await
        .unwrap();

    let created = handle
        .update(5, record(serde_json::json!({"name": "Eve"})))
        .await
        .unwrap();
    assert_eq!(created, record(serde_json::json!({"id": 5, "name": "Eve"})));

    let merged = handle
        .update(5, record(serde_json::json!({"email": "e@x.com"})))
        .await
        .unwrap();
    assert_eq!(merged, user(5, "Eve", "e@x.com"));
}

#[tokio::test]
async fn e2e_duplicate_add_is_reported_not_panicked() {
    let handle = StoreHandle::configure(memory_engine(), StoreConfig::new("users", "id"))
        .await
        .unwrap();
    handle.add(user(1, "Ann", "a@x.com")).await.unwrap();

    let err = handle.add(user(1, "Other", "o@x.com")).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Write);
    assert!(err.is_duplicate_key());
    assert!(!err.to_string().is_empty());
    assert_eq!(handle.list_all().await.unwrap(), vec![user(1, "Ann", "a@x.com")]);
}

#[tokio::test]
async fn e2e_version_bump_creates_each_missing_store_once() {
    let (engine, _dir) = redb_engine();
    let adapter = StoreAdapter::new(engine.clone());

    adapter
        .initialize(&StoreTarget::new("testdb", "users").at_version(1), "id")
        .await
        .unwrap();
    adapter
        .initialize(&StoreTarget::new("testdb", "orders").at_version(2), "orderId")
        .await
        .unwrap();
    // Same version again: no upgrade, both stores still there
    adapter
        .initialize(&StoreTarget::new("testdb", "users").at_version(2), "id")
        .await
        .unwrap();

    let mut upgrades = 0;
    let conn = engine
        .open(
            "testdb",
            Some(3),
            &mut |schema: &mut dyn SchemaEditor| -> kvstash::engine::Result<()> {
                upgrades += 1;
                assert_eq!(schema.store_names(), vec!["orders", "users"]);
                Ok(())
            },
        )
        .unwrap();
    assert_eq!(upgrades, 1);
    assert_eq!(conn.version(), 3);
}

#[tokio::test]
async fn e2e_typed_users_survive_restart() {
    let dir = tempfile::tempdir().unwrap();
    let config = StoreConfig::new("users", "id").with_db_name("app");
    let ann = User {
        id: 1,
        name: "Ann".into(),
        email: "a@x.com".into(),
    };

    {
        let engine: Arc<dyn StorageEngine> = Arc::new(RedbEngine::new(dir.path()).unwrap());
        let handle = StoreHandle::configure(engine, config.clone()).await.unwrap();
        handle.add_as(&ann).await.unwrap();
    }

    let engine: Arc<dyn StorageEngine> = Arc::new(RedbEngine::new(dir.path()).unwrap());
    let handle = StoreHandle::configure(engine, config).await.unwrap();
    assert!(handle.is_ready());
    assert_eq!(handle.list_as::<User>().await.unwrap(), vec![ann]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn e2e_concurrent_adds_all_land() {
    let (engine, _dir) = redb_engine();
    let handle = Arc::new(
        StoreHandle::configure(engine, StoreConfig::new("users", "id"))
            .await
            .unwrap(),
    );

    let mut tasks = Vec::new();
    for id in 0..16u64 {
        let handle = Arc::clone(&handle);
        tasks.push(tokio::spawn(async move {
            handle
                .add(user(id, &format!("user{}", id), "x@x.com"))
                .await
        }));
    }
    for task in tasks {
        task.await.unwrap().unwrap();
    }

    let ids: Vec<u64> = handle
        .list_as::<User>()
        .await
        .unwrap()
        .into_iter()
        .map(|u| u.id)
        .collect();
    assert_eq!(ids, (0..16).collect::<Vec<_>>());
}

#[tokio::test]
async fn e2e_operations_before_ready_fail() {
    let engine = memory_engine();
    let handle = StoreHandle::new(engine, StoreConfig::new("users", "id")).unwrap();
    assert!(!handle.is_ready());

    let err = handle.add(user(1, "Ann", "a@x.com")).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Open);

    assert!(handle.initialize().await);
    handle.add(user(1, "Ann", "a@x.com")).await.unwrap();
}

/// Many first opens of a fresh database race; exactly one upgrade runs
async fn concurrent_first_open(engine: Arc<dyn StorageEngine>) {
    let upgrades = Arc::new(AtomicUsize::new(0));

    let mut tasks = Vec::new();
    for _ in 0..16 {
        let engine = Arc::clone(&engine);
        let upgrades = Arc::clone(&upgrades);
        tasks.push(tokio::task::spawn_blocking(move || {
            let conn = engine.open(
                "racedb",
                Some(1),
                &mut |schema: &mut dyn SchemaEditor| -> kvstash::engine::Result<()> {
                    upgrades.fetch_add(1, Ordering::SeqCst);
                    schema.create_store("users", "id")
                },
            )?;
            Ok::<_, kvstash::engine::EngineError>(conn.version())
        }));
    }
    for task in tasks {
        assert_eq!(task.await.unwrap().unwrap(), 1);
    }
    assert_eq!(upgrades.load(Ordering::SeqCst), 1);

    // Same race through the facade, this time bumping to version 2
    let tasks: Vec<_> = (0..16)
        .map(|_| {
            let config = StoreConfig::new("orders", "orderId")
                .with_db_name("racedb")
                .with_version(2);
            tokio::spawn(StoreHandle::configure(Arc::clone(&engine), config))
        })
        .collect();
    for task in tasks {
        let handle = task.await.unwrap().unwrap();
        assert!(handle.is_ready());
        assert_eq!(handle.version(), 2);
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn e2e_concurrent_first_open_upgrades_once_memory() {
    concurrent_first_open(memory_engine()).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn e2e_concurrent_first_open_upgrades_once_redb() {
    let (engine, _dir) = redb_engine();
    concurrent_first_open(engine).await;
}
