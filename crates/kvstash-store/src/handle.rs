//! Lifecycle facade over the adapter
//!
//! A [`StoreHandle`] owns one logical connection's state: the configured
//! database/store, the version the database was last opened at, and a
//! readiness flag. Callers pass only records, keys and patches.

use crate::adapter::{StoreAdapter, StoreTarget};
use crate::{Result, StoreConfig, StoreError};
use kvstash_engine::{Key, Record, StorageEngine};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::watch;
use tracing::{info, warn};

struct Session {
    config: StoreConfig,
    /// Version captured from the last successful open
    version: u64,
    /// Bumped on every reconfiguration so a superseded initialize
    /// cannot flip readiness for the new configuration
    generation: u64,
}

/// Handle bound to one store of one database
///
/// Readiness starts `false` and only turns `true` once initialization has
/// opened the database and the store exists. Operations issued before that
/// are not held back; they fail at the open or transaction step.
pub struct StoreHandle {
    adapter: StoreAdapter,
    session: Mutex<Session>,
    ready: watch::Sender<bool>,
}

impl StoreHandle {
    /// Create a handle without initializing it
    pub fn new(engine: Arc<dyn StorageEngine>, config: StoreConfig) -> Result<Self> {
        config.validate()?;
        let (ready, _) = watch::channel(false);
        Ok(Self {
            adapter: StoreAdapter::new(engine),
            session: Mutex::new(Session {
                version: config.version,
                config,
                generation: 0,
            }),
            ready,
        })
    }

    /// Create a handle and run initialization once
    ///
    /// Only an invalid configuration is an error; a failed initialization
    /// leaves the handle not ready.
    pub async fn configure(engine: Arc<dyn StorageEngine>, config: StoreConfig) -> Result<Self> {
        let handle = Self::new(engine, config)?;
        handle.initialize().await;
        Ok(handle)
    }

    fn session(&self) -> MutexGuard<'_, Session> {
        self.session.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn target(&self) -> StoreTarget {
        let session = self.session();
        StoreTarget::new(&session.config.db_name, &session.config.store_name)
            .at_version(session.version)
            .with_debug(session.config.debug)
    }

    /// Open the database (creating the store if needed) and update readiness
    pub async fn initialize(&self) -> bool {
        let (config, generation) = {
            let session = self.session();
            (session.config.clone(), session.generation)
        };
        let target = StoreTarget::new(&config.db_name, &config.store_name)
            .at_version(config.version)
            .with_debug(config.debug);

        let result = self.adapter.initialize(&target, &config.unique_key).await;

        let mut session = self.session();
        if session.generation != generation {
            // A reconfiguration happened meanwhile; its own initialize decides
            return *self.ready.borrow();
        }
        let ready = match result {
            Ok(version) => {
                session.version = version;
                if config.debug {
                    info!(
                        database = %config.db_name,
                        store = %config.store_name,
                        version,
                        "store ready"
                    );
                }
                true
            }
            Err(err) => {
                warn!(
                    database = %config.db_name,
                    store = %config.store_name,
                    error = %err,
                    "store initialization failed"
                );
                false
            }
        };
        self.ready.send_replace(ready);
        ready
    }

    /// Switch to a new configuration
    ///
    /// Re-initializes only when the database, store, key or version
    /// changed; a debug-only change applies immediately.
    pub async fn reconfigure(&self, config: StoreConfig) -> Result<bool> {
        config.validate()?;
        {
            let mut session = self.session();
            if !session.config.needs_reinit(&config) {
                session.config.debug = config.debug;
                return Ok(*self.ready.borrow());
            }
            session.version = config.version;
            session.config = config;
            session.generation += 1;
            self.ready.send_replace(false);
        }
        Ok(self.initialize().await)
    }

    pub fn is_ready(&self) -> bool {
        *self.ready.borrow()
    }

    /// Watch readiness changes
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.ready.subscribe()
    }

    /// Wait until the handle is ready
    ///
    /// There is no timeout: if initialization keeps failing this waits
    /// until a reconfiguration succeeds.
    pub async fn wait_ready(&self) {
        let mut rx = self.ready.subscribe();
        // The sender lives in `self`, so the channel cannot close while we borrow it
        let _ = rx.wait_for(|ready| *ready).await;
    }

    pub fn config(&self) -> StoreConfig {
        self.session().config.clone()
    }

    /// Version subsequent operations open the database at
    pub fn version(&self) -> u64 {
        self.session().version
    }

    pub async fn add(&self, record: Record) -> Result<Record> {
        self.adapter.add(&self.target(), record).await
    }

    pub async fn remove(&self, key: impl Into<Key>) -> Result<()> {
        self.adapter.delete(&self.target(), key).await
    }

    pub async fn update(&self, key: impl Into<Key>, patch: Record) -> Result<Record> {
        self.adapter.update(&self.target(), key, patch).await
    }

    pub async fn list_all(&self) -> Result<Vec<Record>> {
        self.adapter.list_all(&self.target()).await
    }

    /// Insert a typed value
    pub async fn add_as<T>(&self, value: &T) -> Result<T>
    where
        T: Serialize + DeserializeOwned,
    {
        let record = Record::from_serialize(value).map_err(StoreError::Conversion)?;
        let stored = self.add(record).await?;
        stored.into_typed().map_err(StoreError::Conversion)
    }

    /// Merge a typed patch and read the result back as `T`
    pub async fn update_as<T, P>(&self, key: impl Into<Key>, patch: &P) -> Result<T>
    where
        T: DeserializeOwned,
        P: Serialize + ?Sized,
    {
        let patch = Record::from_serialize(patch).map_err(StoreError::Conversion)?;
        let merged = self.update(key, patch).await?;
        merged.into_typed().map_err(StoreError::Conversion)
    }

    /// Every record of the store as `T`
    pub async fn list_as<T: DeserializeOwned>(&self) -> Result<Vec<T>> {
        self.list_all()
            .await?
            .into_iter()
            .map(|record| record.into_typed().map_err(StoreError::Conversion))
            .collect()
    }
}
