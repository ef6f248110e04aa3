//! In-memory engine implementation

use crate::provider::resolve_version;
use crate::{
    Connection, DatabaseInfo, EngineError, Key, Record, Result, SchemaEditor, StorageEngine,
    StoreSchema, Transaction, TransactionMode, UpgradeHook,
};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

#[derive(Debug, Clone)]
struct MemoryStore {
    schema: StoreSchema,
    records: BTreeMap<Key, Record>,
}

#[derive(Debug, Default)]
struct MemoryDatabase {
    version: u64,
    stores: BTreeMap<String, MemoryStore>,
}

type SharedDatabase = Arc<RwLock<MemoryDatabase>>;

/// In-memory engine
///
/// Fast, non-persistent storage for tests and embedding.
/// All databases are lost when the last clone of the engine is dropped.
#[derive(Clone, Default)]
pub struct MemoryEngine {
    databases: Arc<RwLock<HashMap<String, SharedDatabase>>>,
}

impl MemoryEngine {
    /// Create a new engine with no databases
    pub fn new() -> Self {
        Self::default()
    }
}

impl StorageEngine for MemoryEngine {
    fn open(
        &self,
        name: &str,
        version: Option<u64>,
        upgrade: UpgradeHook<'_>,
    ) -> Result<Box<dyn Connection>> {
        // Fast path: the database exists at a usable version
        let existing = self.databases.read()?.get(name).cloned();
        if let Some(db) = existing {
            let current = db.read()?.version;
            let (target, needs_upgrade) = resolve_version(version, current)?;
            if !needs_upgrade {
                return Ok(Box::new(MemoryConnection {
                    name: name.to_string(),
                    version: target,
                    database: db,
                }));
            }
        }

        // The registry write lock is held across the upgrade so upgrades
        // never overlap; the version is re-read under it
        let mut databases = self.databases.write()?;
        let existing = databases.get(name).cloned();
        let current = match &existing {
            Some(db) => db.read()?.version,
            None => 0,
        };
        let (target, needs_upgrade) = resolve_version(version, current)?;

        let database = match existing {
            Some(db) if !needs_upgrade => db,
            existing => {
                tracing::debug!(database = name, from = current, to = target, "upgrading database");
                let db = existing.unwrap_or_default();
                {
                    let mut guard = db.write()?;
                    let mut editor = MemorySchemaEditor {
                        old_version: current,
                        new_version: target,
                        stores: guard.stores.clone(),
                    };
                    upgrade(&mut editor)?;
                    guard.stores = editor.stores;
                    guard.version = target;
                }
                databases.insert(name.to_string(), Arc::clone(&db));
                db
            }
        };

        Ok(Box::new(MemoryConnection {
            name: name.to_string(),
            version: target,
            database,
        }))
    }

    fn databases(&self) -> Result<Vec<DatabaseInfo>> {
        let databases = self.databases.read()?;
        let mut infos = Vec::with_capacity(databases.len());
        for (name, db) in databases.iter() {
            infos.push(DatabaseInfo {
                name: name.clone(),
                version: db.read()?.version,
            });
        }
        infos.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(infos)
    }

    fn delete_database(&self, name: &str) -> Result<()> {
        self.databases.write()?.remove(name);
        Ok(())
    }
}

struct MemorySchemaEditor {
    old_version: u64,
    new_version: u64,
    stores: BTreeMap<String, MemoryStore>,
}

impl SchemaEditor for MemorySchemaEditor {
    fn old_version(&self) -> u64 {
        self.old_version
    }

    fn new_version(&self) -> u64 {
        self.new_version
    }

    fn store_names(&self) -> Vec<String> {
        self.stores.keys().cloned().collect()
    }

    fn contains_store(&self, name: &str) -> bool {
        self.stores.contains_key(name)
    }

    fn create_store(&mut self, name: &str, key_path: &str) -> Result<()> {
        if self.stores.contains_key(name) {
            return Err(EngineError::StoreExists(name.to_string()));
        }
        self.stores.insert(
            name.to_string(),
            MemoryStore {
                schema: StoreSchema::new(key_path),
                records: BTreeMap::new(),
            },
        );
        Ok(())
    }

    fn delete_store(&mut self, name: &str) -> Result<()> {
        self.stores
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| EngineError::StoreNotFound(name.to_string()))
    }
}

struct MemoryConnection {
    name: String,
    version: u64,
    database: SharedDatabase,
}

impl MemoryConnection {
    fn check_current(&self, db: &MemoryDatabase) -> Result<()> {
        if db.version != self.version {
            return Err(EngineError::VersionError {
                requested: self.version,
                current: db.version,
            });
        }
        Ok(())
    }
}

impl Connection for MemoryConnection {
    fn name(&self) -> &str {
        &self.name
    }

    fn version(&self) -> u64 {
        self.version
    }

    fn store_names(&self) -> Vec<String> {
        match self.database.read() {
            Ok(db) => db.stores.keys().cloned().collect(),
            Err(_) => Vec::new(),
        }
    }

    fn transaction(
        &self,
        store: &str,
        mode: TransactionMode,
    ) -> Result<Box<dyn Transaction + '_>> {
        let access = match mode {
            TransactionMode::ReadOnly => Access::Read(self.database.read()?),
            TransactionMode::ReadWrite => Access::Write {
                guard: self.database.write()?,
                changes: BTreeMap::new(),
            },
        };

        let db = access.database();
        self.check_current(db)?;
        let key_path = db
            .stores
            .get(store)
            .map(|s| s.schema.key_path.clone())
            .ok_or_else(|| EngineError::StoreNotFound(store.to_string()))?;

        Ok(Box::new(MemoryTransaction {
            store: store.to_string(),
            key_path,
            access,
        }))
    }
}

enum Access<'a> {
    Read(RwLockReadGuard<'a, MemoryDatabase>),
    /// Holds the database write lock for the whole transaction. Writes are
    /// recorded in `changes` (`None` marks a delete) and applied on commit.
    Write {
        guard: RwLockWriteGuard<'a, MemoryDatabase>,
        changes: BTreeMap<Key, Option<Record>>,
    },
}

impl Access<'_> {
    fn database(&self) -> &MemoryDatabase {
        match self {
            Access::Read(guard) => &**guard,
            Access::Write { guard, .. } => &**guard,
        }
    }
}

/// In-memory transaction
struct MemoryTransaction<'a> {
    store: String,
    key_path: String,
    access: Access<'a>,
}

impl MemoryTransaction<'_> {
    /// Committed records of the store
    fn base(&self) -> Option<&BTreeMap<Key, Record>> {
        self.access
            .database()
            .stores
            .get(&self.store)
            .map(|s| &s.records)
    }

    fn lookup(&self, key: &Key) -> Option<&Record> {
        if let Access::Write { changes, .. } = &self.access {
            if let Some(change) = changes.get(key) {
                return change.as_ref();
            }
        }
        self.base().and_then(|r| r.get(key))
    }

    fn changes_mut(&mut self) -> Result<&mut BTreeMap<Key, Option<Record>>> {
        match &mut self.access {
            Access::Write { changes, .. } => Ok(changes),
            Access::Read(_) => Err(EngineError::ReadOnly(self.store.clone())),
        }
    }
}

impl Transaction for MemoryTransaction<'_> {
    fn mode(&self) -> TransactionMode {
        match self.access {
            Access::Read(_) => TransactionMode::ReadOnly,
            Access::Write { .. } => TransactionMode::ReadWrite,
        }
    }

    fn key_path(&self) -> &str {
        &self.key_path
    }

    fn add(&mut self, record: &Record) -> Result<Key> {
        let key = record.require_key(&self.key_path)?;
        if self.lookup(&key).is_some() {
            return Err(EngineError::ConstraintError {
                store: self.store.clone(),
                key: key.to_string(),
            });
        }
        self.changes_mut()?.insert(key.clone(), Some(record.clone()));
        Ok(key)
    }

    fn get(&self, key: &Key) -> Result<Option<Record>> {
        Ok(self.lookup(key).cloned())
    }

    fn put(&mut self, record: &Record) -> Result<Key> {
        let key = record.require_key(&self.key_path)?;
        self.changes_mut()?.insert(key.clone(), Some(record.clone()));
        Ok(key)
    }

    fn delete(&mut self, key: &Key) -> Result<()> {
        self.changes_mut()?.insert(key.clone(), None);
        Ok(())
    }

    fn get_all(&self) -> Result<Vec<Record>> {
        let mut view: BTreeMap<&Key, &Record> = self
            .base()
            .map(|r| r.iter().collect())
            .unwrap_or_default();
        if let Access::Write { changes, .. } = &self.access {
            for (key, change) in changes {
                match change {
                    Some(record) => view.insert(key, record),
                    None => view.remove(key),
                };
            }
        }
        Ok(view.into_values().cloned().collect())
    }

    fn commit(self: Box<Self>) -> Result<()> {
        let MemoryTransaction { store, access, .. } = *self;
        if let Access::Write { mut guard, changes } = access {
            let Some(target) = guard.stores.get_mut(&store) else {
                return Err(EngineError::StoreNotFound(store));
            };
            for (key, change) in changes {
                match change {
                    Some(record) => target.records.insert(key, record),
                    None => target.records.remove(&key),
                };
            }
        }
        Ok(())
    }

    fn abort(self: Box<Self>) -> Result<()> {
        // Dropping the change set discards all writes
        Ok(())
    }
}
