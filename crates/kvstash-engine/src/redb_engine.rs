//! redb-based persistent engine implementation

use crate::provider::resolve_version;
use crate::{
    Connection, DatabaseInfo, EngineError, Key, Record, Result, SchemaEditor, StorageEngine,
    StoreSchema, Transaction, TransactionMode, UpgradeHook,
};
use redb::{
    Database, ReadTransaction, ReadableTable, TableDefinition, TableError, WriteTransaction,
};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

// Table definitions
const META_TABLE: TableDefinition<&str, u64> = TableDefinition::new("__meta");
const STORES_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("__stores");

const VERSION_KEY: &str = "version";
const STORE_TABLE_PREFIX: &str = "store:";
const FILE_EXTENSION: &str = "redb";

fn store_table(table_name: &str) -> TableDefinition<'_, &'static [u8], &'static [u8]> {
    TableDefinition::new(table_name)
}

fn store_table_name(store: &str) -> String {
    format!("{}{}", STORE_TABLE_PREFIX, store)
}

/// redb-based persistent engine
///
/// Each database is a single `<name>.redb` file under the engine root.
/// A database file is opened once per process; every connection shares
/// that handle and relies on redb for isolation (one writer at a time).
pub struct RedbEngine {
    root: PathBuf,
    handles: Mutex<HashMap<String, Arc<Database>>>,
}

impl RedbEngine {
    /// Create an engine storing its databases under `root`
    pub fn new(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();

        // Create the root directory if it doesn't exist
        std::fs::create_dir_all(&root)?;

        Ok(Self {
            root,
            handles: Mutex::new(HashMap::new()),
        })
    }

    /// Get the directory holding the database files
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn database_path(&self, name: &str) -> PathBuf {
        self.root.join(format!("{}.{}", name, FILE_EXTENSION))
    }

    fn handle(&self, name: &str) -> Result<Arc<Database>> {
        validate_name(name)?;
        let mut handles = self.handles.lock()?;
        if let Some(db) = handles.get(name) {
            return Ok(Arc::clone(db));
        }

        let db = Arc::new(Database::create(self.database_path(name))?);
        handles.insert(name.to_string(), Arc::clone(&db));
        Ok(db)
    }
}

fn validate_name(name: &str) -> Result<()> {
    if name.is_empty()
        || name.starts_with('.')
        || name.contains(|c: char| c == '/' || c == '\\' || c == '\0')
    {
        return Err(EngineError::InvalidName(name.to_string()));
    }
    Ok(())
}

fn read_version(txn: &ReadTransaction) -> Result<u64> {
    let table = match txn.open_table(META_TABLE) {
        Ok(table) => table,
        Err(TableError::TableDoesNotExist(_)) => return Ok(0),
        Err(e) => return Err(e.into()),
    };
    let version = table.get(VERSION_KEY)?.map(|v| v.value()).unwrap_or(0);
    Ok(version)
}

fn write_version(txn: &WriteTransaction) -> Result<u64> {
    let table = txn.open_table(META_TABLE)?;
    let version = table.get(VERSION_KEY)?.map(|v| v.value()).unwrap_or(0);
    Ok(version)
}

fn load_stores(
    table: &impl ReadableTable<&'static str, &'static [u8]>,
) -> Result<BTreeMap<String, StoreSchema>> {
    let mut stores = BTreeMap::new();
    for entry in table.iter()? {
        let (name, bytes) = entry?;
        let schema: StoreSchema = bincode::deserialize(bytes.value())?;
        stores.insert(name.value().to_string(), schema);
    }
    Ok(stores)
}

fn read_stores(txn: &ReadTransaction) -> Result<BTreeMap<String, StoreSchema>> {
    match txn.open_table(STORES_TABLE) {
        Ok(table) => load_stores(&table),
        Err(TableError::TableDoesNotExist(_)) => Ok(BTreeMap::new()),
        Err(e) => Err(e.into()),
    }
}

fn write_stores(txn: &WriteTransaction) -> Result<BTreeMap<String, StoreSchema>> {
    let table = txn.open_table(STORES_TABLE)?;
    load_stores(&table)
}

impl StorageEngine for RedbEngine {
    fn open(
        &self,
        name: &str,
        version: Option<u64>,
        upgrade: UpgradeHook<'_>,
    ) -> Result<Box<dyn Connection>> {
        let db = self.handle(name)?;

        let (current, stores) = {
            let read_txn = db.begin_read()?;
            (read_version(&read_txn)?, read_stores(&read_txn)?)
        };
        let (target, needs_upgrade) = resolve_version(version, current)?;
        if !needs_upgrade {
            return Ok(Box::new(RedbConnection {
                name: name.to_string(),
                version: target,
                db,
                stores,
            }));
        }

        // redb admits a single write transaction, so upgrades are serialized.
        // Re-check the version: another upgrade may have won the race.
        let write_txn = db.begin_write()?;
        let current = write_version(&write_txn)?;
        let (target, needs_upgrade) = resolve_version(version, current)?;

        let stores = if needs_upgrade {
            tracing::debug!(database = name, from = current, to = target, "upgrading database");
            let mut editor = RedbSchemaEditor {
                txn: &write_txn,
                old_version: current,
                new_version: target,
                stores: write_stores(&write_txn)?,
            };
            if let Err(err) = upgrade(&mut editor) {
                write_txn.abort()?;
                return Err(err);
            }
            let stores = editor.stores;
            {
                let mut meta = write_txn.open_table(META_TABLE)?;
                meta.insert(VERSION_KEY, target)?;
            }
            write_txn.commit()?;
            stores
        } else {
            let stores = write_stores(&write_txn)?;
            write_txn.abort()?;
            stores
        };

        Ok(Box::new(RedbConnection {
            name: name.to_string(),
            version: target,
            db,
            stores,
        }))
    }

    fn databases(&self) -> Result<Vec<DatabaseInfo>> {
        let mut infos = Vec::new();
        for entry in std::fs::read_dir(&self.root)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some(FILE_EXTENSION) {
                continue;
            }
            let Some(name) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            let db = self.handle(name)?;
            let version = read_version(&db.begin_read()?)?;
            if version > 0 {
                infos.push(DatabaseInfo {
                    name: name.to_string(),
                    version,
                });
            }
        }
        infos.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(infos)
    }

    fn delete_database(&self, name: &str) -> Result<()> {
        validate_name(name)?;
        self.handles.lock()?.remove(name);

        let path = self.database_path(name);
        if path.exists() {
            std::fs::remove_file(path)?;
        }
        Ok(())
    }
}

struct RedbSchemaEditor<'a> {
    txn: &'a WriteTransaction,
    old_version: u64,
    new_version: u64,
    stores: BTreeMap<String, StoreSchema>,
}

impl SchemaEditor for RedbSchemaEditor<'_> {
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

        let schema = StoreSchema::new(key_path);
        let bytes = bincode::serialize(&schema)?;
        {
            let mut table = self.txn.open_table(STORES_TABLE)?;
            table.insert(name, bytes.as_slice())?;
        }
        // Opening a table inside a write transaction creates it
        let table_name = store_table_name(name);
        self.txn.open_table(store_table(&table_name))?;

        self.stores.insert(name.to_string(), schema);
        Ok(())
    }

    fn delete_store(&mut self, name: &str) -> Result<()> {
        if self.stores.remove(name).is_none() {
            return Err(EngineError::StoreNotFound(name.to_string()));
        }
        {
            let mut table = self.txn.open_table(STORES_TABLE)?;
            table.remove(name)?;
        }
        let table_name = store_table_name(name);
        self.txn.delete_table(store_table(&table_name))?;
        Ok(())
    }
}

struct RedbConnection {
    name: String,
    version: u64,
    db: Arc<Database>,
    stores: BTreeMap<String, StoreSchema>,
}

impl RedbConnection {
    fn check_current(&self, current: u64) -> Result<()> {
        if current != self.version {
            return Err(EngineError::VersionError {
                requested: self.version,
                current,
            });
        }
        Ok(())
    }
}

impl Connection for RedbConnection {
    fn name(&self) -> &str {
        &self.name
    }

    fn version(&self) -> u64 {
        self.version
    }

    fn store_names(&self) -> Vec<String> {
        self.stores.keys().cloned().collect()
    }

    fn transaction(
        &self,
        store: &str,
        mode: TransactionMode,
    ) -> Result<Box<dyn Transaction + '_>> {
        let (txn, stores) = match mode {
            TransactionMode::ReadOnly => {
                let txn = self.db.begin_read()?;
                self.check_current(read_version(&txn)?)?;
                let stores = read_stores(&txn)?;
                (RedbTxn::Read(txn), stores)
            }
            TransactionMode::ReadWrite => {
                let txn = self.db.begin_write()?;
                self.check_current(write_version(&txn)?)?;
                let stores = write_stores(&txn)?;
                (RedbTxn::Write(txn), stores)
            }
        };

        let schema = stores
            .get(store)
            .ok_or_else(|| EngineError::StoreNotFound(store.to_string()))?;

        Ok(Box::new(RedbTransaction {
            store: store.to_string(),
            table_name: store_table_name(store),
            key_path: schema.key_path.clone(),
            txn,
        }))
    }
}

enum RedbTxn {
    Read(ReadTransaction),
    Write(WriteTransaction),
}

/// redb transaction over one store table
struct RedbTransaction {
    store: String,
    table_name: String,
    key_path: String,
    txn: RedbTxn,
}

fn get_record(
    table: &impl ReadableTable<&'static [u8], &'static [u8]>,
    key: &Key,
) -> Result<Option<Record>> {
    let encoded = key.encode();
    match table.get(encoded.as_slice())? {
        Some(bytes) => Ok(Some(Record::from_bytes(bytes.value())?)),
        None => Ok(None),
    }
}

fn all_records(table: &impl ReadableTable<&'static [u8], &'static [u8]>) -> Result<Vec<Record>> {
    let mut records = Vec::new();
    for entry in table.iter()? {
        let (_, bytes) = entry?;
        records.push(Record::from_bytes(bytes.value())?);
    }
    Ok(records)
}

impl RedbTransaction {
    fn writer(&self) -> Result<&WriteTransaction> {
        match &self.txn {
            RedbTxn::Write(txn) => Ok(txn),
            RedbTxn::Read(_) => Err(EngineError::ReadOnly(self.store.clone())),
        }
    }

    fn write_record(&mut self, record: &Record, unique: bool) -> Result<Key> {
        let key = record.require_key(&self.key_path)?;
        let encoded = key.encode();
        let bytes = record.to_bytes()?;

        let txn = self.writer()?;
        let mut table = txn.open_table(store_table(&self.table_name))?;
        if unique && table.get(encoded.as_slice())?.is_some() {
            return Err(EngineError::ConstraintError {
                store: self.store.clone(),
                key: key.to_string(),
            });
        }
        table.insert(encoded.as_slice(), bytes.as_slice())?;
        Ok(key)
    }
}

impl Transaction for RedbTransaction {
    fn mode(&self) -> TransactionMode {
        match self.txn {
            RedbTxn::Read(_) => TransactionMode::ReadOnly,
            RedbTxn::Write(_) => TransactionMode::ReadWrite,
        }
    }

    fn key_path(&self) -> &str {
        &self.key_path
    }

    fn add(&mut self, record: &Record) -> Result<Key> {
        self.write_record(record, true)
    }

    fn get(&self, key: &Key) -> Result<Option<Record>> {
        let def = store_table(&self.table_name);
        match &self.txn {
            RedbTxn::Read(txn) => get_record(&txn.open_table(def)?, key),
            RedbTxn::Write(txn) => get_record(&txn.open_table(def)?, key),
        }
    }

    fn put(&mut self, record: &Record) -> Result<Key> {
        self.write_record(record, false)
    }

    fn delete(&mut self, key: &Key) -> Result<()> {
        let encoded = key.encode();
        let txn = self.writer()?;
        let mut table = txn.open_table(store_table(&self.table_name))?;
        table.remove(encoded.as_slice())?;
        Ok(())
    }

    fn get_all(&self) -> Result<Vec<Record>> {
        let def = store_table(&self.table_name);
        match &self.txn {
            RedbTxn::Read(txn) => all_records(&txn.open_table(def)?),
            RedbTxn::Write(txn) => all_records(&txn.open_table(def)?),
        }
    }

    fn commit(self: Box<Self>) -> Result<()> {
        match self.txn {
            RedbTxn::Write(txn) => txn.commit()?,
            RedbTxn::Read(_) => {}
        }
        Ok(())
    }

    fn abort(self: Box<Self>) -> Result<()> {
        match self.txn {
            RedbTxn::Write(txn) => txn.abort()?,
            RedbTxn::Read(_) => {}
        }
        Ok(())
    }
}
