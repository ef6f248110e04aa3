//! Records stored in an object store

use crate::{EngineError, Key, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A structured value: a mapping of field name to JSON value
///
/// The engine only inspects the field named by the store's key path.
/// Everything else is opaque.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Record(Map<String, Value>);

impl Record {
    /// Create an empty record
    pub fn new() -> Self {
        Self(Map::new())
    }

    /// Convert any serializable value into a record
    ///
    /// Fails with `InvalidRecord` if the value does not serialize to an object.
    pub fn from_serialize<T: Serialize + ?Sized>(value: &T) -> Result<Self> {
        match serde_json::to_value(value)? {
            Value::Object(map) => Ok(Self(map)),
            other => Err(EngineError::InvalidRecord(format!(
                "expected an object, got {}",
                other
            ))),
        }
    }

    /// Deserialize the record into a typed value
    pub fn into_typed<T: DeserializeOwned>(self) -> Result<T> {
        Ok(serde_json::from_value(Value::Object(self.0))?)
    }

    /// Extract the primary key found at `key_path`
    pub fn key(&self, key_path: &str) -> Option<Key> {
        self.0.get(key_path).and_then(Key::from_value)
    }

    /// Extract the primary key or fail with `MissingKey`
    pub fn require_key(&self, key_path: &str) -> Result<Key> {
        self.key(key_path)
            .ok_or_else(|| EngineError::MissingKey(key_path.to_string()))
    }

    /// Shallow merge: every field of `patch` overwrites the field of `self`
    pub fn merge(&mut self, patch: &Record) {
        for (field, value) in &patch.0 {
            self.0.insert(field.clone(), value.clone());
        }
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.0.get(field)
    }

    pub fn insert(&mut self, field: impl Into<String>, value: Value) -> Option<Value> {
        self.0.insert(field.into(), value)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }

    pub fn into_map(self) -> Map<String, Value> {
        self.0
    }

    pub(crate) fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(&self.0)?)
    }

    pub(crate) fn from_bytes(bytes: &[u8]) -> Result<Self> {
        Ok(Self(serde_json::from_slice(bytes)?))
    }
}

impl From<Map<String, Value>> for Record {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

impl TryFrom<Value> for Record {
    type Error = EngineError;

    fn try_from(value: Value) -> Result<Self> {
        match value {
            Value::Object(map) => Ok(Self(map)),
            other => Err(EngineError::InvalidRecord(format!(
                "expected an object, got {}",
                other
            ))),
        }
    }
}

impl From<Record> for Value {
    fn from(record: Record) -> Self {
        Value::Object(record.0)
    }
}
