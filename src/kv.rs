//! Key-value storage substrate
//!
//! Every tier the engine reads from is a string-keyed, string-valued store:
//!
//! - [`SledStore`] - durable, survives restarts (the origin-wide persistent store)
//! - [`MemoryStore`] - process lifetime only (the session store)
//!
//! Namespaced keys hold whole JSON documents. Read-modify-write of such a
//! document goes through [`update_json_object`], which retries on a
//! compare-and-swap conflict instead of overwriting a concurrent writer.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde_json::{Map, Value};
use std::path::Path;
use tracing::{debug, info};

use crate::error::StorageError;

/// Attempts before a contended JSON document update is abandoned
const MAX_CAS_ATTEMPTS: usize = 16;

/// A string key-value store backing one or more storage tiers.
pub trait KeyValueStore: Send + Sync {
    /// Short label used in logs
    fn name(&self) -> &str;

    fn get(&self, key: &str) -> Result<Option<String>, StorageError>;

    fn set(&self, key: &str, value: &str) -> Result<(), StorageError>;

    fn remove(&self, key: &str) -> Result<(), StorageError>;

    fn keys(&self) -> Result<Vec<String>, StorageError>;

    /// Replace the value at `key` with `new` only if it currently equals
    /// `expected` (`None` = key absent). Returns whether the swap happened.
    fn compare_and_swap(
        &self,
        key: &str,
        expected: Option<&str>,
        new: &str,
    ) -> Result<bool, StorageError>;

    /// Make previous writes durable. No-op for volatile stores.
    fn flush(&self) -> Result<(), StorageError> {
        Ok(())
    }
}

// =============================================================================
// Durable store
// =============================================================================

/// Durable store on a sled database
pub struct SledStore {
    db: sled::Db,
}

impl SledStore {
    /// Open or create the database at `path`
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StorageError> {
        let db = sled::open(path.as_ref())?;
        info!(path = %path.as_ref().display(), "Opened durable store");
        Ok(Self { db })
    }

    /// Temporary database, removed on drop (tests)
    pub fn temporary() -> Result<Self, StorageError> {
        let db = sled::Config::new().temporary(true).open()?;
        Ok(Self { db })
    }

    fn decode(key: &str, value: sled::IVec) -> Result<String, StorageError> {
        String::from_utf8(value.to_vec()).map_err(|e| StorageError::malformed(key, e))
    }
}

impl KeyValueStore for SledStore {
    fn name(&self) -> &str {
        "durable"
    }

    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        match self.db.get(key.as_bytes())? {
            Some(value) => Ok(Some(Self::decode(key, value)?)),
            None => Ok(None),
        }
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        self.db.insert(key.as_bytes(), value.as_bytes())?;
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        self.db.remove(key.as_bytes())?;
        Ok(())
    }

    fn keys(&self) -> Result<Vec<String>, StorageError> {
        let mut keys = Vec::new();
        for item in self.db.iter() {
            let (key, _) = item?;
            if let Ok(key) = String::from_utf8(key.to_vec()) {
                keys.push(key);
            }
        }
        Ok(keys)
    }

    fn compare_and_swap(
        &self,
        key: &str,
        expected: Option<&str>,
        new: &str,
    ) -> Result<bool, StorageError> {
        let swapped = self.db.compare_and_swap(
            key.as_bytes(),
            expected.map(|v| v.as_bytes()),
            Some(new.as_bytes()),
        )?;
        Ok(swapped.is_ok())
    }

    fn flush(&self) -> Result<(), StorageError> {
        self.db.flush()?;
        Ok(())
    }
}

// =============================================================================
// Volatile store
// =============================================================================

/// In-process store; contents vanish with the process
#[derive(Default)]
pub struct MemoryStore {
    label: String,
    entries: DashMap<String, String>,
}

impl MemoryStore {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            entries: DashMap::new(),
        }
    }

    /// Drop every entry
    pub fn clear(&self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl KeyValueStore for MemoryStore {
    fn name(&self) -> &str {
        &self.label
    }

    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        Ok(self.entries.get(key).map(|v| v.value().clone()))
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        self.entries.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        self.entries.remove(key);
        Ok(())
    }

    fn keys(&self) -> Result<Vec<String>, StorageError> {
        Ok(self.entries.iter().map(|e| e.key().clone()).collect())
    }

    fn compare_and_swap(
        &self,
        key: &str,
        expected: Option<&str>,
        new: &str,
    ) -> Result<bool, StorageError> {
        match self.entries.entry(key.to_string()) {
            Entry::Occupied(mut occupied) => {
                if expected == Some(occupied.get().as_str()) {
                    occupied.insert(new.to_string());
                    Ok(true)
                } else {
                    Ok(false)
                }
            }
            Entry::Vacant(vacant) => {
                if expected.is_none() {
                    vacant.insert(new.to_string());
                    Ok(true)
                } else {
                    Ok(false)
                }
            }
        }
    }
}

// =============================================================================
// JSON document helpers
// =============================================================================

/// Parse a stored value that must be a JSON object
pub fn parse_json_object(key: &str, raw: &str) -> Result<Map<String, Value>, StorageError> {
    match serde_json::from_str::<Value>(raw) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(other) => Err(StorageError::malformed(
            key,
            format!("expected a JSON object, found {}", json_kind(&other)),
        )),
        Err(e) => Err(StorageError::malformed(key, e)),
    }
}

/// Read the JSON object at `key`; an absent key is an empty object
pub fn read_json_object(
    store: &dyn KeyValueStore,
    key: &str,
) -> Result<Map<String, Value>, StorageError> {
    match store.get(key)? {
        Some(raw) => parse_json_object(key, &raw),
        None => Ok(Map::new()),
    }
}

/// Apply `update` to the JSON object at `key` and write it back atomically.
///
/// `update` may run more than once when another writer wins the race; it
/// always receives the latest stored document.
pub fn update_json_object<T>(
    store: &dyn KeyValueStore,
    key: &str,
    mut update: impl FnMut(&mut Map<String, Value>) -> Result<T, StorageError>,
) -> Result<T, StorageError> {
    for attempt in 0..MAX_CAS_ATTEMPTS {
        let current = store.get(key)?;
        let mut document = match current.as_deref() {
            Some(raw) => parse_json_object(key, raw)?,
            None => Map::new(),
        };

        let output = update(&mut document)?;
        let next = serde_json::to_string(&Value::Object(document))?;

        if current.as_deref() == Some(next.as_str()) {
            return Ok(output);
        }
        if store.compare_and_swap(key, current.as_deref(), &next)? {
            return Ok(output);
        }
        debug!(store = store.name(), key, attempt, "Concurrent update, retrying");
    }

    Err(StorageError::Internal(format!(
        "gave up updating {} after {} attempts",
        key, MAX_CAS_ATTEMPTS
    )))
}

/// Human-readable JSON type name for diagnostics
pub fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
