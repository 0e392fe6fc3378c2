//! In-memory fixture store.

use std::sync::{PoisonError, RwLock};

use fnv::FnvHashMap;
use serde_json::Value;

use crate::store::{EntityTable, FixtureStore};

/// In-memory fixture store guarded by a single reader/writer lock.
#[derive(Debug, Default)]
pub struct MemoryStore {
    /// Map from entity name to its key table
    entities: RwLock<FnvHashMap<String, EntityTable>>,
}

impl MemoryStore {
    /// Create a new empty in-memory store.
    ///
    /// # Returns
    /// Returns a new `MemoryStore` instance with no entities.
    pub fn new() -> Self {
        Self::default()
    }
}

impl FixtureStore for MemoryStore {
    fn write(&self, entity: &str, key: &str, value: Value) {
        // A panicking writer cannot leave a table half-inserted, so poisoning is ignored.
        let mut entities = self.entities.write().unwrap_or_else(PoisonError::into_inner);
        entities.entry(entity.to_string()).or_default().insert(key.to_string(), value);
    }

    fn read(&self, entity: &str, key: &str) -> Option<Value> {
        let entities = self.entities.read().unwrap_or_else(PoisonError::into_inner);
        entities.get(entity).and_then(|table| table.get(key)).cloned()
    }

    fn read_all(&self, entity: &str) -> Option<EntityTable> {
        let entities = self.entities.read().unwrap_or_else(PoisonError::into_inner);
        entities.get(entity).cloned()
    }
}
