//! Fixture storage for the dynamic read/write endpoints.
//!
//! Values written by one endpoint can be read back by another. The store
//! is a two-level table, entity name to key to arbitrary JSON value; entries
//! never expire and live as long as the compiled router.

pub mod memory;

// Re-export main implementations
pub use memory::MemoryStore;

use fnv::FnvHashMap;
use serde_json::Value;

/// All values stored under one entity, keyed by fixture key.
pub type EntityTable = FnvHashMap<String, Value>;

/// Storage abstraction for dynamic fixtures.
///
/// Implementations must be safe under any number of concurrent callers and
/// must never expose a partially built entity table.
pub trait FixtureStore: Send + Sync {
    /// Store `value` under `entity`/`key`, replacing any previous value.
    ///
    /// # Parameters
    ///
    /// - `entity` - Entity name, created on first write
    /// - `key` - Key inside the entity
    /// - `value` - Value to store
    fn write(&self, entity: &str, key: &str, value: Value);

    /// Look up a single value.
    ///
    /// # Returns
    ///
    /// Returns the stored value, or `None` if the entity or key was never written.
    fn read(&self, entity: &str, key: &str) -> Option<Value>;

    /// Look up every value of an entity.
    ///
    /// # Returns
    ///
    /// Returns a snapshot of the entity table, or `None` if the entity was never written.
    fn read_all(&self, entity: &str) -> Option<EntityTable>;
}
