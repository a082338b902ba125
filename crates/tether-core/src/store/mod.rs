//! Persistent store for engine state
//!
//! The engine keeps three independent records: the pending action queue,
//! the cache table and sync metadata. Each is written whole on every change
//! (replace-on-write), so a crash never exposes a partially written record,
//! and each is decoded on its own so one corrupt record cannot block the
//! others from loading.

mod memory;
mod migrations;
mod sqlite;

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fmt;

use crate::error::Result;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

/// Logical records held by the store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RecordKey {
    PendingActions,
    CacheTable,
    SyncMeta,
}

impl RecordKey {
    pub const ALL: [Self; 3] = [Self::PendingActions, Self::CacheTable, Self::SyncMeta];

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::PendingActions => "pending_actions",
            Self::CacheTable => "cache_table",
            Self::SyncMeta => "sync_meta",
        }
    }
}

impl fmt::Display for RecordKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Durable key-value storage surviving process restarts
pub trait PersistentStore: Send + Sync {
    /// Read a record's raw contents
    fn load(&self, record: RecordKey) -> Result<Option<String>>;

    /// Atomically replace a record
    fn save(&self, record: RecordKey, value: &str) -> Result<()>;

    /// Delete a record
    fn remove(&self, record: RecordKey) -> Result<()>;
}

/// Load and decode a record.
pub fn load_record<T: DeserializeOwned>(
    store: &dyn PersistentStore,
    record: RecordKey,
) -> Result<Option<T>> {
    let Some(raw) = store.load(record)? else {
        return Ok(None);
    };
    Ok(Some(serde_json::from_str(&raw)?))
}

/// Encode and atomically write a record.
pub fn save_record<T: Serialize + ?Sized>(
    store: &dyn PersistentStore,
    record: RecordKey,
    value: &T,
) -> Result<()> {
    let raw = serde_json::to_string(value)?;
    store.save(record, &raw)
}
