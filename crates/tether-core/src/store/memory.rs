//! In-memory store (tests and ephemeral sessions)

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use super::{PersistentStore, RecordKey};
use crate::error::{Error, Result};

/// `PersistentStore` backed by a `HashMap`.
///
/// Writes can be made to fail on demand to exercise degraded-mode handling.
#[derive(Debug, Default)]
pub struct MemoryStore {
    records: Mutex<HashMap<RecordKey, String>>,
    fail_writes: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent `save`/`remove` fail until turned off again.
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    fn check_writable(&self, record: RecordKey) -> Result<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(Error::storage(
                &format!("write {record}"),
                "store is rejecting writes",
            ));
        }
        Ok(())
    }
}

impl PersistentStore for MemoryStore {
    fn load(&self, record: RecordKey) -> Result<Option<String>> {
        let records = self
            .records
            .lock()
            .map_err(|error| Error::storage("lock memory store", error))?;
        Ok(records.get(&record).cloned())
    }

    fn save(&self, record: RecordKey, value: &str) -> Result<()> {
        self.check_writable(record)?;
        let mut records = self
            .records
            .lock()
            .map_err(|error| Error::storage("lock memory store", error))?;
        records.insert(record, value.to_string());
        Ok(())
    }

    fn remove(&self, record: RecordKey) -> Result<()> {
        self.check_writable(record)?;
        let mut records = self
            .records
            .lock()
            .map_err(|error| Error::storage("lock memory store", error))?;
        records.remove(&record);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn save_load_remove() {
        let store = MemoryStore::new();
        assert_eq!(store.load(RecordKey::SyncMeta).unwrap(), None);

        store.save(RecordKey::SyncMeta, "{}").unwrap();
        assert_eq!(store.load(RecordKey::SyncMeta).unwrap().as_deref(), Some("{}"));

        store.remove(RecordKey::SyncMeta).unwrap();
        assert_eq!(store.load(RecordKey::SyncMeta).unwrap(), None);
    }

    #[test]
    fn failing_writes_leave_previous_value() {
        let store = MemoryStore::new();
        store.save(RecordKey::PendingActions, "[]").unwrap();
        store.set_fail_writes(true);

        let error = store.save(RecordKey::PendingActions, "[1]").unwrap_err();
        assert!(matches!(error, Error::Storage(_)));
        assert_eq!(
            store.load(RecordKey::PendingActions).unwrap().as_deref(),
            Some("[]")
        );
    }
}
