//! `sync_meta` record: last sync time and conflict bookkeeping.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::models::{ConflictId, ConflictRecord};
use crate::store::{load_record, save_record, PersistentStore, RecordKey};

/// Resolved conflicts kept for `recent_resolutions`
pub const RESOLVED_HISTORY: usize = 50;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncMeta {
    pub last_sync_at: Option<i64>,
    /// Conflicts awaiting resolution
    pub conflicts: Vec<ConflictRecord>,
    /// Most recent resolutions, oldest first
    pub resolved: Vec<ConflictRecord>,
}

pub struct MetaState {
    data: SyncMeta,
    store: Arc<dyn PersistentStore>,
    degraded: bool,
}

impl MetaState {
    pub fn load(store: Arc<dyn PersistentStore>) -> Self {
        let (data, degraded) = match load_record::<SyncMeta>(store.as_ref(), RecordKey::SyncMeta) {
            Ok(data) => (data.unwrap_or_default(), false),
            Err(error) => {
                tracing::error!("Failed to load sync metadata, starting empty: {}", error);
                (SyncMeta::default(), true)
            }
        };
        Self {
            data,
            store,
            degraded,
        }
    }

    pub const fn last_sync_at(&self) -> Option<i64> {
        self.data.last_sync_at
    }

    pub fn open_conflicts(&self) -> &[ConflictRecord] {
        &self.data.conflicts
    }

    pub fn resolved(&self) -> &[ConflictRecord] {
        &self.data.resolved
    }

    pub fn has_open_conflict(&self, key: &str) -> bool {
        self.data.conflicts.iter().any(|conflict| conflict.key == key)
    }

    pub fn find_open(&self, id: &ConflictId) -> Option<&ConflictRecord> {
        self.data.conflicts.iter().find(|conflict| conflict.id == *id)
    }

    pub const fn is_degraded(&self) -> bool {
        self.degraded
    }

    pub fn record_sync(&mut self, at: i64) {
        self.data.last_sync_at = Some(self.data.last_sync_at.map_or(at, |last| last.max(at)));
        self.save();
    }

    pub fn add_conflict(&mut self, conflict: ConflictRecord) {
        self.data.conflicts.push(conflict);
        self.save();
    }

    /// Drop open conflicts for `key` (a newer local write reached the server).
    pub fn discard_conflicts_for(&mut self, key: &str) -> usize {
        let before = self.data.conflicts.len();
        self.data.conflicts.retain(|conflict| conflict.key != key);
        let removed = before - self.data.conflicts.len();
        if removed > 0 {
            self.save();
        }
        removed
    }

    /// Move a settled conflict from the open set into the history.
    pub fn archive(&mut self, resolved: ConflictRecord) {
        self.data.conflicts.retain(|conflict| conflict.id != resolved.id);
        self.data.resolved.push(resolved);
        if self.data.resolved.len() > RESOLVED_HISTORY {
            let excess = self.data.resolved.len() - RESOLVED_HISTORY;
            self.data.resolved.drain(..excess);
        }
        self.save();
    }

    fn save(&mut self) {
        match save_record(self.store.as_ref(), RecordKey::SyncMeta, &self.data) {
            Ok(()) => self.degraded = false,
            Err(error) => {
                tracing::warn!("Failed to persist sync metadata, keeping it in memory: {}", error);
                self.degraded = true;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Payload, Resolution};
    use crate::store::MemoryStore;

    fn conflict(key: &str) -> ConflictRecord {
        ConflictRecord::new(key, (Payload::from("l"), 1), (Payload::from("s"), 2), 0)
    }

    #[test]
    fn history_is_bounded_and_persisted() {
        let store = Arc::new(MemoryStore::new());
        let mut meta = MetaState::load(store.clone());
        for index in 0..(RESOLVED_HISTORY + 5) {
            let mut record = conflict(&format!("k{index}"));
            meta.add_conflict(record.clone());
            record.mark_resolved(Resolution::Server, 1);
            meta.archive(record);
        }
        assert!(meta.open_conflicts().is_empty());
        assert_eq!(meta.resolved().len(), RESOLVED_HISTORY);
        assert_eq!(meta.resolved()[0].key, "k5");

        let reloaded = MetaState::load(store);
        assert_eq!(reloaded.resolved().len(), RESOLVED_HISTORY);
    }

    #[test]
    fn last_sync_never_moves_back() {
        let mut meta = MetaState::load(Arc::new(MemoryStore::new()));
        meta.record_sync(200);
        meta.record_sync(100);
        assert_eq!(meta.last_sync_at(), Some(200));
    }

    #[test]
    fn discard_only_matches_key() {
        let mut meta = MetaState::load(Arc::new(MemoryStore::new()));
        meta.add_conflict(conflict("a"));
        meta.add_conflict(conflict("b"));
        assert_eq!(meta.discard_conflicts_for("a"), 1);
        assert!(meta.has_open_conflict("b"));
        assert!(!meta.has_open_conflict("a"));
    }
}
