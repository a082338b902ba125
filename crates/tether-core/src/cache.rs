//! TTL read cache backed by the `cache_table` record.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use crate::clock::duration_ms;
use crate::error::{Error, Result};
use crate::models::{CacheEntry, Payload};
use crate::store::{load_record, save_record, PersistentStore, RecordKey};

/// Previously fetched values kept for offline reads.
///
/// Like the action queue, explicit writes (`put`, `invalidate`, `clear`) are
/// rolled back when the store rejects them, while sync-driven updates stay
/// in memory and mark the cache degraded.
pub struct DataCache {
    entries: BTreeMap<String, CacheEntry>,
    store: Arc<dyn PersistentStore>,
    degraded: bool,
}

impl DataCache {
    /// Load the cache table; an unreadable record yields an empty cache.
    pub fn load(store: Arc<dyn PersistentStore>) -> Self {
        let (entries, degraded) =
            match load_record::<Vec<CacheEntry>>(store.as_ref(), RecordKey::CacheTable) {
                Ok(entries) => (entries.unwrap_or_default(), false),
                Err(error) => {
                    tracing::error!("Failed to load cache table, starting empty: {}", error);
                    (Vec::new(), true)
                }
            };

        let entries: BTreeMap<String, CacheEntry> = entries
            .into_iter()
            .map(|entry| (entry.key.clone(), entry))
            .collect();
        tracing::debug!("Loaded {} cache entrie(s)", entries.len());

        Self {
            entries,
            store,
            degraded,
        }
    }

    /// Store `value` under `key`, bumping its version.
    pub fn put(
        &mut self,
        key: &str,
        value: Payload,
        ttl: Duration,
        now_ms: i64,
    ) -> Result<CacheEntry> {
        let key = key.trim();
        if key.is_empty() {
            return Err(Error::InvalidInput("cache key must not be empty".into()));
        }

        let version = self
            .entries
            .get(key)
            .map_or(1, |entry| entry.version.saturating_add(1));
        let entry = CacheEntry {
            key: key.to_string(),
            value,
            stored_at: now_ms,
            ttl_ms: duration_ms(ttl),
            version,
        };

        let mut next = self.entries.clone();
        next.insert(entry.key.clone(), entry.clone());
        self.write_strict(&next)?;
        self.entries = next;
        Ok(entry)
    }

    /// Expiry-checked read; an expired entry is deleted and reported as a miss.
    pub fn get(&mut self, key: &str, now_ms: i64) -> Option<CacheEntry> {
        let expired = self.entries.get(key)?.is_expired(now_ms);
        if expired {
            tracing::debug!(key, "Cache entry expired");
            self.entries.remove(key);
            self.write_lenient();
            return None;
        }
        self.entries.get(key).cloned()
    }

    /// Read without expiry handling.
    pub fn peek(&self, key: &str) -> Option<&CacheEntry> {
        self.entries.get(key)
    }

    pub fn invalidate(&mut self, key: &str) -> Result<bool> {
        if !self.entries.contains_key(key) {
            return Ok(false);
        }
        let mut next = self.entries.clone();
        next.remove(key);
        self.write_strict(&next)?;
        self.entries = next;
        Ok(true)
    }

    pub fn clear(&mut self) -> Result<usize> {
        let removed = self.entries.len();
        self.write_strict(&BTreeMap::new())?;
        self.entries.clear();
        Ok(removed)
    }

    /// Live entries ordered by key; expired ones are pruned on the way.
    pub fn entries(&mut self, now_ms: i64) -> Vec<CacheEntry> {
        self.prune_expired(now_ms);
        self.entries.values().cloned().collect()
    }

    /// Live entries that have not been written for longer than `threshold`.
    pub fn stale_entries(&mut self, now_ms: i64, threshold: Duration) -> Vec<CacheEntry> {
        let threshold_ms = duration_ms(threshold);
        self.prune_expired(now_ms);
        self.entries
            .values()
            .filter(|entry| entry.age_ms(now_ms) > threshold_ms)
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub const fn is_degraded(&self) -> bool {
        self.degraded
    }

    /// Adopt a version reported by the server after a successful push.
    pub fn set_version(&mut self, key: &str, version: u64) -> bool {
        let Some(entry) = self.entries.get_mut(key) else {
            return false;
        };
        if entry.version == version {
            return true;
        }
        entry.version = version;
        self.write_lenient();
        true
    }

    /// Replace a value the server confirmed at the version we already hold.
    pub fn refresh(&mut self, key: &str, value: Payload, now_ms: i64) -> bool {
        let Some(entry) = self.entries.get_mut(key) else {
            return false;
        };
        entry.value = value;
        entry.stored_at = now_ms;
        self.write_lenient();
        true
    }

    /// Write the winner of a conflict at an explicit version.
    ///
    /// Keeps the entry's TTL when it still exists, `fallback_ttl` otherwise.
    pub fn write_resolved(
        &mut self,
        key: &str,
        value: Payload,
        version: u64,
        fallback_ttl: Duration,
        now_ms: i64,
    ) -> CacheEntry {
        let ttl_ms = self
            .entries
            .get(key)
            .map_or_else(|| duration_ms(fallback_ttl), |entry| entry.ttl_ms);
        let entry = CacheEntry {
            key: key.to_string(),
            value,
            stored_at: now_ms,
            ttl_ms,
            version,
        };
        self.entries.insert(key.to_string(), entry.clone());
        self.write_lenient();
        entry
    }

    fn prune_expired(&mut self, now_ms: i64) {
        let before = self.entries.len();
        self.entries.retain(|_, entry| !entry.is_expired(now_ms));
        let pruned = before - self.entries.len();
        if pruned > 0 {
            tracing::debug!("Pruned {} expired cache entrie(s)", pruned);
            self.write_lenient();
        }
    }

    fn write_strict(&mut self, entries: &BTreeMap<String, CacheEntry>) -> Result<()> {
        let rows: Vec<&CacheEntry> = entries.values().collect();
        match save_record(self.store.as_ref(), RecordKey::CacheTable, &rows) {
            Ok(()) => {
                self.degraded = false;
                Ok(())
            }
            Err(error) => {
                tracing::error!("Failed to persist cache table: {}", error);
                self.degraded = true;
                Err(error)
            }
        }
    }

    fn write_lenient(&mut self) {
        let entries = std::mem::take(&mut self.entries);
        let result = self.write_strict(&entries);
        self.entries = entries;
        if result.is_err() {
            tracing::warn!("Continuing with in-memory cache");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::{Clock, ManualClock};
    use crate::store::MemoryStore;
    use pretty_assertions::assert_eq;

    fn setup() -> (Arc<MemoryStore>, DataCache) {
        let store = Arc::new(MemoryStore::new());
        let cache = DataCache::load(store.clone());
        (store, cache)
    }

    #[test]
    fn ttl_hit_then_miss_with_virtual_clock() {
        let (_store, mut cache) = setup();
        let clock = ManualClock::new(10_000);
        cache
            .put("k", Payload::from("v"), Duration::from_secs(60), clock.now_ms())
            .unwrap();

        clock.advance(Duration::from_secs(59));
        assert_eq!(
            cache.get("k", clock.now_ms()).map(|entry| entry.value),
            Some(Payload::from("v"))
        );

        clock.advance(Duration::from_secs(2));
        assert_eq!(cache.get("k", clock.now_ms()), None);
        assert!(cache.entries(clock.now_ms()).is_empty());
    }

    #[test]
    fn put_bumps_version_and_persists() {
        let (store, mut cache) = setup();
        cache.put("k", Payload::from("a"), Duration::from_secs(60), 0).unwrap();
        let second = cache.put("k", Payload::from("b"), Duration::from_secs(60), 1).unwrap();
        assert_eq!(second.version, 2);

        let reloaded = DataCache::load(store);
        assert_eq!(reloaded.peek("k").map(|entry| entry.version), Some(2));
    }

    #[test]
    fn entries_prunes_expired_from_store() {
        let (store, mut cache) = setup();
        cache.put("short", Payload::from("a"), Duration::from_millis(10), 0).unwrap();
        cache.put("long", Payload::from("b"), Duration::from_secs(10), 0).unwrap();

        let keys: Vec<String> = cache.entries(100).into_iter().map(|entry| entry.key).collect();
        assert_eq!(keys, vec!["long"]);
        assert!(DataCache::load(store).peek("short").is_none());
    }

    #[test]
    fn stale_entries_respect_threshold() {
        let (_store, mut cache) = setup();
        cache.put("old", Payload::from("a"), Duration::from_secs(600), 0).unwrap();
        cache.put("new", Payload::from("b"), Duration::from_secs(600), 50_000).unwrap();

        let stale: Vec<String> = cache
            .stale_entries(60_000, Duration::from_secs(30))
            .into_iter()
            .map(|entry| entry.key)
            .collect();
        assert_eq!(stale, vec!["old"]);
    }

    #[test]
    fn failed_put_keeps_previous_entry() {
        let (store, mut cache) = setup();
        cache.put("k", Payload::from("a"), Duration::from_secs(60), 0).unwrap();
        store.set_fail_writes(true);

        assert!(cache.put("k", Payload::from("b"), Duration::from_secs(60), 1).is_err());
        assert_eq!(cache.peek("k").map(|entry| entry.version), Some(1));
        assert!(cache.is_degraded());
    }

    #[test]
    fn write_resolved_keeps_existing_ttl() {
        let (_store, mut cache) = setup();
        cache.put("k", Payload::from("a"), Duration::from_secs(60), 0).unwrap();
        let entry = cache.write_resolved("k", Payload::from("s"), 7, Duration::from_secs(1), 5);
        assert_eq!(entry.ttl_ms, 60_000);
        assert_eq!(entry.version, 7);
    }

    #[test]
    fn corrupt_table_does_not_block_load() {
        let store = Arc::new(MemoryStore::new());
        store.save(RecordKey::CacheTable, "{broken").unwrap();
        let cache = DataCache::load(store);
        assert!(cache.is_empty());
        assert!(cache.is_degraded());
    }

    #[test]
    fn clear_and_invalidate() {
        let (_store, mut cache) = setup();
        cache.put("a", Payload::from("1"), Duration::from_secs(60), 0).unwrap();
        cache.put("b", Payload::from("2"), Duration::from_secs(60), 0).unwrap();

        assert!(cache.invalidate("a").unwrap());
        assert!(!cache.invalidate("a").unwrap());
        assert_eq!(cache.clear().unwrap(), 1);
        assert_eq!(cache.len(), 0);
    }
}
