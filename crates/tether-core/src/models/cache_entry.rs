//! Cached read model

use serde::{Deserialize, Serialize};

use super::Payload;

/// A value fetched (or written) while online, kept for offline reads
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub key: String,
    pub value: Payload,
    /// Write timestamp (Unix ms)
    pub stored_at: i64,
    /// Lifespan in milliseconds
    pub ttl_ms: i64,
    /// Bumped on every write; compared against server versions
    pub version: u64,
}

impl CacheEntry {
    /// Instant (Unix ms) after which the entry is stale.
    pub const fn expires_at(&self) -> i64 {
        self.stored_at.saturating_add(self.ttl_ms)
    }

    /// Expired entries behave as misses.
    pub const fn is_expired(&self, now_ms: i64) -> bool {
        now_ms > self.expires_at()
    }

    /// Time since the last write.
    pub const fn age_ms(&self, now_ms: i64) -> i64 {
        now_ms.saturating_sub(self.stored_at)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry() -> CacheEntry {
        CacheEntry {
            key: "k".to_string(),
            value: Payload::from("v"),
            stored_at: 1_000,
            ttl_ms: 1_000,
            version: 1,
        }
    }

    #[test]
    fn entry_is_live_up_to_expiry_instant() {
        let entry = entry();
        assert_eq!(entry.expires_at(), 2_000);
        assert!(!entry.is_expired(2_000));
        assert!(entry.is_expired(2_001));
    }

    #[test]
    fn age_tracks_time_since_write() {
        assert_eq!(entry().age_ms(1_500), 500);
    }
}
