//! Engine and monitor configuration.
//!
//! Both structs deserialize with defaults for every missing field, so a
//! profile only needs to name what it changes. Durations are expressed in
//! milliseconds on the wire.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::conflict::ConflictPolicy;
use crate::error::{Error, Result};
use crate::util::normalize_text_option;

const DEFAULT_SYNC_INTERVAL_SECS: u64 = 30;
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 15;
const DEFAULT_MAX_ATTEMPTS: u32 = 5;

/// Sync engine tuning
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Periodic drain interval while online (`None` disables the timer)
    #[serde(with = "millis_opt")]
    pub sync_interval: Option<Duration>,
    /// Deadline for each remote call
    #[serde(with = "millis")]
    pub request_timeout: Duration,
    /// First retry delay
    #[serde(with = "millis")]
    pub backoff_base: Duration,
    /// Retry delay ceiling
    #[serde(with = "millis")]
    pub backoff_max: Duration,
    /// Attempts granted to actions queued without an explicit ceiling
    pub default_max_attempts: u32,
    /// Cache entries older than this are re-fetched during reconciliation
    #[serde(with = "millis")]
    pub freshness_threshold: Duration,
    pub conflict_policy: ConflictPolicy,
    /// Pending actions allowed before `queue_action` is rejected
    pub max_queue_len: usize,
    /// Error summaries kept in `SyncStatus`
    pub max_error_history: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            sync_interval: Some(Duration::from_secs(DEFAULT_SYNC_INTERVAL_SECS)),
            request_timeout: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
            backoff_base: Duration::from_secs(1),
            backoff_max: Duration::from_secs(5 * 60),
            default_max_attempts: DEFAULT_MAX_ATTEMPTS,
            freshness_threshold: Duration::from_secs(5 * 60),
            conflict_policy: ConflictPolicy::ServerWins,
            max_queue_len: 10_000,
            max_error_history: 20,
        }
    }
}

impl EngineConfig {
    /// Set the periodic sync interval
    #[must_use]
    pub const fn with_sync_interval(mut self, interval: Duration) -> Self {
        self.sync_interval = Some(interval);
        self
    }

    /// Disable the periodic timer (reconnect, enqueue and manual triggers only)
    #[must_use]
    pub const fn without_auto_sync(mut self) -> Self {
        self.sync_interval = None;
        self
    }

    #[must_use]
    pub const fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    #[must_use]
    pub const fn with_backoff(mut self, base: Duration, max: Duration) -> Self {
        self.backoff_base = base;
        self.backoff_max = max;
        self
    }

    #[must_use]
    pub const fn with_default_max_attempts(mut self, attempts: u32) -> Self {
        self.default_max_attempts = attempts;
        self
    }

    #[must_use]
    pub const fn with_freshness_threshold(mut self, threshold: Duration) -> Self {
        self.freshness_threshold = threshold;
        self
    }

    #[must_use]
    pub const fn with_conflict_policy(mut self, policy: ConflictPolicy) -> Self {
        self.conflict_policy = policy;
        self
    }

    #[must_use]
    pub const fn with_max_queue_len(mut self, len: usize) -> Self {
        self.max_queue_len = len;
        self
    }

    /// Delay before the next attempt, given how many attempts were made
    /// before the failure being handled: `base * 2^attempt`, capped.
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
        self.backoff_base
            .checked_mul(factor)
            .unwrap_or(self.backoff_max)
            .min(self.backoff_max)
    }

    /// Defaults plus overrides read through `lookup`.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        Self::default().apply_overrides(lookup)
    }

    /// Apply overrides from an arbitrary lookup (environment, profile map).
    pub fn apply_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        if let Some(raw) = normalize_text_option(lookup("TETHER_SYNC_INTERVAL_SECS")) {
            let secs = parse_u64("TETHER_SYNC_INTERVAL_SECS", &raw)?;
            self.sync_interval = (secs > 0).then(|| Duration::from_secs(secs));
        }
        if let Some(raw) = normalize_text_option(lookup("TETHER_REQUEST_TIMEOUT_SECS")) {
            let secs = parse_u64("TETHER_REQUEST_TIMEOUT_SECS", &raw)?;
            if secs == 0 {
                return Err(Error::InvalidInput(
                    "TETHER_REQUEST_TIMEOUT_SECS must be greater than zero".to_string(),
                ));
            }
            self.request_timeout = Duration::from_secs(secs);
        }
        if let Some(raw) = normalize_text_option(lookup("TETHER_MAX_ATTEMPTS")) {
            let attempts = u32::try_from(parse_u64("TETHER_MAX_ATTEMPTS", &raw)?)
                .map_err(|_| Error::InvalidInput("TETHER_MAX_ATTEMPTS is too large".into()))?;
            if attempts == 0 {
                return Err(Error::InvalidInput(
                    "TETHER_MAX_ATTEMPTS must be at least 1".to_string(),
                ));
            }
            self.default_max_attempts = attempts;
        }
        if let Some(raw) = normalize_text_option(lookup("TETHER_CONFLICT_POLICY")) {
            self.conflict_policy = raw.parse().map_err(Error::InvalidInput)?;
        }
        Ok(self)
    }
}

/// Network monitor tuning
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    /// A changed observation must hold this long before it is confirmed
    #[serde(with = "millis")]
    pub debounce: Duration,
    /// How often the probe runs
    #[serde(with = "millis")]
    pub probe_interval: Duration,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            debounce: Duration::from_secs(1),
            probe_interval: Duration::from_secs(10),
        }
    }
}

fn parse_u64(name: &str, raw: &str) -> Result<u64> {
    raw.parse()
        .map_err(|_| Error::InvalidInput(format!("{name} must be a whole number, got '{raw}'")))
}

mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(u64::try_from(value.as_millis()).unwrap_or(u64::MAX))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

mod millis_opt {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(
        value: &Option<Duration>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match value {
            Some(duration) => serializer
                .serialize_some(&u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<Duration>, D::Error> {
        Option::<u64>::deserialize(deserializer).map(|value| value.map(Duration::from_millis))
    }
}
