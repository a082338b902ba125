//! Sync conflict model

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use super::Payload;

/// Identifier of a detected conflict
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConflictId(Uuid);

impl ConflictId {
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for ConflictId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConflictId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for ConflictId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

/// How a conflict was settled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Resolution {
    Server,
    Client,
    Merged,
}

/// Operator decision passed to `resolve_conflict`
#[derive(Debug, Clone, PartialEq)]
pub enum ResolutionChoice {
    /// Adopt the server value
    Server,
    /// Keep the local value and push it again
    Client,
    /// Use an explicitly merged value
    Merged(Payload),
}

impl ResolutionChoice {
    pub const fn resolution(&self) -> Resolution {
        match self {
            Self::Server => Resolution::Server,
            Self::Client => Resolution::Client,
            Self::Merged(_) => Resolution::Merged,
        }
    }
}

/// Divergence between the cached value and the server's current value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConflictRecord {
    pub id: ConflictId,
    /// Cache key involved in the conflict
    pub key: String,
    pub local_value: Payload,
    pub local_version: u64,
    pub server_value: Payload,
    pub server_version: u64,
    /// Detection timestamp (Unix ms)
    pub detected_at: i64,
    pub resolved: bool,
    #[serde(default)]
    pub resolution: Option<Resolution>,
    /// Resolution timestamp (Unix ms)
    #[serde(default)]
    pub resolved_at: Option<i64>,
}

impl ConflictRecord {
    pub fn new(
        key: impl Into<String>,
        local: (Payload, u64),
        server: (Payload, u64),
        detected_at: i64,
    ) -> Self {
        Self {
            id: ConflictId::new(),
            key: key.into(),
            local_value: local.0,
            local_version: local.1,
            server_value: server.0,
            server_version: server.1,
            detected_at,
            resolved: false,
            resolution: None,
            resolved_at: None,
        }
    }

    /// Mark as settled.
    pub fn mark_resolved(&mut self, resolution: Resolution, at: i64) {
        self.resolved = true;
        self.resolution = Some(resolution);
        self.resolved_at = Some(at);
    }
}
