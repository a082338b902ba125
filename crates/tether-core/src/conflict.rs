//! Conflict resolution policies.
//!
//! The resolver only decides; the engine applies the outcome to the cache,
//! the conflict set and (for client wins) the action queue.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::models::{ConflictRecord, Payload, Resolution, ResolutionChoice};
use crate::util::key_namespace;

/// Caller-supplied merge: `(local, server) -> merged`
pub type MergeFn = Arc<dyn Fn(&Payload, &Payload) -> Payload + Send + Sync>;

/// How detected conflicts are settled
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictPolicy {
    #[default]
    ServerWins,
    ClientWins,
    Merge,
    Manual,
}

impl ConflictPolicy {
    pub const fn label(self) -> &'static str {
        match self {
            Self::ServerWins => "server_wins",
            Self::ClientWins => "client_wins",
            Self::Merge => "merge",
            Self::Manual => "manual",
        }
    }
}

impl fmt::Display for ConflictPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for ConflictPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "server_wins" | "server" => Ok(Self::ServerWins),
            "client_wins" | "client" => Ok(Self::ClientWins),
            "merge" => Ok(Self::Merge),
            "manual" => Ok(Self::Manual),
            other => Err(format!("unknown conflict policy '{other}'")),
        }
    }
}

/// What to do with a conflict
#[derive(Debug, Clone, PartialEq)]
pub struct ResolutionOutcome {
    pub resolution: Resolution,
    /// Value written into the cache
    pub value: Payload,
    /// Queue the value as an update so the server catches up
    pub repush: bool,
}

/// Applies a [`ConflictPolicy`] plus per-namespace merge functions
#[derive(Clone, Default)]
pub struct ConflictResolver {
    policy: ConflictPolicy,
    merges: HashMap<String, MergeFn>,
}

impl fmt::Debug for ConflictResolver {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut namespaces: Vec<&String> = self.merges.keys().collect();
        namespaces.sort();
        formatter
            .debug_struct("ConflictResolver")
            .field("policy", &self.policy)
            .field("merge_namespaces", &namespaces)
            .finish()
    }
}

impl ConflictResolver {
    pub fn new(policy: ConflictPolicy) -> Self {
        Self {
            policy,
            merges: HashMap::new(),
        }
    }

    pub const fn policy(&self) -> ConflictPolicy {
        self.policy
    }

    pub fn set_policy(&mut self, policy: ConflictPolicy) {
        self.policy = policy;
    }

    /// Register a merge function for every key in `namespace`.
    pub fn register_merge(&mut self, namespace: impl Into<String>, merge: MergeFn) {
        self.merges.insert(namespace.into(), merge);
    }

    /// Decide a conflict under the configured policy; `None` under `Manual`.
    pub fn auto_resolve(&self, record: &ConflictRecord) -> Option<ResolutionOutcome> {
        match self.policy {
            ConflictPolicy::Manual => None,
            ConflictPolicy::ServerWins => Some(server_wins(record)),
            ConflictPolicy::ClientWins => Some(client_wins(record)),
            ConflictPolicy::Merge => Some(self.merge(record).unwrap_or_else(|| {
                tracing::debug!(
                    key = %record.key,
                    "No merge function registered for namespace; falling back to server wins"
                );
                server_wins(record)
            })),
        }
    }

    /// Outcome for an explicit operator choice.
    pub fn apply_choice(record: &ConflictRecord, choice: ResolutionChoice) -> ResolutionOutcome {
        match choice {
            ResolutionChoice::Server => server_wins(record),
            ResolutionChoice::Client => client_wins(record),
            ResolutionChoice::Merged(value) => ResolutionOutcome {
                resolution: Resolution::Merged,
                value,
                repush: true,
            },
        }
    }

    fn merge(&self, record: &ConflictRecord) -> Option<ResolutionOutcome> {
        let merge = self.merges.get(key_namespace(&record.key))?;
        Some(ResolutionOutcome {
            resolution: Resolution::Merged,
            value: merge(&record.local_value, &record.server_value),
            repush: true,
        })
    }
}

/// Version written alongside a resolved value.
///
/// Adopting the server value takes the server's version so the next
/// reconciliation sees a match. Client and merged values are one past the
/// current local version and never behind the server; their re-push
/// replaces it with whatever version the server reports.
pub fn resolved_version(resolution: Resolution, current_local: u64, server: u64) -> u64 {
    match resolution {
        Resolution::Server => server,
        Resolution::Client | Resolution::Merged => current_local.saturating_add(1).max(server),
    }
}

fn server_wins(record: &ConflictRecord) -> ResolutionOutcome {
    ResolutionOutcome {
        resolution: Resolution::Server,
        value: record.server_value.clone(),
        repush: false,
    }
}

fn client_wins(record: &ConflictRecord) -> ResolutionOutcome {
    ResolutionOutcome {
        resolution: Resolution::Client,
        value: record.local_value.clone(),
        repush: true,
    }
}

/// Field-by-field merge of two JSON objects: server fields first, local
/// fields layered on top. Non-object values resolve to the server value.
pub fn shallow_merge(local: &Payload, server: &Payload) -> Payload {
    match (local.to_json(), server.to_json()) {
        (serde_json::Value::Object(local), serde_json::Value::Object(mut merged)) => {
            for (field, value) in local {
                merged.insert(field, value);
            }
            Payload::Json(serde_json::Value::Object(merged))
        }
        _ => server.clone(),
    }
}
