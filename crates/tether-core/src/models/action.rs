//! Offline action model

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// A unique identifier for a queued action, using UUID v7 (time-sortable)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ActionId(Uuid);

impl ActionId {
    /// Create a new unique action ID using UUID v7
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    /// Get the string representation of this ID
    #[must_use]
    pub fn as_str(&self) -> String {
        self.0.to_string()
    }
}

impl Default for ActionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ActionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for ActionId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

/// What the deferred mutation does on the remote side
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    Create,
    Update,
    Delete,
    /// Any other verb the remote executor understands
    Custom(String),
}

impl ActionKind {
    pub fn label(&self) -> &str {
        match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Delete => "delete",
            Self::Custom(verb) => verb,
        }
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for ActionKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let verb = s.trim();
        if verb.is_empty() {
            return Err("action kind must not be empty".to_string());
        }
        Ok(match verb.to_ascii_lowercase().as_str() {
            "create" => Self::Create,
            "update" => Self::Update,
            "delete" => Self::Delete,
            other => Self::Custom(other.to_string()),
        })
    }
}

/// Drain priority. Declaration order is drain order: `Critical` first.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Critical,
    High,
    #[default]
    Normal,
    Low,
}

impl FromStr for Priority {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "critical" => Ok(Self::Critical),
            "high" => Ok(Self::High),
            "normal" => Ok(Self::Normal),
            "low" => Ok(Self::Low),
            other => Err(format!("unknown priority '{other}'")),
        }
    }
}

/// Lifecycle state of a queued action
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionState {
    Pending,
    InFlight,
    Done,
    Abandoned,
}

impl ActionState {
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Abandoned)
    }
}

/// Mutation payload: a closed set of serializable shapes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum Payload {
    Text(String),
    Bytes(Vec<u8>),
    Json(serde_json::Value),
}

impl Payload {
    /// Interpret as JSON when possible (text is parsed, falling back to a string value).
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Self::Json(value) => value.clone(),
            Self::Text(text) => serde_json::from_str(text)
                .unwrap_or_else(|_| serde_json::Value::String(text.clone())),
            Self::Bytes(bytes) => serde_json::Value::Array(
                bytes.iter().map(|byte| serde_json::Value::from(*byte)).collect(),
            ),
        }
    }
}

impl From<serde_json::Value> for Payload {
    fn from(value: serde_json::Value) -> Self {
        Self::Json(value)
    }
}

impl From<&str> for Payload {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for Payload {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<Vec<u8>> for Payload {
    fn from(value: Vec<u8>) -> Self {
        Self::Bytes(value)
    }
}

/// Per-call options for `queue_action`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueueOptions {
    pub priority: Priority,
    /// Overrides `EngineConfig::default_max_attempts`
    pub max_attempts: Option<u32>,
    /// Cache key this mutation affects; defaults to the target
    pub cache_key: Option<String>,
}

impl QueueOptions {
    #[must_use]
    pub const fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    #[must_use]
    pub const fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = Some(max_attempts);
        self
    }

    #[must_use]
    pub fn with_cache_key(mut self, key: impl Into<String>) -> Self {
        self.cache_key = Some(key.into());
        self
    }
}

/// A deferred mutation waiting to be replayed against the remote
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OfflineAction {
    pub id: ActionId,
    pub kind: ActionKind,
    /// Opaque resource locator for the remote executor
    pub target: String,
    /// Absent for deletes
    #[serde(default)]
    pub payload: Option<Payload>,
    pub priority: Priority,
    /// Creation timestamp (Unix ms)
    pub created_at: i64,
    /// Insertion order, breaks ties inside a priority band
    pub sequence: u64,
    /// Executions already tried
    pub attempt: u32,
    pub max_attempts: u32,
    pub state: ActionState,
    /// Earliest time (Unix ms) the next attempt may run
    #[serde(default)]
    pub next_attempt_at: Option<i64>,
    /// Most recent failure message
    #[serde(default)]
    pub last_error: Option<String>,
    #[serde(default)]
    pub cache_key: Option<String>,
}

impl OfflineAction {
    /// Cache key this action affects.
    pub fn affected_key(&self) -> &str {
        self.cache_key.as_deref().unwrap_or(&self.target)
    }

    /// Whether backoff allows an attempt at `now_ms`.
    pub fn is_eligible(&self, now_ms: i64) -> bool {
        self.state == ActionState::Pending && self.next_attempt_at.is_none_or(|at| at <= now_ms)
    }

    /// Sort key for drain order.
    pub const fn drain_key(&self) -> (Priority, u64) {
        (self.priority, self.sequence)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_action_id_unique() {
        assert_ne!(ActionId::new(), ActionId::new());
    }

    #[test]
    fn test_action_id_parse() {
        let id = ActionId::new();
        let parsed: ActionId = id.as_str().parse().unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn priority_orders_critical_first() {
        let mut priorities = vec![Priority::Low, Priority::Critical, Priority::Normal, Priority::High];
        priorities.sort();
        assert_eq!(
            priorities,
            vec![Priority::Critical, Priority::High, Priority::Normal, Priority::Low]
        );
    }

    #[test]
    fn action_kind_parses_custom_verbs() {
        assert_eq!("Update".parse::<ActionKind>().unwrap(), ActionKind::Update);
        assert_eq!(
            "archive".parse::<ActionKind>().unwrap(),
            ActionKind::Custom("archive".to_string())
        );
        assert!("  ".parse::<ActionKind>().is_err());
    }

    #[test]
    fn payload_serializes_as_tagged_variant() {
        let payload = Payload::Json(serde_json::json!({"name": "Ada"}));
        let encoded = serde_json::to_string(&payload).unwrap();
        assert_eq!(encoded, r#"{"type":"json","value":{"name":"Ada"}}"#);
    }

    #[test]
    fn text_payload_to_json_falls_back_to_string() {
        assert_eq!(Payload::from("plain").to_json(), serde_json::json!("plain"));
        assert_eq!(Payload::from(r#"{"a":1}"#).to_json(), serde_json::json!({"a": 1}));
    }
}
