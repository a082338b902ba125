//! Capability interface to the remote service.
//!
//! The engine never speaks a wire protocol itself. Callers hand it a
//! [`RemoteExecutor`] that replays actions and fetches current server values,
//! reporting failures as [`Error::TransientNetwork`] (retry later) or
//! [`Error::PermanentRejection`] (drop the action).
//!
//! [`Error::TransientNetwork`]: crate::Error::TransientNetwork
//! [`Error::PermanentRejection`]: crate::Error::PermanentRejection

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::models::{ActionKind, OfflineAction, Payload};

/// What the executor is asked to perform
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionRequest {
    pub kind: ActionKind,
    pub target: String,
    pub payload: Option<Payload>,
}

impl From<&OfflineAction> for ActionRequest {
    fn from(action: &OfflineAction) -> Self {
        Self {
            kind: action.kind.clone(),
            target: action.target.clone(),
            payload: action.payload.clone(),
        }
    }
}

/// Successful execution result
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExecuteResponse {
    #[serde(default)]
    pub value: Option<Payload>,
    /// New server version of the affected resource, when reported
    #[serde(default)]
    pub version: Option<u64>,
}

/// Current server state of a key
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FetchedValue {
    pub value: Payload,
    pub version: u64,
}

#[async_trait]
pub trait RemoteExecutor: Send + Sync {
    /// Replay one queued action.
    async fn execute(&self, request: &ActionRequest) -> Result<ExecuteResponse>;

    /// Read the server's current value and version for a cache key.
    async fn fetch(&self, key: &str) -> Result<FetchedValue>;
}
