//! Error types for tether-core

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type alias using tether-core's Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in tether-core operations
#[derive(Error, Debug)]
pub enum Error {
    /// Connection refused, reset, or a 5xx-equivalent answer from the remote
    #[error("Transient network error: {0}")]
    TransientNetwork(String),

    /// The remote will never accept this request (validation, 4xx-equivalent)
    #[error("Permanent rejection: {0}")]
    PermanentRejection(String),

    /// A remote call exceeded its deadline
    #[error("Remote call timed out after {0} ms")]
    Timeout(u64),

    /// Persistence read/write failure
    #[error("Storage error: {0}")]
    Storage(String),

    /// SQLite error
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// An action used up all of its attempts
    #[error("Retry budget exhausted for action {action_id} after {attempts} attempts")]
    RetryBudgetExhausted { action_id: String, attempts: u32 },

    /// The pending queue reached its configured bound
    #[error("Action queue is full ({limit} pending actions)")]
    QueueFull { limit: usize },

    /// Action, cache entry or conflict not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// The in-flight call was cancelled by the caller
    #[error("Sync pass cancelled")]
    Cancelled,

    /// The engine is shutting down and no longer accepts work
    #[error("Sync engine is shutting down")]
    ShuttingDown,
}

/// Coarse classification of an [`Error`], driving retry decisions and the
/// error summaries published in `SyncStatus`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorClass {
    /// Retry later with backoff
    Transient,
    /// Abandon immediately
    Permanent,
    /// Persistence failure; engine keeps running from memory
    Storage,
    /// Attempt ceiling reached
    Budget,
    /// Caller mistakes, cancellation and the like
    Internal,
}

impl Error {
    /// Classify this error.
    pub const fn class(&self) -> ErrorClass {
        match self {
            Self::TransientNetwork(_) | Self::Timeout(_) => ErrorClass::Transient,
            Self::PermanentRejection(_) => ErrorClass::Permanent,
            Self::Storage(_) | Self::Sqlite(_) | Self::Io(_) | Self::Serialization(_) => {
                ErrorClass::Storage
            }
            Self::RetryBudgetExhausted { .. } => ErrorClass::Budget,
            Self::QueueFull { .. }
            | Self::NotFound(_)
            | Self::InvalidInput(_)
            | Self::Cancelled
            | Self::ShuttingDown => ErrorClass::Internal,
        }
    }

    /// Whether a failed remote call should be retried on a later pass.
    pub const fn is_transient(&self) -> bool {
        matches!(self.class(), ErrorClass::Transient)
    }

    /// Wrap any persistence-layer failure as [`Error::Storage`].
    pub fn storage(context: &str, error: impl std::fmt::Display) -> Self {
        Self::Storage(format!("{context}: {error}"))
    }
}
