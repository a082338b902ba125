//! Published sync status

use serde::{Deserialize, Serialize};

use crate::error::ErrorClass;

/// Coarse state label for UI badges.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncState {
    Offline,
    Syncing,
    Synced,
    Error,
}

/// One surfaced failure
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncErrorSummary {
    /// Action the failure belongs to, if any
    pub action_id: Option<String>,
    pub class: ErrorClass,
    pub message: String,
    /// Unix ms
    pub at: i64,
}

/// Snapshot pushed to subscribers on every state change
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncStatus {
    pub is_online: bool,
    pub is_syncing: bool,
    pub pending_actions: usize,
    pub open_conflicts: usize,
    /// Last completed pass (Unix ms); never moves backwards
    pub last_sync_at: Option<i64>,
    /// Latest errors, oldest first
    pub errors: Vec<SyncErrorSummary>,
    /// The last persistence write failed; state is held in memory only
    pub degraded: bool,
}

impl SyncStatus {
    pub fn state(&self) -> SyncState {
        if self.is_syncing {
            SyncState::Syncing
        } else if !self.is_online {
            SyncState::Offline
        } else if self.degraded || self.errors.last().is_some_and(|error| {
            self.last_sync_at.is_none_or(|synced| error.at >= synced)
        }) {
            SyncState::Error
        } else {
            SyncState::Synced
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_status_is_offline() {
        assert_eq!(SyncStatus::default().state(), SyncState::Offline);
    }

    #[test]
    fn syncing_wins_over_other_labels() {
        let status = SyncStatus {
            is_online: true,
            is_syncing: true,
            degraded: true,
            ..SyncStatus::default()
        };
        assert_eq!(status.state(), SyncState::Syncing);
    }

    #[test]
    fn error_after_last_sync_reports_error() {
        let status = SyncStatus {
            is_online: true,
            last_sync_at: Some(100),
            errors: vec![SyncErrorSummary {
                action_id: None,
                class: ErrorClass::Permanent,
                message: "rejected".to_string(),
                at: 150,
            }],
            ..SyncStatus::default()
        };
        assert_eq!(status.state(), SyncState::Error);

        let recovered = SyncStatus {
            last_sync_at: Some(200),
            ..status
        };
        assert_eq!(recovered.state(), SyncState::Synced);
    }
}
