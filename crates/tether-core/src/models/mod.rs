//! Data models for Tether

mod action;
mod cache_entry;
mod conflict;
mod status;

pub use action::{
    ActionId, ActionKind, ActionState, OfflineAction, Payload, Priority, QueueOptions,
};
pub use cache_entry::CacheEntry;
pub use conflict::{ConflictId, ConflictRecord, Resolution, ResolutionChoice};
pub use status::{SyncErrorSummary, SyncState, SyncStatus};
