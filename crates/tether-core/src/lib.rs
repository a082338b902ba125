//! tether-core - Core library for Tether
//!
//! This crate contains the offline synchronization engine used by Tether
//! clients: a durable priority action queue, a TTL read cache, conflict
//! resolution against server versions, connectivity monitoring and a status
//! publisher, all driven by a single-drain sync engine.

pub mod cache;
pub mod clock;
pub mod config;
pub mod conflict;
pub mod engine;
pub mod error;
pub mod executor;
pub mod models;
pub mod monitor;
pub mod queue;
pub mod status;
pub mod store;
pub mod util;

#[cfg(test)]
mod test_support;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{EngineConfig, MonitorConfig};
pub use conflict::{shallow_merge, ConflictPolicy, ConflictResolver, MergeFn};
pub use engine::{SyncEngine, SyncEngineBuilder};
pub use error::{Error, ErrorClass, Result};
pub use executor::{ActionRequest, ExecuteResponse, FetchedValue, RemoteExecutor};
pub use models::{
    ActionId, ActionKind, ActionState, CacheEntry, ConflictId, ConflictRecord, OfflineAction,
    Payload, Priority, QueueOptions, Resolution, ResolutionChoice, SyncErrorSummary, SyncState,
    SyncStatus,
};
pub use monitor::{ConnectivityProbe, NetworkMonitor};
pub use status::{ListenerHandle, StatusPublisher, StatusSubscription};
pub use store::{MemoryStore, PersistentStore, SqliteStore};
