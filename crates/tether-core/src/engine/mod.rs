//! Sync engine
//!
//! Owns the action queue, the data cache and the conflict set behind one
//! async lock, and replays queued actions against a [`RemoteExecutor`]
//! whenever a trigger fires: connectivity restored, an enqueue while online,
//! the periodic timer, or [`SyncEngine::force_sync`]. Only one drain pass
//! runs at a time; triggers that arrive mid-pass collapse into a single
//! follow-up pass.
//!
//! The lock is never held across a remote call, so enqueues, cache reads and
//! status queries stay responsive while a pass is waiting on the network.

mod drain;
mod gate;
mod meta;


use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::sync::{watch, Mutex as AsyncMutex};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

use crate::cache::DataCache;
use crate::clock::{Clock, SystemClock};
use crate::config::EngineConfig;
use crate::conflict::{ConflictResolver, MergeFn};
use crate::error::{Error, Result};
use crate::executor::RemoteExecutor;
use crate::models::{
    ActionId, ActionKind, CacheEntry, ConflictId, ConflictRecord, OfflineAction, Payload,
    QueueOptions, ResolutionChoice, SyncErrorSummary, SyncStatus,
};
use crate::queue::ActionQueue;
use crate::status::{ListenerHandle, StatusPublisher, StatusSubscription};
use crate::store::PersistentStore;

use gate::DrainGate;
use meta::MetaState;

pub use meta::RESOLVED_HISTORY;

/// Timer period used when periodic sync is disabled (the branch never fires)
const IDLE_PERIOD: Duration = Duration::from_secs(24 * 60 * 60);

/// State guarded by the engine lock
struct EngineState {
    queue: ActionQueue,
    cache: DataCache,
    meta: MetaState,
}

impl EngineState {
    const fn is_degraded(&self) -> bool {
        self.queue.is_degraded() || self.cache.is_degraded() || self.meta.is_degraded()
    }
}

struct EngineInner {
    state: AsyncMutex<EngineState>,
    executor: Arc<dyn RemoteExecutor>,
    clock: Arc<dyn Clock>,
    config: EngineConfig,
    resolver: ConflictResolver,
    status: StatusPublisher,
    connectivity: watch::Receiver<bool>,
    gate: DrainGate,
    cancel: watch::Sender<u64>,
    shutdown: watch::Sender<bool>,
    /// Backs `connectivity` when no monitor was supplied
    _always_online: Option<watch::Sender<bool>>,
}

impl EngineInner {
    fn now(&self) -> i64 {
        self.clock.now_ms()
    }

    fn is_online(&self) -> bool {
        *self.connectivity.borrow()
    }

    fn is_shutting_down(&self) -> bool {
        *self.shutdown.borrow()
    }

    /// Recompute the derived status fields from engine state.
    fn publish(&self, state: &EngineState) -> SyncStatus {
        let online = self.is_online();
        self.status.update(|status| {
            status.is_online = online;
            status.pending_actions = state.queue.count();
            status.open_conflicts = state.meta.open_conflicts().len();
            status.last_sync_at = state.meta.last_sync_at();
            status.degraded = state.is_degraded();
        })
    }

    fn record_error(&self, action_id: Option<&ActionId>, error: &Error) {
        self.status.push_error(SyncErrorSummary {
            action_id: action_id.map(ToString::to_string),
            class: error.class(),
            message: error.to_string(),
            at: self.now(),
        });
    }

    /// Ask for a drain pass, starting one if none is running.
    ///
    /// Returns the ticket of the pass that will cover this request, or
    /// `None` once shutdown has begun.
    fn request_sync(self: &Arc<Self>) -> Option<u64> {
        if self.is_shutting_down() {
            return None;
        }
        let (ticket, start) = self.gate.request();
        if start {
            tokio::spawn(Arc::clone(self).drain_loop());
        }
        Some(ticket)
    }
}

/// Configures and starts a [`SyncEngine`]
pub struct SyncEngineBuilder {
    store: Arc<dyn PersistentStore>,
    executor: Arc<dyn RemoteExecutor>,
    clock: Arc<dyn Clock>,
    config: EngineConfig,
    resolver: ConflictResolver,
    connectivity: Option<watch::Receiver<bool>>,
}

impl SyncEngineBuilder {
    pub fn new(store: Arc<dyn PersistentStore>, executor: Arc<dyn RemoteExecutor>) -> Self {
        Self {
            store,
            executor,
            clock: Arc::new(SystemClock),
            config: EngineConfig::default(),
            resolver: ConflictResolver::default(),
            connectivity: None,
        }
    }

    #[must_use]
    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    #[must_use]
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Follow confirmed connectivity transitions, typically from
    /// [`NetworkMonitor::subscribe`](crate::NetworkMonitor::subscribe).
    /// Without one the engine assumes it is always online.
    #[must_use]
    pub fn connectivity(mut self, online: watch::Receiver<bool>) -> Self {
        self.connectivity = Some(online);
        self
    }

    /// Register a merge function for keys in `namespace` (used by the
    /// `Merge` policy).
    #[must_use]
    pub fn merge_fn(mut self, namespace: impl Into<String>, merge: MergeFn) -> Self {
        self.resolver.register_merge(namespace, merge);
        self
    }

    /// Load persisted state and start the trigger loop.
    ///
    /// Must be called from within a Tokio runtime.
    pub async fn init(self) -> Result<SyncEngine> {
        let config = self.config;
        if config.default_max_attempts == 0 {
            return Err(Error::InvalidInput(
                "default_max_attempts must be at least 1".into(),
            ));
        }
        if config.max_queue_len == 0 {
            return Err(Error::InvalidInput("max_queue_len must be at least 1".into()));
        }
        if config.sync_interval.is_some_and(|d| d.is_zero()) {
            return Err(Error::InvalidInput(
                "sync_interval must be non-zero; leave it unset to disable periodic sync".into(),
            ));
        }

        let state = EngineState {
            queue: ActionQueue::load(Arc::clone(&self.store), config.max_queue_len),
            cache: DataCache::load(Arc::clone(&self.store)),
            meta: MetaState::load(Arc::clone(&self.store)),
        };
        let pending = state.queue.count();

        let mut resolver = self.resolver;
        resolver.set_policy(config.conflict_policy);

        let (connectivity, always_online) = match self.connectivity {
            Some(online) => (online, None),
            None => {
                let (sender, receiver) = watch::channel(true);
                (receiver, Some(sender))
            }
        };

        let status = StatusPublisher::new(config.max_error_history);
        let inner = Arc::new(EngineInner {
            state: AsyncMutex::new(state),
            executor: self.executor,
            clock: self.clock,
            config,
            resolver,
            status,
            connectivity,
            gate: DrainGate::new(),
            cancel: watch::Sender::new(0),
            shutdown: watch::Sender::new(false),
            _always_online: always_online,
        });

        {
            let state = inner.state.lock().await;
            inner.publish(&state);
            tracing::info!(
                pending,
                cached = state.cache.len(),
                open_conflicts = state.meta.open_conflicts().len(),
                policy = %inner.resolver.policy(),
                "Sync engine initialized"
            );
        }

        let triggers = tokio::spawn(run_triggers(Arc::clone(&inner)));
        if pending > 0 && inner.is_online() {
            inner.request_sync();
        }

        Ok(SyncEngine {
            inner,
            triggers: Mutex::new(Some(triggers)),
        })
    }
}

/// Offline synchronization engine
pub struct SyncEngine {
    inner: Arc<EngineInner>,
    triggers: Mutex<Option<JoinHandle<()>>>,
}

impl SyncEngine {
    pub fn builder(
        store: Arc<dyn PersistentStore>,
        executor: Arc<dyn RemoteExecutor>,
    ) -> SyncEngineBuilder {
        SyncEngineBuilder::new(store, executor)
    }

    /// Queue a mutation. It is durable once this returns; when online a
    /// drain pass is started in the background.
    pub async fn queue_action(
        &self,
        kind: ActionKind,
        target: &str,
        payload: Option<Payload>,
        options: QueueOptions,
    ) -> Result<ActionId> {
        if self.inner.is_shutting_down() {
            return Err(Error::ShuttingDown);
        }

        let id = {
            let mut state = self.inner.state.lock().await;
            let result = state.queue.enqueue(
                kind,
                target,
                payload,
                &options,
                self.inner.config.default_max_attempts,
                self.inner.now(),
            );
            self.inner.publish(&state);
            match result {
                Ok(id) => id,
                Err(error) => {
                    tracing::warn!(resource = target, "Failed to queue action: {}", error);
                    self.inner.record_error(None, &error);
                    return Err(error);
                }
            }
        };

        tracing::debug!(action_id = %id, resource = target, priority = ?options.priority, "Action queued");
        if self.inner.is_online() {
            self.inner.request_sync();
        }
        Ok(id)
    }

    /// Store a value for offline reads.
    pub async fn cache_data(&self, key: &str, value: Payload, ttl: Duration) -> Result<CacheEntry> {
        let mut state = self.inner.state.lock().await;
        let result = state.cache.put(key, value, ttl, self.inner.now());
        self.inner.publish(&state);
        result.inspect_err(|error| self.inner.record_error(None, error))
    }

    /// Read a cached value; expired entries are misses.
    pub async fn get_cached_data(&self, key: &str) -> Option<CacheEntry> {
        let mut state = self.inner.state.lock().await;
        state.cache.get(key, self.inner.now())
    }

    /// Live cache entries ordered by key.
    pub async fn cached_entries(&self) -> Vec<CacheEntry> {
        let mut state = self.inner.state.lock().await;
        state.cache.entries(self.inner.now())
    }

    /// Remove one key, or the whole cache when `key` is `None`. Returns the
    /// number of entries removed.
    pub async fn clear_cache(&self, key: Option<&str>) -> Result<usize> {
        let mut state = self.inner.state.lock().await;
        let result = match key {
            Some(key) => state.cache.invalidate(key).map(usize::from),
            None => state.cache.clear(),
        };
        self.inner.publish(&state);
        result.inspect_err(|error| self.inner.record_error(None, error))
    }

    /// Queued actions in drain order.
    pub async fn pending_actions(&self) -> Vec<OfflineAction> {
        self.inner.state.lock().await.queue.drain_order()
    }

    /// Drop every queued action.
    pub async fn clear_queue(&self) -> Result<usize> {
        let mut state = self.inner.state.lock().await;
        let result = state.queue.clear();
        self.inner.publish(&state);
        result.inspect_err(|error| self.inner.record_error(None, error))
    }

    /// Run a drain pass now and wait for it.
    ///
    /// If a pass is already running, waits for the single follow-up pass
    /// that covers this request.
    pub async fn force_sync(&self) -> Result<SyncStatus> {
        let ticket = self.inner.request_sync().ok_or(Error::ShuttingDown)?;
        self.inner.gate.wait_for(ticket).await?;
        Ok(self.inner.status.current())
    }

    /// Abort the current pass; its in-flight action goes back to pending
    /// without being charged an attempt. Returns whether a pass was running.
    pub fn cancel_sync(&self) -> bool {
        let running = self.inner.gate.outstanding().is_some();
        if running {
            tracing::info!("Cancelling sync pass");
            self.inner.cancel.send_modify(|generation| *generation += 1);
        }
        running
    }

    pub fn get_sync_status(&self) -> SyncStatus {
        self.inner.status.current()
    }

    /// Stream of status snapshots, starting with the current one.
    pub fn subscribe(&self) -> StatusSubscription {
        self.inner.status.subscribe()
    }

    /// Call `listener` on every status change until the handle is dropped.
    pub fn on_sync_status_change<F>(&self, listener: F) -> ListenerHandle
    where
        F: Fn(&SyncStatus) + Send + Sync + 'static,
    {
        self.inner.status.on_change(listener)
    }

    pub async fn open_conflicts(&self) -> Vec<ConflictRecord> {
        self.inner.state.lock().await.meta.open_conflicts().to_vec()
    }

    /// Recently resolved conflicts, oldest first.
    pub async fn recent_resolutions(&self) -> Vec<ConflictRecord> {
        self.inner.state.lock().await.meta.resolved().to_vec()
    }

    /// Settle an open conflict with an explicit choice.
    pub async fn resolve_conflict(
        &self,
        id: &ConflictId,
        choice: ResolutionChoice,
    ) -> Result<ConflictRecord> {
        let (resolved, repushed) = {
            let mut state = self.inner.state.lock().await;
            let record = state
                .meta
                .find_open(id)
                .cloned()
                .ok_or_else(|| Error::NotFound(format!("conflict {id}")))?;
            let outcome = ConflictResolver::apply_choice(&record, choice);
            let settled = self.inner.settle(&mut state, record, outcome);
            self.inner.publish(&state);
            settled
        };

        if repushed && self.inner.is_online() {
            self.inner.request_sync();
        }
        Ok(resolved)
    }

    /// Stop triggers, interrupt any in-flight call and wait for the current
    /// pass to wind down. Later `queue_action` and `force_sync` calls fail
    /// with [`Error::ShuttingDown`].
    pub async fn shutdown(&self) {
        if self.inner.shutdown.send_replace(true) {
            return;
        }
        tracing::info!("Shutting down sync engine");

        let triggers = self
            .triggers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(task) = triggers {
            if let Err(error) = task.await {
                tracing::warn!("Sync trigger task ended abnormally: {}", error);
            }
        }

        if let Some(ticket) = self.inner.gate.outstanding() {
            if let Err(error) = self.inner.gate.wait_for(ticket).await {
                tracing::debug!("Stopped waiting for final pass: {}", error);
            }
        }

        let state = self.inner.state.lock().await;
        self.inner.publish(&state);
        tracing::info!(pending = state.queue.count(), "Sync engine stopped");
    }
}

impl Drop for SyncEngine {
    fn drop(&mut self) {
        self.inner.shutdown.send_replace(true);
        if let Some(task) = self
            .triggers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            task.abort();
        }
    }
}

/// Turns connectivity transitions and timer ticks into drain requests.
async fn run_triggers(inner: Arc<EngineInner>) {
    let mut connectivity = inner.connectivity.clone();
    let mut shutdown = inner.shutdown.subscribe();
    let mut was_online = *connectivity.borrow_and_update();

    let period = inner.config.sync_interval;
    let tick_every = period.unwrap_or(IDLE_PERIOD);
    let mut ticker = tokio::time::interval_at(Instant::now() + tick_every, tick_every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut watching = true;

    loop {
        tokio::select! {
            () = async {
                let _ = shutdown.wait_for(|stopping| *stopping).await;
            } => break,
            changed = connectivity.changed(), if watching => {
                if changed.is_err() {
                    tracing::warn!("Connectivity source closed; keeping last known state");
                    watching = false;
                    continue;
                }
                let online = *connectivity.borrow_and_update();
                inner.status.update(|status| status.is_online = online);
                if online && !was_online {
                    tracing::info!("Connectivity restored, starting sync");
                    inner.request_sync();
                } else if !online && was_online {
                    tracing::info!("Connectivity lost, queueing locally");
                }
                was_online = online;
            }
            _ = ticker.tick(), if period.is_some() => {
                if inner.is_online() {
                    tracing::debug!("Periodic sync");
                    inner.request_sync();
                }
            }
        }
    }

    tracing::debug!("Sync trigger loop stopped");
}
