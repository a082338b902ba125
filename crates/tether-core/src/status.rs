//! In-process status fan-out.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use crate::models::{SyncErrorSummary, SyncStatus};

const CHANNEL_CAPACITY: usize = 64;

/// Holds the current [`SyncStatus`] and pushes every change to subscribers.
pub struct StatusPublisher {
    current: Arc<Mutex<SyncStatus>>,
    sender: broadcast::Sender<SyncStatus>,
    max_error_history: usize,
}

impl StatusPublisher {
    pub fn new(max_error_history: usize) -> Self {
        let (sender, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self {
            current: Arc::new(Mutex::new(SyncStatus::default())),
            sender,
            max_error_history: max_error_history.max(1),
        }
    }

    pub fn current(&self) -> SyncStatus {
        self.lock().clone()
    }

    /// Apply `change` to the snapshot and notify subscribers if anything moved.
    ///
    /// `last_sync_at` never goes backwards and the error list is trimmed to
    /// the newest `max_error_history` entries.
    pub fn update(&self, change: impl FnOnce(&mut SyncStatus)) -> SyncStatus {
        let mut current = self.lock();
        let mut next = current.clone();
        change(&mut next);

        next.last_sync_at = match (current.last_sync_at, next.last_sync_at) {
            (Some(previous), Some(candidate)) => Some(previous.max(candidate)),
            (previous, candidate) => candidate.or(previous),
        };
        if next.errors.len() > self.max_error_history {
            let excess = next.errors.len() - self.max_error_history;
            next.errors.drain(..excess);
        }

        if next != *current {
            *current = next.clone();
            // No receivers is fine
            let _ = self.sender.send(next.clone());
        }
        next
    }

    /// Append an error summary.
    pub fn push_error(&self, summary: SyncErrorSummary) -> SyncStatus {
        self.update(|status| status.errors.push(summary))
    }

    /// Receive the current snapshot followed by every change.
    pub fn subscribe(&self) -> StatusSubscription {
        let current = self.lock();
        StatusSubscription {
            initial: Some(current.clone()),
            receiver: self.sender.subscribe(),
            current: Arc::clone(&self.current),
        }
    }

    /// Run `listener` on a background task for every status change.
    ///
    /// Must be called from within a Tokio runtime. Dropping or calling
    /// [`ListenerHandle::unsubscribe`] on the returned handle stops delivery.
    pub fn on_change<F>(&self, listener: F) -> ListenerHandle
    where
        F: Fn(&SyncStatus) + Send + Sync + 'static,
    {
        let mut subscription = self.subscribe();
        let task = tokio::spawn(async move {
            while let Some(status) = subscription.recv().await {
                listener(&status);
            }
        });
        ListenerHandle::new(task)
    }

    fn lock(&self) -> MutexGuard<'_, SyncStatus> {
        lock_status(&self.current)
    }
}

fn lock_status(current: &Mutex<SyncStatus>) -> MutexGuard<'_, SyncStatus> {
    current.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Stream of status snapshots; dropping it unsubscribes.
pub struct StatusSubscription {
    initial: Option<SyncStatus>,
    receiver: broadcast::Receiver<SyncStatus>,
    current: Arc<Mutex<SyncStatus>>,
}

impl StatusSubscription {
    /// Next snapshot, or `None` once the publisher is gone.
    ///
    /// A subscriber that falls behind jumps straight to the newest snapshot
    /// and then continues with changes made after it.
    pub async fn recv(&mut self) -> Option<SyncStatus> {
        if let Some(initial) = self.initial.take() {
            return Some(initial);
        }
        match self.receiver.recv().await {
            Ok(status) => Some(status),
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                tracing::warn!(
                    "Status subscriber fell behind by {} update(s); skipping to latest",
                    skipped
                );
                // Updates are sent under this lock, so nothing slips between
                // the snapshot and the fresh receiver
                let current = lock_status(&self.current);
                self.receiver = self.receiver.resubscribe();
                Some(current.clone())
            }
            Err(broadcast::error::RecvError::Closed) => None,
        }
    }
}

/// Keeps an `on_change` listener alive
pub struct ListenerHandle {
    task: Option<JoinHandle<()>>,
}

impl ListenerHandle {
    pub(crate) const fn new(task: JoinHandle<()>) -> Self {
        Self { task: Some(task) }
    }

    pub fn unsubscribe(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

impl Drop for ListenerHandle {
    fn drop(&mut self) {
        self.stop();
    }
}
