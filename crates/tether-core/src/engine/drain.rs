//! Drain pass: replay queued actions, reconcile stale cache entries and
//! settle conflicts.

use std::future::Future;
use std::sync::Arc;

use tokio::sync::watch;

use super::{EngineInner, EngineState};
use crate::conflict::{resolved_version, ResolutionOutcome};
use crate::error::{Error, Result};
use crate::executor::{ActionRequest, ExecuteResponse, FetchedValue};
use crate::models::{ActionKind, ConflictRecord, OfflineAction, Priority, QueueOptions};
use crate::queue::FailureOutcome;

enum Step {
    Continue,
    Stop,
}

/// Counters logged at the end of a pass
#[derive(Debug, Default)]
struct PassReport {
    executed: usize,
    retried: usize,
    abandoned: usize,
    deferred: usize,
    refreshed: usize,
    conflicts: usize,
    resolved: usize,
}

impl EngineInner {
    /// Run passes until no follow-up has been requested.
    pub(super) async fn drain_loop(self: Arc<Self>) {
        loop {
            let follow_up = self.run_pass().await;
            if follow_up {
                // Still draining, so this only marks a rerun
                self.gate.request();
            }
            if !self.gate.finish_pass() {
                break;
            }
        }
    }

    /// One drain pass. Returns whether new work was queued along the way.
    async fn run_pass(&self) -> bool {
        let mut cancel = self.cancel.subscribe();
        if self.is_shutting_down() {
            return false;
        }
        if !self.is_online() {
            tracing::debug!("Offline, skipping sync pass");
            let state = self.state.lock().await;
            self.publish(&state);
            return false;
        }

        self.status.update(|status| status.is_syncing = true);
        let snapshot = self.state.lock().await.queue.drain_order();
        tracing::info!(pending = snapshot.len(), "Sync pass started");

        let mut report = PassReport::default();
        let mut completed = true;
        for action in &snapshot {
            if let Some(reason) = self.stop_reason(&cancel) {
                tracing::info!("Stopping sync pass: {}", reason);
                completed = false;
                break;
            }
            if !action.is_eligible(self.now()) {
                report.deferred += 1;
                continue;
            }
            if let Step::Stop = self.process_action(action, &mut cancel, &mut report).await {
                completed = false;
                break;
            }
        }

        if completed {
            completed = self.reconcile(&mut cancel, &mut report).await;
        }

        let follow_up = {
            let mut state = self.state.lock().await;
            let repushed = self.auto_resolve_open(&mut state, &mut report);
            if completed {
                state.meta.record_sync(self.now());
            }
            self.publish(&state);
            repushed
        };
        self.status.update(|status| status.is_syncing = false);

        tracing::info!(
            completed,
            executed = report.executed,
            retried = report.retried,
            abandoned = report.abandoned,
            deferred = report.deferred,
            refreshed = report.refreshed,
            conflicts = report.conflicts,
            resolved = report.resolved,
            "Sync pass finished"
        );
        follow_up && !self.is_shutting_down()
    }

    fn stop_reason(&self, cancel: &watch::Receiver<u64>) -> Option<&'static str> {
        if self.is_shutting_down() {
            Some("shutting down")
        } else if cancel.has_changed().unwrap_or(true) {
            Some("cancelled")
        } else if !self.is_online() {
            Some("connectivity lost")
        } else {
            None
        }
    }

    async fn process_action(
        &self,
        action: &OfflineAction,
        cancel: &mut watch::Receiver<u64>,
        report: &mut PassReport,
    ) -> Step {
        {
            let mut state = self.state.lock().await;
            if state.queue.mark_in_flight(&action.id).is_err() {
                tracing::debug!(action_id = %action.id, "Action left the queue before execution");
                return Step::Continue;
            }
        }

        tracing::debug!(
            action_id = %action.id,
            kind = %action.kind,
            resource = %action.target,
            attempt = action.attempt + 1,
            "Executing action"
        );
        let request = ActionRequest::from(action);
        let result = self
            .call_remote(self.executor.execute(&request), cancel)
            .await;

        let mut state = self.state.lock().await;
        let step = match result {
            Ok(response) => {
                self.complete_action(&mut state, action, response);
                report.executed += 1;
                Step::Continue
            }
            Err(error @ (Error::Cancelled | Error::ShuttingDown)) => {
                tracing::info!(action_id = %action.id, "Interrupted in flight ({}), back to pending", error);
                if let Err(error) = state.queue.revert_in_flight(&action.id) {
                    tracing::debug!("Could not revert action: {}", error);
                }
                Step::Stop
            }
            Err(error) if error.is_transient() => {
                self.retry_later(&mut state, action, &error, report);
                Step::Continue
            }
            Err(error) => {
                match state.queue.abandon(&action.id, &error) {
                    Ok(abandoned) => {
                        tracing::error!(
                            action_id = %abandoned.id,
                            resource = %abandoned.target,
                            "Action rejected, abandoning: {}",
                            error
                        );
                        self.record_error(Some(&abandoned.id), &error);
                        report.abandoned += 1;
                    }
                    Err(missing) => tracing::debug!("Could not abandon action: {}", missing),
                }
                Step::Continue
            }
        };
        self.publish(&state);
        step
    }

    fn complete_action(
        &self,
        state: &mut EngineState,
        action: &OfflineAction,
        response: ExecuteResponse,
    ) {
        if let Err(error) = state.queue.mark_done(&action.id) {
            tracing::debug!("Completed action already gone: {}", error);
        }

        let key = action.affected_key();
        if let Some(version) = response.version {
            if state.cache.set_version(key, version) {
                tracing::debug!(key, version, "Adopted server version");
            }
        }
        let cleared = state.meta.discard_conflicts_for(key);
        if cleared > 0 {
            tracing::debug!(key, cleared, "Cleared conflicts superseded by push");
        }
        tracing::debug!(action_id = %action.id, "Action done");
    }

    fn retry_later(
        &self,
        state: &mut EngineState,
        action: &OfflineAction,
        error: &Error,
        report: &mut PassReport,
    ) {
        let attempt = state
            .queue
            .get(&action.id)
            .map_or(action.attempt, |current| current.attempt);
        let delay = self.config.backoff_delay(attempt);

        match state.queue.mark_failed(&action.id, error, delay, self.now()) {
            Ok(FailureOutcome::Retry { attempt, .. }) => {
                tracing::warn!(
                    action_id = %action.id,
                    attempt,
                    retry_in_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                    "Action failed, will retry: {}",
                    error
                );
                self.record_error(Some(&action.id), error);
                report.retried += 1;
            }
            Ok(FailureOutcome::Abandoned(abandoned)) => {
                let exhausted = Error::RetryBudgetExhausted {
                    action_id: abandoned.id.to_string(),
                    attempts: abandoned.attempt,
                };
                tracing::error!(
                    resource = %abandoned.target,
                    "{} (last error: {})",
                    exhausted,
                    error
                );
                self.record_error(Some(&abandoned.id), &exhausted);
                report.abandoned += 1;
            }
            Err(missing) => tracing::debug!("Could not record failure: {}", missing),
        }
    }

    /// Await a remote call under the request timeout, giving up early on
    /// cancellation or shutdown.
    async fn call_remote<T, F>(&self, call: F, cancel: &mut watch::Receiver<u64>) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        let limit = self.config.request_timeout;
        let mut shutdown = self.shutdown.subscribe();
        tokio::select! {
            result = tokio::time::timeout(limit, call) => result.unwrap_or_else(|_| {
                Err(Error::Timeout(u64::try_from(limit.as_millis()).unwrap_or(u64::MAX)))
            }),
            _ = cancel.changed() => Err(Error::Cancelled),
            () = async {
                let _ = shutdown.wait_for(|stopping| *stopping).await;
            } => Err(Error::ShuttingDown),
        }
    }

    /// Fetch stale cache entries and record version mismatches. Returns
    /// `false` if the pass was interrupted.
    async fn reconcile(
        &self,
        cancel: &mut watch::Receiver<u64>,
        report: &mut PassReport,
    ) -> bool {
        let candidates = {
            let mut state = self.state.lock().await;
            let stale = state
                .cache
                .stale_entries(self.now(), self.config.freshness_threshold);
            stale
                .into_iter()
                .filter(|entry| !state.queue.has_pending_for_key(&entry.key))
                .collect::<Vec<_>>()
        };
        if candidates.is_empty() {
            return true;
        }
        tracing::debug!(stale = candidates.len(), "Reconciling cache");

        for entry in candidates {
            if let Some(reason) = self.stop_reason(cancel) {
                tracing::info!("Stopping reconciliation: {}", reason);
                return false;
            }
            let fetched = match self.call_remote(self.executor.fetch(&entry.key), cancel).await {
                Ok(fetched) => fetched,
                Err(Error::Cancelled | Error::ShuttingDown) => return false,
                Err(error) => {
                    tracing::warn!(key = %entry.key, "Failed to refresh cache entry: {}", error);
                    continue;
                }
            };
            let mut state = self.state.lock().await;
            self.reconcile_entry(&mut state, &entry.key, fetched, report);
        }
        true
    }

    fn reconcile_entry(
        &self,
        state: &mut EngineState,
        key: &str,
        fetched: FetchedValue,
        report: &mut PassReport,
    ) {
        // Local writes queued while fetching are ahead of the server
        if state.queue.has_pending_for_key(key) {
            return;
        }
        let Some(current) = state.cache.peek(key).cloned() else {
            return;
        };

        if fetched.version == current.version {
            state.cache.refresh(key, fetched.value, self.now());
            report.refreshed += 1;
            return;
        }
        if state.meta.has_open_conflict(key) {
            tracing::debug!(key, "Conflict already open");
            return;
        }

        let conflict = ConflictRecord::new(
            key,
            (current.value, current.version),
            (fetched.value, fetched.version),
            self.now(),
        );
        tracing::info!(
            key,
            conflict_id = %conflict.id,
            local_version = conflict.local_version,
            server_version = conflict.server_version,
            "Conflict detected"
        );
        state.meta.add_conflict(conflict);
        report.conflicts += 1;
    }

    /// Settle open conflicts under the configured policy. Returns whether
    /// any resolution queued a re-push.
    fn auto_resolve_open(&self, state: &mut EngineState, report: &mut PassReport) -> bool {
        let open = state.meta.open_conflicts().to_vec();
        let mut repushed = false;
        for record in open {
            let Some(outcome) = self.resolver.auto_resolve(&record) else {
                continue;
            };
            let (_, queued) = self.settle(state, record, outcome);
            repushed |= queued;
            report.resolved += 1;
        }
        repushed
    }

    /// Write the winning value into the cache, re-push it when the client
    /// side won, and archive the conflict.
    pub(super) fn settle(
        &self,
        state: &mut EngineState,
        mut record: ConflictRecord,
        outcome: ResolutionOutcome,
    ) -> (ConflictRecord, bool) {
        let now = self.now();
        let current_local = state
            .cache
            .peek(&record.key)
            .map_or(record.local_version, |entry| entry.version);
        let version = resolved_version(outcome.resolution, current_local, record.server_version);
        state.cache.write_resolved(
            &record.key,
            outcome.value.clone(),
            version,
            self.config.freshness_threshold,
            now,
        );

        let mut repushed = false;
        if outcome.repush {
            let options = QueueOptions::default()
                .with_priority(Priority::High)
                .with_cache_key(record.key.clone());
            match state.queue.enqueue(
                ActionKind::Update,
                &record.key,
                Some(outcome.value),
                &options,
                self.config.default_max_attempts,
                now,
            ) {
                Ok(id) => {
                    tracing::debug!(key = %record.key, action_id = %id, "Queued resolved value");
                    repushed = true;
                }
                Err(error) => {
                    tracing::error!(key = %record.key, "Failed to queue resolved value: {}", error);
                    self.record_error(None, &error);
                }
            }
        }

        record.mark_resolved(outcome.resolution, now);
        tracing::info!(
            key = %record.key,
            resolution = ?outcome.resolution,
            version,
            "Conflict resolved"
        );
        state.meta.archive(record.clone());
        (record, repushed)
    }
}
