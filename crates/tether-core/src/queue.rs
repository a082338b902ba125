//! Durable priority queue of offline actions.
//!
//! The whole queue is written to the `pending_actions` record after every
//! mutation, in drain order. Caller-facing operations (`enqueue`, `clear`)
//! only take effect once that write succeeds. Drain transitions always
//! update memory, since the remote side has already observed them; a failed
//! write there flips the queue into degraded mode until the next successful
//! write replaces the record.

use std::sync::Arc;
use std::time::Duration;

use crate::clock::duration_ms;
use crate::error::{Error, Result};
use crate::models::{ActionId, ActionKind, ActionState, OfflineAction, Payload, QueueOptions};
use crate::store::{load_record, save_record, PersistentStore, RecordKey};

/// Result of recording a failed attempt
#[derive(Debug, Clone, PartialEq)]
pub enum FailureOutcome {
    /// Back to `Pending`, eligible again at `next_attempt_at`
    Retry { attempt: u32, next_attempt_at: i64 },
    /// Attempt ceiling reached; the action left the queue
    Abandoned(OfflineAction),
}

/// Ordered, durable list of pending mutations
pub struct ActionQueue {
    actions: Vec<OfflineAction>,
    next_sequence: u64,
    max_len: usize,
    store: Arc<dyn PersistentStore>,
    degraded: bool,
}

impl ActionQueue {
    /// Load the queue from `store`.
    ///
    /// Actions persisted as `InFlight` belong to a pass that never finished;
    /// they come back as `Pending`. An unreadable record is logged and
    /// replaced by an empty queue on the next write.
    pub fn load(store: Arc<dyn PersistentStore>, max_len: usize) -> Self {
        let mut degraded = false;
        let loaded: Vec<OfflineAction> =
            match load_record(store.as_ref(), RecordKey::PendingActions) {
                Ok(actions) => actions.unwrap_or_default(),
                Err(error) => {
                    tracing::error!("Failed to load pending actions, starting empty: {}", error);
                    degraded = true;
                    Vec::new()
                }
            };

        let mut reset = 0usize;
        let mut actions: Vec<OfflineAction> = loaded
            .into_iter()
            .filter(|action| !action.state.is_terminal())
            .map(|mut action| {
                if action.state == ActionState::InFlight {
                    action.state = ActionState::Pending;
                    reset += 1;
                }
                action
            })
            .collect();
        actions.sort_by_key(OfflineAction::drain_key);

        let next_sequence = actions
            .iter()
            .map(|action| action.sequence)
            .max()
            .map_or(0, |max| max + 1);

        let mut queue = Self {
            actions,
            next_sequence,
            max_len,
            store,
            degraded,
        };

        if reset > 0 {
            tracing::info!("Reset {} interrupted in-flight action(s) to pending", reset);
            queue.write_lenient();
        }
        tracing::debug!("Loaded {} pending action(s)", queue.actions.len());
        queue
    }

    /// Append a `Pending` action and persist the queue.
    pub fn enqueue(
        &mut self,
        kind: ActionKind,
        target: &str,
        payload: Option<Payload>,
        options: &QueueOptions,
        default_max_attempts: u32,
        now_ms: i64,
    ) -> Result<ActionId> {
        let target = target.trim();
        if target.is_empty() {
            return Err(Error::InvalidInput("action target must not be empty".into()));
        }
        if kind == ActionKind::Delete && payload.is_some() {
            return Err(Error::InvalidInput(
                "delete actions do not carry a payload".into(),
            ));
        }
        let max_attempts = options.max_attempts.unwrap_or(default_max_attempts);
        if max_attempts == 0 {
            return Err(Error::InvalidInput("max_attempts must be at least 1".into()));
        }
        if self.actions.len() >= self.max_len {
            return Err(Error::QueueFull {
                limit: self.max_len,
            });
        }

        let action = OfflineAction {
            id: ActionId::new(),
            kind,
            target: target.to_string(),
            payload,
            priority: options.priority,
            created_at: now_ms,
            sequence: self.next_sequence,
            attempt: 0,
            max_attempts,
            state: ActionState::Pending,
            next_attempt_at: None,
            last_error: None,
            cache_key: options.cache_key.clone(),
        };
        let id = action.id;

        let mut next = self.actions.clone();
        next.push(action);
        next.sort_by_key(OfflineAction::drain_key);
        self.write_strict(&next)?;

        self.actions = next;
        self.next_sequence += 1;
        Ok(id)
    }

    /// Snapshot of all non-terminal actions in drain order.
    pub fn drain_order(&self) -> Vec<OfflineAction> {
        self.actions.clone()
    }

    pub fn get(&self, id: &ActionId) -> Option<&OfflineAction> {
        self.actions.iter().find(|action| action.id == *id)
    }

    pub fn count(&self) -> usize {
        self.actions.len()
    }

    /// Whether any queued action still targets `key`.
    pub fn has_pending_for_key(&self, key: &str) -> bool {
        self.actions.iter().any(|action| action.affected_key() == key)
    }

    pub const fn is_degraded(&self) -> bool {
        self.degraded
    }

    pub fn mark_in_flight(&mut self, id: &ActionId) -> Result<()> {
        let action = self.find_mut(id)?;
        action.state = ActionState::InFlight;
        self.write_lenient();
        Ok(())
    }

    /// Put an interrupted in-flight action back without charging an attempt.
    pub fn revert_in_flight(&mut self, id: &ActionId) -> Result<()> {
        let action = self.find_mut(id)?;
        if action.state == ActionState::InFlight {
            action.state = ActionState::Pending;
            self.write_lenient();
        }
        Ok(())
    }

    /// Remove a successfully executed action.
    pub fn mark_done(&mut self, id: &ActionId) -> Result<OfflineAction> {
        let mut action = self.take(id)?;
        action.state = ActionState::Done;
        self.write_lenient();
        Ok(action)
    }

    /// Charge a failed attempt; abandons once `max_attempts` is reached.
    pub fn mark_failed(
        &mut self,
        id: &ActionId,
        error: &Error,
        retry_delay: Duration,
        now_ms: i64,
    ) -> Result<FailureOutcome> {
        let action = self.find_mut(id)?;
        action.attempt = action.attempt.saturating_add(1);
        action.last_error = Some(error.to_string());

        if action.attempt >= action.max_attempts {
            let mut abandoned = self.take(id)?;
            abandoned.state = ActionState::Abandoned;
            self.write_lenient();
            return Ok(FailureOutcome::Abandoned(abandoned));
        }

        let next_attempt_at = now_ms.saturating_add(duration_ms(retry_delay));
        action.state = ActionState::Pending;
        action.next_attempt_at = Some(next_attempt_at);
        let attempt = action.attempt;
        self.write_lenient();
        Ok(FailureOutcome::Retry {
            attempt,
            next_attempt_at,
        })
    }

    /// Drop an action regardless of remaining attempts (permanent rejection).
    pub fn abandon(&mut self, id: &ActionId, error: &Error) -> Result<OfflineAction> {
        let mut action = self.take(id)?;
        action.attempt = action.attempt.saturating_add(1);
        action.state = ActionState::Abandoned;
        action.last_error = Some(error.to_string());
        self.write_lenient();
        Ok(action)
    }

    /// Drop every queued action.
    pub fn clear(&mut self) -> Result<usize> {
        self.write_strict(&[])?;
        let removed = self.actions.len();
        self.actions.clear();
        Ok(removed)
    }

    fn find_mut(&mut self, id: &ActionId) -> Result<&mut OfflineAction> {
        self.actions
            .iter_mut()
            .find(|action| action.id == *id)
            .ok_or_else(|| Error::NotFound(format!("action {id}")))
    }

    fn take(&mut self, id: &ActionId) -> Result<OfflineAction> {
        let index = self
            .actions
            .iter()
            .position(|action| action.id == *id)
            .ok_or_else(|| Error::NotFound(format!("action {id}")))?;
        Ok(self.actions.remove(index))
    }

    fn write_strict(&mut self, actions: &[OfflineAction]) -> Result<()> {
        match save_record(self.store.as_ref(), RecordKey::PendingActions, actions) {
            Ok(()) => {
                self.degraded = false;
                Ok(())
            }
            Err(error) => {
                tracing::error!("Failed to persist pending actions: {}", error);
                self.degraded = true;
                Err(error)
            }
        }
    }

    fn write_lenient(&mut self) {
        let actions = std::mem::take(&mut self.actions);
        let result = self.write_strict(&actions);
        self.actions = actions;
        if result.is_err() {
            tracing::warn!("Continuing with in-memory action queue");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Priority;
    use crate::store::MemoryStore;
    use pretty_assertions::assert_eq;

    fn setup() -> (Arc<MemoryStore>, ActionQueue) {
        let store = Arc::new(MemoryStore::new());
        let queue = ActionQueue::load(store.clone(), 100);
        (store, queue)
    }

    fn push(queue: &mut ActionQueue, target: &str, priority: Priority) -> ActionId {
        queue
            .enqueue(
                ActionKind::Update,
                target,
                Some(Payload::from(target)),
                &QueueOptions::default().with_priority(priority),
                3,
                1_000,
            )
            .unwrap()
    }

    fn persisted_targets(store: &MemoryStore) -> Vec<String> {
        let actions: Vec<OfflineAction> = load_record(store, RecordKey::PendingActions)
            .unwrap()
            .unwrap_or_default();
        actions.into_iter().map(|action| action.target).collect()
    }

    #[test]
    fn drain_order_is_priority_then_fifo() {
        let (store, mut queue) = setup();
        push(&mut queue, "low-1", Priority::Low);
        push(&mut queue, "critical", Priority::Critical);
        push(&mut queue, "normal", Priority::Normal);
        push(&mut queue, "low-2", Priority::Low);

        let order: Vec<String> = queue
            .drain_order()
            .into_iter()
            .map(|action| action.target)
            .collect();
        assert_eq!(order, vec!["critical", "normal", "low-1", "low-2"]);
        assert_eq!(persisted_targets(&store), order);
    }

    #[test]
    fn reload_resets_in_flight_to_pending() {
        let (store, mut queue) = setup();
        let id = push(&mut queue, "a", Priority::Normal);
        queue.mark_in_flight(&id).unwrap();

        let reloaded = ActionQueue::load(store, 100);
        let action = reloaded.get(&id).unwrap();
        assert_eq!(action.state, ActionState::Pending);
        assert_eq!(reloaded.count(), 1);
    }

    #[test]
    fn reload_continues_sequence_numbers() {
        let (store, mut queue) = setup();
        push(&mut queue, "a", Priority::Normal);
        push(&mut queue, "b", Priority::Normal);

        let mut reloaded = ActionQueue::load(store, 100);
        push(&mut reloaded, "c", Priority::Normal);
        let sequences: Vec<u64> = reloaded
            .drain_order()
            .iter()
            .map(|action| action.sequence)
            .collect();
        assert_eq!(sequences, vec![0, 1, 2]);
    }

    #[test]
    fn failures_back_off_then_abandon_at_budget() {
        let (_store, mut queue) = setup();
        let id = push(&mut queue, "a", Priority::Normal);
        let error = Error::TransientNetwork("refused".into());

        let first = queue
            .mark_failed(&id, &error, Duration::from_millis(500), 2_000)
            .unwrap();
        assert_eq!(
            first,
            FailureOutcome::Retry {
                attempt: 1,
                next_attempt_at: 2_500
            }
        );
        assert!(!queue.get(&id).unwrap().is_eligible(2_499));
        assert!(queue.get(&id).unwrap().is_eligible(2_500));

        queue
            .mark_failed(&id, &error, Duration::from_millis(500), 3_000)
            .unwrap();
        let last = queue
            .mark_failed(&id, &error, Duration::from_millis(500), 4_000)
            .unwrap();
        match last {
            FailureOutcome::Abandoned(action) => {
                assert_eq!(action.state, ActionState::Abandoned);
                assert_eq!(action.attempt, 3);
            }
            other => panic!("expected abandonment, got {other:?}"),
        }
        assert_eq!(queue.count(), 0);
    }

    #[test]
    fn done_actions_leave_the_persisted_queue() {
        let (store, mut queue) = setup();
        let id = push(&mut queue, "a", Priority::Normal);
        push(&mut queue, "b", Priority::Normal);

        let done = queue.mark_done(&id).unwrap();
        assert_eq!(done.state, ActionState::Done);
        assert_eq!(persisted_targets(&store), vec!["b"]);
    }

    #[test]
    fn enqueue_rejects_when_full() {
        let store = Arc::new(MemoryStore::new());
        let mut queue = ActionQueue::load(store, 1);
        push(&mut queue, "a", Priority::Normal);

        let error = queue
            .enqueue(
                ActionKind::Create,
                "b",
                None,
                &QueueOptions::default(),
                3,
                0,
            )
            .unwrap_err();
        assert!(matches!(error, Error::QueueFull { limit: 1 }));
    }

    #[test]
    fn delete_with_payload_is_rejected() {
        let (_store, mut queue) = setup();
        let error = queue
            .enqueue(
                ActionKind::Delete,
                "notes/1",
                Some(Payload::from("x")),
                &QueueOptions::default(),
                3,
                0,
            )
            .unwrap_err();
        assert!(matches!(error, Error::InvalidInput(_)));
    }

    #[test]
    fn failed_enqueue_write_leaves_memory_untouched() {
        let (store, mut queue) = setup();
        push(&mut queue, "a", Priority::Normal);
        store.set_fail_writes(true);

        let error = queue
            .enqueue(
                ActionKind::Create,
                "b",
                None,
                &QueueOptions::default(),
                3,
                0,
            )
            .unwrap_err();
        assert!(matches!(error, Error::Storage(_)));
        assert_eq!(queue.count(), 1);
        assert!(queue.is_degraded());

        store.set_fail_writes(false);
        push(&mut queue, "c", Priority::Normal);
        assert!(!queue.is_degraded());
        assert_eq!(persisted_targets(&store), vec!["a", "c"]);
    }

    #[test]
    fn clear_empties_memory_and_record_together() {
        let (store, mut queue) = setup();
        push(&mut queue, "a", Priority::Normal);
        push(&mut queue, "b", Priority::High);

        store.set_fail_writes(true);
        assert!(matches!(queue.clear(), Err(Error::Storage(_))));
        assert_eq!(queue.count(), 2);
        assert_eq!(persisted_targets(&store), vec!["b", "a"]);

        store.set_fail_writes(false);
        assert_eq!(queue.clear().unwrap(), 2);
        assert_eq!(queue.count(), 0);
        assert!(persisted_targets(&store).is_empty());
        assert_eq!(ActionQueue::load(store, 100).count(), 0);
    }

    #[test]
    fn corrupt_record_loads_empty_and_degraded() {
        let store = Arc::new(MemoryStore::new());
        store.save(RecordKey::PendingActions, "garbage").unwrap();
        let queue = ActionQueue::load(store, 10);
        assert_eq!(queue.count(), 0);
        assert!(queue.is_degraded());
    }
}
