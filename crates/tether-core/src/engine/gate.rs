//! Single-drain guard.
//!
//! Passes are numbered from 1. A request made while idle starts the next
//! pass; requests made while a pass runs are coalesced into exactly one
//! follow-up pass. Each request gets a ticket naming the pass that will
//! cover it, so callers can wait for that pass to complete.

use std::sync::{Mutex, MutexGuard, PoisonError};

use tokio::sync::watch;

use crate::error::{Error, Result};

#[derive(Debug, Default)]
struct GateState {
    draining: bool,
    rerun: bool,
    started: u64,
}

pub struct DrainGate {
    state: Mutex<GateState>,
    completed: watch::Sender<u64>,
}

impl DrainGate {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(GateState::default()),
            completed: watch::Sender::new(0),
        }
    }

    /// Ask for a pass. Returns the ticket and whether the caller must start
    /// the drain loop.
    pub fn request(&self) -> (u64, bool) {
        let mut state = self.lock();
        if state.draining {
            state.rerun = true;
            (state.started + 1, false)
        } else {
            state.draining = true;
            state.started += 1;
            (state.started, true)
        }
    }

    /// Mark the running pass complete. Returns `true` when a coalesced
    /// follow-up pass should run immediately.
    pub fn finish_pass(&self) -> bool {
        let mut state = self.lock();
        self.completed.send_replace(state.started);
        if state.rerun {
            state.rerun = false;
            state.started += 1;
            true
        } else {
            state.draining = false;
            false
        }
    }

    /// Ticket of the newest pass started or queued, if any is outstanding.
    pub fn outstanding(&self) -> Option<u64> {
        let state = self.lock();
        state
            .draining
            .then(|| state.started + u64::from(state.rerun))
    }

    pub fn completed(&self) -> u64 {
        *self.completed.borrow()
    }

    /// Wait until the pass named by `ticket` has completed.
    pub async fn wait_for(&self, ticket: u64) -> Result<()> {
        let mut completed = self.completed.subscribe();
        completed
            .wait_for(|done| *done >= ticket)
            .await
            .map(|_| ())
            .map_err(|_| Error::ShuttingDown)
    }

    fn lock(&self) -> MutexGuard<'_, GateState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
