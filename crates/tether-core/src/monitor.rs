//! Connectivity monitoring with debounce.
//!
//! Observations come from two places: a [`ConnectivityProbe`] polled every
//! `probe_interval`, and [`NetworkMonitor::report`] for platforms that push
//! connectivity callbacks. A changed observation has to hold for the
//! debounce window before it is confirmed and published.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

use crate::config::MonitorConfig;
use crate::error::{Error, Result};
use crate::status::ListenerHandle;

/// Platform reachability check
#[async_trait]
pub trait ConnectivityProbe: Send + Sync {
    async fn is_online(&self) -> Result<bool>;
}

/// Publishes confirmed online/offline transitions
pub struct NetworkMonitor {
    state: Arc<watch::Sender<bool>>,
    reports: mpsc::UnboundedSender<bool>,
    shutdown: watch::Sender<bool>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl NetworkMonitor {
    /// Probe once, publish the result as the initial state and start watching.
    pub async fn start(probe: Arc<dyn ConnectivityProbe>, config: MonitorConfig) -> Result<Self> {
        if config.probe_interval.is_zero() {
            return Err(Error::InvalidInput("probe_interval must be non-zero".into()));
        }

        let initial = probe_once(probe.as_ref()).await;
        tracing::info!(online = initial, "Network monitor started");

        let state = Arc::new(watch::Sender::new(initial));
        let (reports, report_rx) = mpsc::unbounded_channel();
        let (shutdown, shutdown_rx) = watch::channel(false);

        let task = tokio::spawn(run_monitor(
            probe,
            config,
            state.clone(),
            report_rx,
            shutdown_rx,
        ));

        Ok(Self {
            state,
            reports,
            shutdown,
            task: Mutex::new(Some(task)),
        })
    }

    /// Last confirmed state.
    pub fn is_online(&self) -> bool {
        *self.state.borrow()
    }

    /// Receiver of confirmed transitions; drop it to unsubscribe.
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.state.subscribe()
    }

    /// Call `listener` with the current state, then on every confirmed
    /// transition, until the handle is dropped.
    pub fn on_change<F>(&self, listener: F) -> ListenerHandle
    where
        F: Fn(bool) + Send + Sync + 'static,
    {
        let mut receiver = self.state.subscribe();
        let task = tokio::spawn(async move {
            listener(*receiver.borrow_and_update());
            while receiver.changed().await.is_ok() {
                let online = *receiver.borrow_and_update();
                listener(online);
            }
        });
        ListenerHandle::new(task)
    }

    /// Feed a pushed connectivity observation through the debounce.
    pub fn report(&self, online: bool) {
        if self.reports.send(online).is_err() {
            tracing::debug!("Network monitor stopped; ignoring report");
        }
    }

    /// Stop probing and wait for the background task to exit.
    pub async fn shutdown(&self) {
        self.shutdown.send_replace(true);
        let task = self
            .task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(task) = task {
            if let Err(error) = task.await {
                tracing::warn!("Network monitor task ended abnormally: {}", error);
            }
        }
    }
}

impl Drop for NetworkMonitor {
    fn drop(&mut self) {
        if let Some(task) = self
            .task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            task.abort();
        }
    }
}

/// A probe error counts as online.
async fn probe_once(probe: &dyn ConnectivityProbe) -> bool {
    match probe.is_online().await {
        Ok(online) => online,
        Err(error) => {
            tracing::warn!("Connectivity probe failed, assuming online: {}", error);
            true
        }
    }
}

async fn run_monitor(
    probe: Arc<dyn ConnectivityProbe>,
    config: MonitorConfig,
    state: Arc<watch::Sender<bool>>,
    mut reports: mpsc::UnboundedReceiver<bool>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(config.probe_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // The first tick fires immediately and the startup probe already ran
    ticker.tick().await;

    let mut candidate: Option<(bool, Instant)> = None;

    loop {
        let deadline = candidate.map(|(_, since)| since + config.debounce);
        let wake_at = deadline.unwrap_or_else(|| Instant::now() + config.probe_interval);

        let observed = tokio::select! {
            _ = shutdown.changed() => break,
            _ = ticker.tick() => probe_once(probe.as_ref()).await,
            Some(online) = reports.recv() => online,
            () = tokio::time::sleep_until(wake_at), if deadline.is_some() => {
                if let Some((online, _)) = candidate.take() {
                    tracing::info!(online, "Connectivity changed");
                    state.send_replace(online);
                }
                continue;
            }
        };

        let confirmed = *state.borrow();
        candidate = match candidate {
            _ if observed == confirmed => None,
            Some((pending, since)) if pending == observed => Some((pending, since)),
            _ => {
                tracing::debug!(online = observed, "Connectivity change observed, debouncing");
                Some((observed, Instant::now()))
            }
        };
    }

    tracing::debug!("Network monitor stopped");
}
