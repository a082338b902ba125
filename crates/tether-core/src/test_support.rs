//! Shared fixtures for engine tests.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::watch;

use crate::clock::ManualClock;
use crate::config::EngineConfig;
use crate::engine::SyncEngine;
use crate::error::{Error, Result};
use crate::executor::{ActionRequest, ExecuteResponse, FetchedValue, RemoteExecutor};
use crate::models::Payload;
use crate::store::MemoryStore;

/// How the mock answers an `execute` call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Succeed,
    Transient,
    Permanent,
    /// Never completes (until cancelled or timed out)
    Hang,
}

type Hook = Box<dyn Fn(&ActionRequest) + Send + Sync>;

/// Scripted `RemoteExecutor` that records every call
pub struct MockExecutor {
    default: Mutex<Outcome>,
    script: Mutex<VecDeque<Outcome>>,
    calls: Mutex<Vec<ActionRequest>>,
    versions: Mutex<HashMap<String, u64>>,
    server: Mutex<HashMap<String, FetchedValue>>,
    fetches: Mutex<Vec<String>>,
    delay: Mutex<Option<Duration>>,
    hook: Mutex<Option<Hook>>,
}

impl MockExecutor {
    pub fn new(default: Outcome) -> Arc<Self> {
        Arc::new(Self {
            default: Mutex::new(default),
            script: Mutex::new(VecDeque::new()),
            calls: Mutex::new(Vec::new()),
            versions: Mutex::new(HashMap::new()),
            server: Mutex::new(HashMap::new()),
            fetches: Mutex::new(Vec::new()),
            delay: Mutex::new(None),
            hook: Mutex::new(None),
        })
    }

    pub fn set_default(&self, outcome: Outcome) {
        *self.default.lock().unwrap() = outcome;
    }

    /// Outcomes consumed in order before falling back to the default.
    pub fn script(&self, outcomes: &[Outcome]) {
        self.script.lock().unwrap().extend(outcomes.iter().copied());
    }

    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = Some(delay);
    }

    /// Version reported back after a successful execute on `target`.
    pub fn respond_with_version(&self, target: &str, version: u64) {
        self.versions.lock().unwrap().insert(target.to_string(), version);
    }

    /// Server state returned by `fetch`.
    pub fn set_server_value(&self, key: &str, value: Payload, version: u64) {
        self.server
            .lock()
            .unwrap()
            .insert(key.to_string(), FetchedValue { value, version });
    }

    /// Run `hook` at the start of every execute.
    pub fn on_execute(&self, hook: impl Fn(&ActionRequest) + Send + Sync + 'static) {
        *self.hook.lock().unwrap() = Some(Box::new(hook));
    }

    pub fn calls(&self) -> Vec<ActionRequest> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_targets(&self) -> Vec<String> {
        self.calls().into_iter().map(|call| call.target).collect()
    }

    pub fn fetches(&self) -> Vec<String> {
        self.fetches.lock().unwrap().clone()
    }

    fn next_outcome(&self) -> Outcome {
        let scripted = self.script.lock().unwrap().pop_front();
        scripted.unwrap_or_else(|| *self.default.lock().unwrap())
    }
}

#[async_trait]
impl RemoteExecutor for MockExecutor {
    async fn execute(&self, request: &ActionRequest) -> Result<ExecuteResponse> {
        self.calls.lock().unwrap().push(request.clone());
        {
            let hook = self.hook.lock().unwrap();
            if let Some(hook) = hook.as_ref() {
                hook(request);
            }
        }
        let delay = *self.delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let outcome = self.next_outcome();
        if outcome == Outcome::Hang {
            return std::future::pending().await;
        }
        let version = self.versions.lock().unwrap().get(&request.target).copied();
        match outcome {
            Outcome::Succeed | Outcome::Hang => Ok(ExecuteResponse {
                value: None,
                version,
            }),
            Outcome::Transient => Err(Error::TransientNetwork("connection reset".into())),
            Outcome::Permanent => Err(Error::PermanentRejection("422 unprocessable".into())),
        }
    }

    async fn fetch(&self, key: &str) -> Result<FetchedValue> {
        self.fetches.lock().unwrap().push(key.to_string());
        self.server
            .lock()
            .unwrap()
            .get(key)
            .cloned()
            .ok_or_else(|| Error::PermanentRejection(format!("unknown key {key}")))
    }
}

/// Engine wired to in-memory collaborators
pub struct Harness {
    pub engine: SyncEngine,
    pub executor: Arc<MockExecutor>,
    pub store: Arc<MemoryStore>,
    pub clock: Arc<ManualClock>,
    pub online: Arc<watch::Sender<bool>>,
}

pub const START_MS: i64 = 1_700_000_000_000;

/// Defaults for tests: no periodic timer, tiny backoff.
pub fn test_config() -> EngineConfig {
    EngineConfig::default()
        .without_auto_sync()
        .with_backoff(Duration::from_millis(10), Duration::from_millis(100))
        .with_request_timeout(Duration::from_secs(5))
}

pub async fn harness(config: EngineConfig, online: bool) -> Harness {
    harness_with(config, online, Arc::new(MemoryStore::new()), |builder| builder).await
}

pub async fn harness_with(
    config: EngineConfig,
    online: bool,
    store: Arc<MemoryStore>,
    customize: impl FnOnce(crate::SyncEngineBuilder) -> crate::SyncEngineBuilder,
) -> Harness {
    let executor = MockExecutor::new(Outcome::Succeed);
    let clock = Arc::new(ManualClock::new(START_MS));
    let (sender, receiver) = watch::channel(online);
    let builder = SyncEngine::builder(store.clone(), executor.clone())
        .config(config)
        .clock(clock.clone())
        .connectivity(receiver);
    let engine = customize(builder).init().await.unwrap();

    Harness {
        engine,
        executor,
        store,
        clock,
        online: Arc::new(sender),
    }
}

/// Poll `condition` until it holds, failing the test after two seconds.
pub async fn eventually(mut condition: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while !condition() {
        assert!(
            tokio::time::Instant::now() < deadline,
            "condition not met within 2s"
        );
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}
