use std::env;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tether_core::util::{compact_text, normalize_text_option};
use tether_core::{
    CacheEntry, ConflictRecord, EngineConfig, MonitorConfig, NetworkMonitor, OfflineAction, Payload,
    SqliteStore, SyncEngine, SyncStatus,
};
use tokio::sync::watch;

use crate::config_profiles::{CliProfile, CliProfilesConfig};
use crate::error::CliError;
use crate::remote::{HttpExecutor, HttpProbe};

const PROBE_TIMEOUT: Duration = Duration::from_secs(3);

/// Everything a command needs to open the engine
#[derive(Debug, Clone, PartialEq)]
pub struct Context {
    pub profile_name: String,
    pub db_path: PathBuf,
    pub remote_base_url: Option<String>,
    pub probe_url: Option<String>,
    pub engine_config: EngineConfig,
}

impl Context {
    pub fn load(cli_db_path: Option<PathBuf>, profile: Option<&str>) -> Result<Self, CliError> {
        let config = CliProfilesConfig::load().map_err(CliError::Config)?;
        let profile_name = config.resolve_profile_name(profile);
        let profile = config.profile(&profile_name).cloned().unwrap_or_default();
        Self::resolve(profile_name, &profile, cli_db_path, |name| env::var(name).ok())
    }

    /// Flag, then environment, then profile, then built-in default.
    pub fn resolve(
        profile_name: String,
        profile: &CliProfile,
        cli_db_path: Option<PathBuf>,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, CliError> {
        profile.validate().map_err(CliError::Config)?;

        let db_path = cli_db_path
            .or_else(|| normalize_text_option(lookup("TETHER_DB_PATH")).map(PathBuf::from))
            .or_else(|| profile.db_path.clone())
            .unwrap_or_else(default_db_path);
        let remote_base_url =
            normalize_text_option(lookup("TETHER_REMOTE_URL")).or_else(|| profile.remote_base_url());
        let probe_url = normalize_text_option(lookup("TETHER_PROBE_URL"))
            .or_else(|| normalize_text_option(profile.probe_url.clone()))
            .or_else(|| remote_base_url.clone());
        let engine_config = EngineConfig::from_lookup(|name| {
            lookup(name).or_else(|| profile.engine.get(name).cloned())
        })?;

        Ok(Self {
            profile_name,
            db_path,
            remote_base_url,
            probe_url,
            engine_config,
        })
    }
}

pub fn default_db_path() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("tether")
        .join("tether.db")
}

/// An opened engine plus whatever feeds its connectivity
pub struct Session {
    pub engine: SyncEngine,
    monitor: Option<NetworkMonitor>,
    _offline: Option<watch::Sender<bool>>,
}

impl Session {
    /// Engine that never reaches the network: local reads and writes only.
    pub async fn open_local(context: &Context) -> Result<Self, CliError> {
        let (offline, connectivity) = watch::channel(false);
        let engine = build_engine(context, connectivity).await?;
        Ok(Self {
            engine,
            monitor: None,
            _offline: Some(offline),
        })
    }

    /// Engine wired to the configured remote and a live network monitor.
    pub async fn open_connected(context: &Context) -> Result<Self, CliError> {
        let probe_url = context
            .probe_url
            .clone()
            .ok_or(CliError::RemoteNotConfigured)?;
        if context.remote_base_url.is_none() {
            return Err(CliError::RemoteNotConfigured);
        }

        let probe = Arc::new(HttpProbe::new(probe_url, PROBE_TIMEOUT)?);
        let monitor = NetworkMonitor::start(probe, MonitorConfig::default()).await?;
        let engine = build_engine(context, monitor.subscribe()).await?;
        Ok(Self {
            engine,
            monitor: Some(monitor),
            _offline: None,
        })
    }

    pub fn is_online(&self) -> bool {
        self.monitor
            .as_ref()
            .is_some_and(NetworkMonitor::is_online)
    }

    pub async fn close(self) {
        self.engine.shutdown().await;
        if let Some(monitor) = &self.monitor {
            monitor.shutdown().await;
        }
    }
}

async fn build_engine(
    context: &Context,
    connectivity: watch::Receiver<bool>,
) -> Result<SyncEngine, CliError> {
    tracing::debug!(path = %context.db_path.display(), profile = %context.profile_name, "Opening state store");
    let store = Arc::new(SqliteStore::open(&context.db_path)?);
    let executor = Arc::new(HttpExecutor::new(
        context.remote_base_url.clone(),
        context.engine_config.request_timeout,
    )?);
    Ok(SyncEngine::builder(store, executor)
        .config(context.engine_config.clone())
        .connectivity(connectivity)
        .init()
        .await?)
}

/// Parse CLI text as JSON when it is valid JSON, otherwise keep it as text.
pub fn parse_payload(raw: &str) -> Payload {
    serde_json::from_str::<serde_json::Value>(raw)
        .map_or_else(|_| Payload::Text(raw.to_string()), Payload::Json)
}

pub fn format_payload(payload: &Payload) -> String {
    match payload {
        Payload::Text(text) => compact_text(text),
        Payload::Json(value) => compact_text(&value.to_string()),
        Payload::Bytes(bytes) => format!("<{} bytes>", bytes.len()),
    }
}

pub fn format_timestamp(timestamp_ms: i64) -> String {
    chrono::DateTime::from_timestamp_millis(timestamp_ms).map_or_else(
        || timestamp_ms.to_string(),
        |date_time| date_time.format("%Y-%m-%d %H:%M:%S UTC").to_string(),
    )
}

pub fn format_action_line(action: &OfflineAction) -> String {
    let mut line = format!(
        "{}  {:<8} {:<6} {}  attempt {}/{}",
        action.id,
        format!("{:?}", action.priority).to_lowercase(),
        action.kind.label(),
        action.target,
        action.attempt,
        action.max_attempts
    );
    if let Some(at) = action.next_attempt_at {
        line.push_str(&format!("  retry after {}", format_timestamp(at)));
    }
    if let Some(error) = &action.last_error {
        line.push_str(&format!("  last error: {}", compact_text(error)));
    }
    line
}

pub fn format_cache_line(entry: &CacheEntry, now_ms: i64) -> String {
    format!(
        "{}  v{}  expires {}  {}",
        entry.key,
        entry.version,
        format_expiry(entry.expires_at().saturating_sub(now_ms)),
        format_payload(&entry.value)
    )
}

fn format_expiry(remaining_ms: i64) -> String {
    let secs = remaining_ms / 1000;
    if secs < 60 {
        format!("in {secs}s")
    } else if secs < 3600 {
        format!("in {}m", secs / 60)
    } else {
        format!("in {}h", secs / 3600)
    }
}

pub fn format_conflict_lines(conflict: &ConflictRecord) -> Vec<String> {
    let mut lines = vec![format!(
        "{}  {}  detected {}",
        conflict.id,
        conflict.key,
        format_timestamp(conflict.detected_at)
    )];
    lines.push(format!(
        "  local  v{}: {}",
        conflict.local_version,
        format_payload(&conflict.local_value)
    ));
    lines.push(format!(
        "  server v{}: {}",
        conflict.server_version,
        format_payload(&conflict.server_value)
    ));
    if let (Some(resolution), Some(at)) = (conflict.resolution, conflict.resolved_at) {
        lines.push(format!(
            "  resolved {} ({resolution:?})",
            format_timestamp(at)
        ));
    }
    lines
}

#[derive(Debug, Serialize)]
pub struct StatusReport<'a> {
    pub state: tether_core::SyncState,
    #[serde(flatten)]
    pub status: &'a SyncStatus,
}

pub fn format_status_lines(status: &SyncStatus) -> Vec<String> {
    let mut lines = vec![
        format!("State:     {}", state_label(status)),
        format!(
            "Network:   {}",
            if status.is_online { "online" } else { "offline" }
        ),
        format!("Pending:   {}", status.pending_actions),
        format!("Conflicts: {}", status.open_conflicts),
        format!(
            "Last sync: {}",
            status
                .last_sync_at
                .map_or_else(|| "never".to_string(), format_timestamp)
        ),
    ];
    if status.degraded {
        lines.push("Storage:   degraded (changes held in memory)".to_string());
    }
    for error in &status.errors {
        lines.push(format!(
            "  [{:?}] {} {}",
            error.class,
            format_timestamp(error.at),
            compact_text(&error.message)
        ));
    }
    lines
}

fn state_label(status: &SyncStatus) -> String {
    format!("{:?}", status.state()).to_lowercase()
}

pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
