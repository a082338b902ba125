use tether_core::{ActionKind, Priority, QueueOptions};

use crate::cli::PriorityArg;
use crate::commands::common::{format_action_line, parse_payload, Context, Session};
use crate::error::CliError;

impl From<PriorityArg> for Priority {
    fn from(value: PriorityArg) -> Self {
        match value {
            PriorityArg::Critical => Self::Critical,
            PriorityArg::High => Self::High,
            PriorityArg::Normal => Self::Normal,
            PriorityArg::Low => Self::Low,
        }
    }
}

pub fn queue_options(
    priority: PriorityArg,
    max_attempts: Option<u32>,
    cache_key: Option<String>,
) -> QueueOptions {
    let mut options = QueueOptions::default().with_priority(priority.into());
    if let Some(max_attempts) = max_attempts {
        options = options.with_max_attempts(max_attempts);
    }
    if let Some(cache_key) = tether_core::util::normalize_text_option(cache_key) {
        options = options.with_cache_key(cache_key);
    }
    options
}

pub async fn run_queue(
    kind: &str,
    target: &str,
    payload: Option<&str>,
    options: QueueOptions,
    context: &Context,
) -> Result<(), CliError> {
    let kind = kind.parse::<ActionKind>().map_err(CliError::InvalidArgument)?;
    let session = Session::open_local(context).await?;
    let result = session
        .engine
        .queue_action(kind, target, payload.map(parse_payload), options)
        .await;
    let pending = session.engine.get_sync_status().pending_actions;
    session.close().await;

    let id = result?;
    println!("Queued {id} ({pending} pending)");
    Ok(())
}

pub async fn run_pending(as_json: bool, context: &Context) -> Result<(), CliError> {
    let session = Session::open_local(context).await?;
    let actions = session.engine.pending_actions().await;
    session.close().await;

    if as_json {
        println!("{}", serde_json::to_string_pretty(&actions)?);
        return Ok(());
    }

    if actions.is_empty() {
        println!("No pending actions.");
        return Ok(());
    }
    for action in &actions {
        println!("{}", format_action_line(action));
    }
    Ok(())
}

/// Drop every queued action from the state store.
pub async fn clear_pending(context: &Context) -> Result<usize, CliError> {
    let session = Session::open_local(context).await?;
    let result = session.engine.clear_queue().await;
    session.close().await;
    Ok(result?)
}
