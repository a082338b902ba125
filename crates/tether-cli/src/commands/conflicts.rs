use tether_core::{ConflictId, ConflictRecord, ResolutionChoice};

use crate::cli::ChoiceArg;
use crate::commands::common::{format_conflict_lines, parse_payload, Context, Session};
use crate::error::CliError;

pub async fn run_conflicts(
    include_resolved: bool,
    as_json: bool,
    context: &Context,
) -> Result<(), CliError> {
    let session = Session::open_local(context).await?;
    let mut conflicts = session.engine.open_conflicts().await;
    if include_resolved {
        conflicts.extend(session.engine.recent_resolutions().await);
    }
    session.close().await;

    if as_json {
        println!("{}", serde_json::to_string_pretty(&conflicts)?);
        return Ok(());
    }

    if conflicts.is_empty() {
        println!("No conflicts recorded.");
        return Ok(());
    }
    for conflict in &conflicts {
        for line in format_conflict_lines(conflict) {
            println!("{line}");
        }
    }
    Ok(())
}

pub fn resolution_choice(
    choice: ChoiceArg,
    value: Option<&str>,
) -> Result<ResolutionChoice, CliError> {
    match (choice, value) {
        (ChoiceArg::Server, None) => Ok(ResolutionChoice::Server),
        (ChoiceArg::Client, None) => Ok(ResolutionChoice::Client),
        (ChoiceArg::Merged, Some(raw)) => Ok(ResolutionChoice::Merged(parse_payload(raw))),
        (ChoiceArg::Merged, None) => Err(CliError::InvalidArgument(
            "`merged` requires --value".to_string(),
        )),
        (_, Some(_)) => Err(CliError::InvalidArgument(
            "--value is only accepted with `merged`".to_string(),
        )),
    }
}

pub async fn run_resolve(
    id: &str,
    choice: ChoiceArg,
    value: Option<&str>,
    context: &Context,
) -> Result<(), CliError> {
    let id = id
        .trim()
        .parse::<ConflictId>()
        .map_err(|error| CliError::InvalidArgument(format!("invalid conflict id: {error}")))?;
    let choice = resolution_choice(choice, value)?;

    let session = Session::open_local(context).await?;
    let result = session.engine.resolve_conflict(&id, choice).await;
    let pending = session.engine.get_sync_status().pending_actions;
    session.close().await;

    let record = result?;
    println!(
        "Resolved conflict on {} ({})",
        record.key,
        resolution_label(&record)
    );
    if pending > 0 {
        println!("{pending} action(s) queued; run `tether sync` to push them");
    }
    Ok(())
}

fn resolution_label(record: &ConflictRecord) -> String {
    record.resolution.map_or_else(
        || "unresolved".to_string(),
        |resolution| format!("{resolution:?}").to_lowercase(),
    )
}
