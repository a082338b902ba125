use std::time::Duration;

use crate::cli::CacheCommands;
use crate::commands::common::{format_cache_line, now_ms, parse_payload, Context, Session};
use crate::error::CliError;

pub async fn run_cache(command: CacheCommands, context: &Context) -> Result<(), CliError> {
    let session = Session::open_local(context).await?;
    let result = run_with_session(command, &session).await;
    session.close().await;
    result
}

async fn run_with_session(command: CacheCommands, session: &Session) -> Result<(), CliError> {
    let engine = &session.engine;
    match command {
        CacheCommands::Put { key, value, ttl } => {
            if ttl == 0 {
                return Err(CliError::InvalidArgument(
                    "--ttl must be greater than zero".to_string(),
                ));
            }
            let entry = engine
                .cache_data(&key, parse_payload(&value), Duration::from_secs(ttl))
                .await?;
            println!("Cached {} (version {})", entry.key, entry.version);
        }
        CacheCommands::Get { key, json } => {
            let entry = engine
                .get_cached_data(&key)
                .await
                .ok_or_else(|| CliError::CacheMiss(key.clone()))?;
            if json {
                println!("{}", serde_json::to_string_pretty(&entry)?);
            } else {
                println!("{}", format_cache_line(&entry, now_ms()));
            }
        }
        CacheCommands::List { json } => {
            let entries = engine.cached_entries().await;
            if json {
                println!("{}", serde_json::to_string_pretty(&entries)?);
            } else if entries.is_empty() {
                println!("Cache is empty.");
            } else {
                let now = now_ms();
                for entry in &entries {
                    println!("{}", format_cache_line(entry, now));
                }
            }
        }
        CacheCommands::Clear { key } => {
            let removed = engine.clear_cache(key.as_deref()).await?;
            println!("Removed {removed} cache entr{}", if removed == 1 { "y" } else { "ies" });
        }
    }
    Ok(())
}
