//! Tether CLI - queue, cache and sync from the command line
//!
//! Every command opens the on-disk state store, so actions queued while
//! offline survive until a later `tether sync` or `tether watch` pushes them.

mod cli;
mod commands;
mod config_profiles;
mod error;
mod remote;

#[cfg(test)]
mod tests;

use clap::Parser;

use crate::cli::{Cli, Commands};
use crate::commands::cache::run_cache;
use crate::commands::common::Context;
use crate::commands::config::run_config;
use crate::commands::conflicts::{run_conflicts, run_resolve};
use crate::commands::queue::{clear_pending, queue_options, run_pending, run_queue};
use crate::commands::status::run_status;
use crate::commands::sync::{run_sync, run_watch};
use crate::error::CliError;

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        eprintln!("Error: {error}");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), CliError> {
    dotenvy::dotenv().ok();

    let mut filter = tracing_subscriber::EnvFilter::from_default_env();
    if let Ok(directive) = "tether=info".parse() {
        filter = filter.add_directive(directive);
    }
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Config { command } => run_config(command, cli.profile.as_deref(), cli.db_path),
        command => {
            let context = Context::load(cli.db_path, cli.profile.as_deref())?;
            dispatch(command, &context).await
        }
    }
}

async fn dispatch(command: Commands, context: &Context) -> Result<(), CliError> {
    match command {
        Commands::Queue {
            kind,
            target,
            payload,
            priority,
            max_attempts,
            cache_key,
        } => {
            let options = queue_options(priority, max_attempts, cache_key);
            run_queue(&kind, &target, payload.as_deref(), options, context).await
        }
        Commands::Pending { clear: true, .. } => {
            let removed = clear_pending(context).await?;
            println!("Dropped {removed} queued action(s).");
            Ok(())
        }
        Commands::Pending { json, clear: false } => run_pending(json, context).await,
        Commands::Cache { command } => run_cache(command, context).await,
        Commands::Status { json } => run_status(json, context).await,
        Commands::Sync => run_sync(context).await,
        Commands::Conflicts { resolved, json } => run_conflicts(resolved, json, context).await,
        Commands::Resolve { id, choice, value } => {
            run_resolve(&id, choice, value.as_deref(), context).await
        }
        Commands::Watch => run_watch(context).await,
        Commands::Config { command } => run_config(
            command,
            Some(&context.profile_name),
            Some(context.db_path.clone()),
        ),
    }
}
