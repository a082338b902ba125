use std::path::PathBuf;

use tether_core::util::normalize_text_option;
use tether_core::EngineConfig;

use crate::cli::ConfigCommands;
use crate::commands::common::Context;
use crate::config_profiles::CliProfilesConfig;
use crate::error::CliError;

/// Values passed to `config init`
#[derive(Debug, Default)]
pub struct ProfileUpdate {
    pub remote_url: Option<String>,
    pub probe_url: Option<String>,
    pub db_path: Option<PathBuf>,
    pub overrides: Vec<String>,
    pub activate: bool,
}

pub fn run_config(
    command: ConfigCommands,
    global_profile: Option<&str>,
    cli_db_path: Option<PathBuf>,
) -> Result<(), CliError> {
    match command {
        ConfigCommands::Init {
            remote_url,
            probe_url,
            profile_db_path,
            overrides,
            no_activate,
        } => {
            let mut config = CliProfilesConfig::load().map_err(CliError::Config)?;
            let name = config.resolve_profile_name(global_profile);
            let update = ProfileUpdate {
                remote_url,
                probe_url,
                db_path: profile_db_path,
                overrides,
                activate: !no_activate,
            };
            apply_profile_update(&mut config, &name, update)?;
            let path = config.save().map_err(CliError::Config)?;
            println!("Saved profile '{name}' to {}", path.display());
            Ok(())
        }
        ConfigCommands::Show => {
            let context = Context::load(cli_db_path, global_profile)?;
            println!("Profile:   {}", context.profile_name);
            println!("Database:  {}", context.db_path.display());
            println!(
                "Remote:    {}",
                context.remote_base_url.as_deref().unwrap_or("(not configured)")
            );
            println!(
                "Probe:     {}",
                context.probe_url.as_deref().unwrap_or("(not configured)")
            );
            println!(
                "{}",
                serde_json::to_string_pretty(&context.engine_config)?
            );
            Ok(())
        }
    }
}

pub fn apply_profile_update(
    config: &mut CliProfilesConfig,
    name: &str,
    update: ProfileUpdate,
) -> Result<(), CliError> {
    let parsed = update
        .overrides
        .iter()
        .map(|raw| parse_override(raw))
        .collect::<Result<Vec<_>, _>>()?;

    let profile = config.profile_mut_or_default(name);
    if let Some(url) = normalize_text_option(update.remote_url) {
        profile.remote_base_url = Some(url);
    }
    if let Some(url) = normalize_text_option(update.probe_url) {
        profile.probe_url = Some(url);
    }
    if let Some(path) = update.db_path {
        profile.db_path = Some(path);
    }
    profile.engine.extend(parsed);
    profile.validate().map_err(CliError::Config)?;

    // Reject values the engine would refuse at startup
    let engine = profile.engine.clone();
    EngineConfig::from_lookup(|key| engine.get(key).cloned())?;

    if update.activate {
        config.active_profile = Some(name.to_string());
    }
    Ok(())
}

/// Split `NAME=VALUE`, upper-casing the name.
pub fn parse_override(raw: &str) -> Result<(String, String), CliError> {
    let (name, value) = raw
        .split_once('=')
        .ok_or_else(|| CliError::InvalidArgument(format!("expected NAME=VALUE, got '{raw}'")))?;
    let name = name.trim().to_ascii_uppercase();
    let value = value.trim();
    if name.is_empty() || value.is_empty() {
        return Err(CliError::InvalidArgument(format!(
            "expected NAME=VALUE, got '{raw}'"
        )));
    }
    Ok((name, value.to_string()))
}
