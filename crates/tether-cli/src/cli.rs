use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

#[derive(Parser)]
#[command(name = "tether")]
#[command(about = "Queue, cache and sync data for intermittently connected clients")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Optional path to the local state database
    #[arg(long, global = true, value_name = "PATH")]
    pub db_path: Option<PathBuf>,

    /// CLI profile name for remote and engine configuration
    #[arg(long, global = true, value_name = "NAME")]
    pub profile: Option<String>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Queue a mutation for the remote service
    Queue {
        /// Action kind: create, update, delete or a custom verb
        kind: String,
        /// Remote resource the action applies to
        target: String,
        /// Payload (parsed as JSON when possible, otherwise sent as text)
        payload: Option<String>,
        /// Drain priority
        #[arg(long, value_enum, default_value_t = PriorityArg::Normal)]
        priority: PriorityArg,
        /// Attempt ceiling for this action
        #[arg(long, value_name = "N")]
        max_attempts: Option<u32>,
        /// Cache key affected by this action (defaults to the target)
        #[arg(long, value_name = "KEY")]
        cache_key: Option<String>,
    },
    /// List queued actions
    Pending {
        /// Output as JSON
        #[arg(long)]
        json: bool,
        /// Drop every queued action instead of listing them
        #[arg(long, conflicts_with = "json")]
        clear: bool,
    },
    /// Read and write the local cache
    Cache {
        #[command(subcommand)]
        command: CacheCommands,
    },
    /// Show sync status
    Status {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Run a sync pass against the configured remote
    Sync,
    /// List open conflicts
    Conflicts {
        /// Include recently resolved conflicts
        #[arg(long)]
        resolved: bool,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Settle an open conflict
    Resolve {
        /// Conflict ID
        id: String,
        /// Which side wins
        #[arg(value_enum)]
        choice: ChoiceArg,
        /// Merged value, required with `merged`
        #[arg(long, value_name = "VALUE")]
        value: Option<String>,
    },
    /// Keep syncing and print status changes until interrupted
    Watch,
    /// Configure CLI profiles
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
}

#[derive(Subcommand)]
pub enum CacheCommands {
    /// Store a value
    Put {
        key: String,
        /// Value (parsed as JSON when possible, otherwise stored as text)
        value: String,
        /// Time to live in seconds
        #[arg(long, default_value = "3600")]
        ttl: u64,
    },
    /// Read a value
    Get {
        key: String,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// List live entries
    List {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Remove one key, or everything when no key is given
    Clear { key: Option<String> },
}

#[derive(Subcommand)]
pub enum ConfigCommands {
    /// Initialize or update a profile
    Init {
        /// Base URL actions are sent to
        #[arg(long, value_name = "URL")]
        remote_url: Option<String>,
        /// URL polled to decide whether the remote is reachable
        #[arg(long, value_name = "URL")]
        probe_url: Option<String>,
        /// Local state database for this profile
        #[arg(long = "profile-db-path", value_name = "PATH")]
        profile_db_path: Option<PathBuf>,
        /// Engine override as NAME=VALUE (e.g. TETHER_MAX_ATTEMPTS=3)
        #[arg(long = "set", value_name = "NAME=VALUE")]
        overrides: Vec<String>,
        /// Save without making the profile active
        #[arg(long)]
        no_activate: bool,
    },
    /// Print the resolved profile
    Show,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, ValueEnum)]
pub enum PriorityArg {
    Critical,
    High,
    Normal,
    Low,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, ValueEnum)]
pub enum ChoiceArg {
    Server,
    Client,
    Merged,
}
