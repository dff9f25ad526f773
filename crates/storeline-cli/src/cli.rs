//! CLI argument definitions for storeline.
//!
//! | Command | Description |
//! |---------|-------------|
//! | `run` | Fetch, archive, normalize and reconcile provider data |
//! | `ledger` | Print recorded runs |
//!
//! ```bash
//! storeline run --providers mock --key-mode pair
//! storeline run --fake --limit 5 --dry-run
//! storeline ledger --last 3 --pretty
//! ```

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

/// Commerce catalog and order ingestion.
#[derive(Debug, Parser)]
#[command(name = "storeline", author, version, about = "Commerce catalog and order ingestion")]
pub struct Cli {
    /// Pipeline configuration file.
    #[arg(long, global = true, default_value = storeline_core::config::DEFAULT_CONFIG_PATH)]
    pub config: PathBuf,

    /// Log at debug level unless `RUST_LOG` says otherwise.
    #[arg(short, long, global = true, default_value_t = false)]
    pub verbose: bool,

    /// Pretty-print JSON output.
    #[arg(long, global = true, default_value_t = false)]
    pub pretty: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run one ingestion pass over the configured providers.
    Run(RunArgs),
    /// Show entries from the run ledger.
    Ledger(LedgerArgs),
}

#[derive(Debug, Clone, Args)]
pub struct RunArgs {
    /// Comma-separated subset of configured providers.
    #[arg(long, value_delimiter = ',')]
    pub providers: Vec<String>,

    /// Identifier stamped on archive files and the ledger; `auto` generates one.
    #[arg(long, default_value = "auto")]
    pub run_id: String,

    /// Compute the merge but persist nothing and skip the ledger.
    #[arg(long, default_value_t = false)]
    pub dry_run: bool,

    /// Bypass the response cache.
    #[arg(long, default_value_t = false)]
    pub no_cache: bool,

    /// Page size override for every resource.
    #[arg(long)]
    pub limit: Option<u32>,

    /// Cache TTL in seconds; 0 never expires.
    #[arg(long)]
    pub ttl: Option<u64>,

    /// Substitute synthetic data for providers that fail.
    #[arg(long, default_value_t = false)]
    pub fake: bool,

    /// Skip real provider calls and use synthetic data only.
    #[arg(long, default_value_t = false)]
    pub fake_only: bool,

    /// `triple` keeps every captured version, `pair` keeps the latest per entity.
    #[arg(long, default_value = "triple")]
    pub key_mode: String,

    /// Seed for synthetic data.
    #[arg(long)]
    pub seed: Option<u64>,
}

#[derive(Debug, Clone, Args)]
pub struct LedgerArgs {
    /// Only the most recent N entries.
    #[arg(long)]
    pub last: Option<usize>,
}
