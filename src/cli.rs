use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

use iv_screener::run::RunConfig;

/// Periodic options-market screener: polls ATM IV, skew and option chains
/// every tick and serves the derived tables over HTTP.
#[derive(Parser)]
#[command(name = "iv-screener", version, about)]
pub struct Cli {
    /// Log filter used when RUST_LOG is unset
    #[arg(long, global = true, default_value = "info")]
    pub log: String,

    #[command(subcommand)]
    pub command: Command,
}

/// Flags shared by every command. Unset flags fall back to the environment.
#[derive(Args, Clone)]
pub struct CommonArgs {
    /// Upstream API base URL (env: ATHENA_SERVER_URL)
    #[arg(long)]
    pub server_url: Option<String>,

    /// Directory holding reference CSVs, checkpoints and scan_config.json (env: ASSET_DIR)
    #[arg(long)]
    pub asset_dir: Option<PathBuf>,
}

#[derive(Subcommand)]
pub enum Command {
    /// Run the tick loop and the query/admin API until interrupted
    Serve {
        #[command(flatten)]
        common: CommonArgs,

        /// Address to bind (env: SERVER_HOST)
        #[arg(long)]
        host: Option<String>,

        /// Port to bind (env: SERVER_PORT)
        #[arg(long)]
        port: Option<u16>,

        /// Tick interval in milliseconds (env: ATM_UPDATE_INTERVAL)
        #[arg(long)]
        interval_ms: Option<u64>,
    },

    /// Run a single tick and print per-table row counts
    Tick {
        #[command(flatten)]
        common: CommonArgs,
    },

    /// Print the resolved near/next/far expiry dates
    Expiries {
        #[command(flatten)]
        common: CommonArgs,
    },
}

impl Command {
    pub fn run_config(&self) -> RunConfig {
        match self {
            Command::Serve {
                common,
                host,
                port,
                interval_ms,
            } => RunConfig {
                server_url: common.server_url.clone(),
                asset_dir: common.asset_dir.clone(),
                host: host.clone(),
                port: *port,
                interval_ms: *interval_ms,
            },
            Command::Tick { common } | Command::Expiries { common } => RunConfig {
                server_url: common.server_url.clone(),
                asset_dir: common.asset_dir.clone(),
                ..Default::default()
            },
        }
    }
}
