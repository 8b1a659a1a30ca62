use clap::Parser;

use iv_screener::{logs, run};

mod cli;

fn main() -> anyhow::Result<()> {
    let cli = cli::Cli::parse();
    logs::init_tracing(&cli.log);

    let config = cli.command.run_config();
    match cli.command {
        cli::Command::Serve { .. } => run::serve(&config),
        cli::Command::Tick { .. } => run::tick(&config),
        cli::Command::Expiries { .. } => run::expiries(&config),
    }
}
