//! Sluice - Partitioned batch engine operator CLI
//!
//! # Usage
//!
//! ```bash
//! # Validate a config file and print the resolved engine settings
//! sluice check --config configs/sluice.toml
//!
//! # Drive the engine with synthetic device readings
//! sluice simulate --config configs/sluice.toml --devices 50 --messages 100000
//!
//! # Summarize a fallback file
//! sluice fallback data/fallback.jsonl
//! ```

mod cmd;
mod logging;

use anyhow::Result;
use clap::{Parser, Subcommand};

/// Sluice - Partitioned batch engine for device messages
#[derive(Parser, Debug)]
#[command(name = "sluice")]
#[command(version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Log level (trace, debug, info, warn, error). Overrides config file.
    #[arg(short, long, global = true)]
    log_level: Option<String>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Validate a configuration file
    Check(cmd::check::CheckArgs),

    /// Run the engine against synthetic device traffic
    Simulate(cmd::simulate::SimulateArgs),

    /// Summarize a JSON-lines fallback file
    Fallback(cmd::fallback::FallbackArgs),
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Command::Check(args) => {
            // Check doesn't need logging - just outputs to stdout
            cmd::check::run(args)
        }
        Command::Simulate(args) => {
            let config = cmd::load_config(args.config.as_deref())?;
            logging::init(&config.log, cli.log_level.as_deref())?;
            cmd::simulate::run(args, config).await
        }
        Command::Fallback(args) => {
            // Fallback doesn't need logging - just outputs to stdout
            cmd::fallback::run(args).await
        }
    }
}
