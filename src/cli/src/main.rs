//! Snaplog CLI - simulate and inspect replicated, snapshot-accelerated logs.
//!
//! Provides commands to run several replicas of the sample Person entity
//! against in-memory or file stores, and to inspect file-backed entities.

mod commands;
mod output;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use snaplog_core::config::Config;
use snaplog_core::telemetry::{describe_metrics, init_logging};

use commands::{inspect, simulate};
use output::OutputFormat;

/// Snaplog - primary-based log consistency with snapshots
#[derive(Parser)]
#[command(
    name = "snaplog",
    author = "Aezi <aezi.zhu@icloud.com>",
    version = "0.1.0",
    about = "Snaplog - primary-based log consistency with snapshots",
    long_about = "CLI tool for simulating replicas of an event-sourced entity and inspecting stored records.",
    propagate_version = true
)]
pub struct Cli {
    /// Output format
    #[arg(short, long, global = true, default_value = "table")]
    output: OutputFormat,

    /// Configuration file (environment variables SNAPLOG__* override it)
    #[arg(short, long, global = true, env = "SNAPLOG_CONFIG")]
    config: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true)]
    log_level: Option<String>,

    /// Disable colored output
    #[arg(long, global = true)]
    no_color: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run replicas of the sample Person entity and report their views
    Simulate(simulate::SimulateArgs),

    /// Print the stored record and event log of a file-backed entity
    Inspect(inspect::InspectArgs),
}

fn load_config(cli: &Cli) -> Result<Config> {
    let mut config = match &cli.config {
        Some(path) => {
            Config::from_file(path).with_context(|| format!("Failed to load config from {}", path))?
        }
        None => Config::load().context("Failed to load config from environment")?,
    };
    if let Some(level) = &cli.log_level {
        config.logging.level = level.clone();
    }
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    if cli.no_color {
        colored::control::set_override(false);
    }

    let config = match load_config(&cli) {
        Ok(config) => config,
        Err(e) => {
            output::print_error(&format!("{:#}", e));
            std::process::exit(2);
        }
    };
    init_logging(&config.logging)?;
    describe_metrics();

    let format = cli.output;
    let result = match cli.command {
        Commands::Simulate(args) => simulate::execute(args, &config, format).await,
        Commands::Inspect(args) => inspect::execute(args, format).await,
    };

    if let Err(e) = result {
        output::print_error(&format!("{:#}", e));
        std::process::exit(1);
    }

    Ok(())
}
