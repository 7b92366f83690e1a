//! Swarmcast CLI - Command-line interface
//!
//! Runs the streaming API server or inspects a magnet link's media files.

mod commands;

use anyhow::Context;
use clap::Parser;
use swarmcast_core::tracing_setup::{CliLogLevel, init_tracing};

#[derive(Parser)]
#[command(name = "swarmcast")]
#[command(about = "Stream media from torrent swarms as HLS")]
struct Cli {
    /// Console log level (RUST_LOG overrides)
    #[arg(long, value_enum, default_value_t = CliLogLevel::Info, global = true)]
    log_level: CliLogLevel,

    #[command(subcommand)]
    command: commands::Commands,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    init_tracing(cli.log_level.as_tracing_level(), None)
        .context("Failed to initialize tracing")?;

    commands::handle_command(cli.command).await
}
