//! Derrick CLI
//!
//! Command-line interface for the derrick inner-loop orchestrator.

mod commands;

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use commands::{Commands, GlobalArgs};

#[derive(Parser)]
#[command(name = "derrick")]
#[command(about = "Build, test and deploy containerised workloads on save", long_about = None)]
struct Cli {
    #[command(flatten)]
    globals: GlobalArgs,

    #[command(subcommand)]
    command: Commands,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "derrick=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    commands::handle_command(cli.command, &cli.globals).await
}
