//! Command handlers
//!
//! Each subcommand loads the pipeline file, assembles a runner and hands
//! control to it; Ctrl-C is mapped onto the cancellation token every
//! long-running operation observes.

mod dev;
mod run;

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Args, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::info;

use derrick_core::config::Pipeline;
use derrick_runner::ConfigError;

/// Arguments shared by every subcommand
#[derive(Args)]
pub struct GlobalArgs {
    /// Path to the pipeline configuration file
    #[arg(
        short = 'f',
        long = "filename",
        env = "DERRICK_CONFIG",
        default_value = "derrick.yaml",
        global = true
    )]
    pub filename: PathBuf,

    /// Activate profiles by name
    #[arg(short = 'p', long = "profile", global = true)]
    pub profiles: Vec<String>,

    /// Kubernetes namespace to deploy into
    #[arg(short = 'n', long, global = true)]
    pub namespace: Option<String>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Build, test and deploy the pipeline once
    Run(run::RunArgs),

    /// Watch the source tree and keep the cluster in sync until
    /// interrupted
    Dev(dev::DevArgs),
}

pub async fn handle_command(command: Commands, globals: &GlobalArgs) -> Result<()> {
    match command {
        Commands::Run(args) => run::handle_run(args, globals).await,
        Commands::Dev(args) => dev::handle_dev(args, globals).await,
    }
}

/// Reads and parses the pipeline file, returning it together with its
/// directory (which anchors every relative path in the configuration)
pub(crate) fn load_pipeline(globals: &GlobalArgs) -> Result<(Pipeline, PathBuf)> {
    let contents = std::fs::read_to_string(&globals.filename)
        .with_context(|| format!("reading pipeline file {}", globals.filename.display()))?;

    let mut pipeline = Pipeline::parse(&contents)
        .with_context(|| format!("parsing pipeline file {}", globals.filename.display()))?;

    for name in &globals.profiles {
        if !pipeline.apply_profile(name) {
            return Err(ConfigError::UnknownProfile(name.clone()).into());
        }
    }

    let dir = globals
        .filename
        .parent()
        .filter(|parent| !parent.as_os_str().is_empty())
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."));

    Ok((pipeline, dir))
}

/// A cancellation token that fires on Ctrl-C
pub(crate) fn cancellation_on_ctrl_c() -> CancellationToken {
    let cancel = CancellationToken::new();

    let signalled = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Interrupted, shutting down");
            signalled.cancel();
        }
    });

    cancel
}
