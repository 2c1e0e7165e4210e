//! Dev command handler
//!
//! Re-enters dev mode whenever the runner reports that the pipeline file
//! itself changed, re-reading the configuration each time.

use std::time::Duration;

use anyhow::Result;
use clap::Args;
use tracing::info;

use derrick_core::options::Options;
use derrick_runner::{Output, Runner};

use super::{cancellation_on_ctrl_c, load_pipeline, GlobalArgs};

#[derive(Args)]
pub struct DevArgs {
    /// Only watch artifacts whose image name contains one of these
    /// substrings
    #[arg(short = 'w', long = "watch-image")]
    pub watch: Vec<String>,

    /// How dev-loop ticks are triggered: polling or manual
    #[arg(long, default_value = "polling")]
    pub trigger: String,

    /// Seconds between watch polls
    #[arg(long, default_value_t = 1)]
    pub watch_poll_interval: u64,

    /// Do not stream logs of deployed containers
    #[arg(long)]
    pub no_tail: bool,

    /// Forward declared container ports of deployed pods
    #[arg(long)]
    pub port_forward: bool,

    /// Ring the terminal bell when a deploy completes
    #[arg(long)]
    pub notification: bool,

    /// Tag to use instead of the configured tag policy
    #[arg(short = 't', long, default_value = "")]
    pub custom_tag: String,
}

pub async fn handle_dev(args: DevArgs, globals: &GlobalArgs) -> Result<()> {
    let cancel = cancellation_on_ctrl_c();
    let out = Output::stdout();

    loop {
        let (pipeline, pipeline_dir) = load_pipeline(globals)?;

        let options = Options {
            config_file: globals.filename.clone(),
            custom_tag: args.custom_tag.clone(),
            namespace: globals.namespace.clone(),
            watch: args.watch.clone(),
            trigger: args.trigger.clone(),
            watch_poll_interval: Duration::from_secs(args.watch_poll_interval),
            tail: false,
            tail_dev: !args.no_tail,
            port_forward: args.port_forward,
            notification: args.notification,
        };

        let runner = Runner::for_config(options, &pipeline, &pipeline_dir)?;

        match runner.dev(&cancel, &out, &pipeline.build.artifacts).await {
            Ok(()) => return Ok(()),
            Err(err) if err.is_configuration_changed() => {
                info!("Configuration changed, restarting dev mode");
                continue;
            }
            Err(err) => return Err(err.into()),
        }
    }
}
