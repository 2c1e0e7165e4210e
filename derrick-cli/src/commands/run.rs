//! Run command handler

use anyhow::Result;
use clap::Args;

use derrick_core::options::Options;
use derrick_runner::{Output, Runner};

use super::{cancellation_on_ctrl_c, load_pipeline, GlobalArgs};

#[derive(Args)]
pub struct RunArgs {
    /// Stream logs of deployed containers until interrupted
    #[arg(long)]
    pub tail: bool,

    /// Tag to use instead of the configured tag policy
    #[arg(short = 't', long, default_value = "")]
    pub custom_tag: String,
}

pub async fn handle_run(args: RunArgs, globals: &GlobalArgs) -> Result<()> {
    let (pipeline, pipeline_dir) = load_pipeline(globals)?;

    let options = Options {
        config_file: globals.filename.clone(),
        custom_tag: args.custom_tag,
        namespace: globals.namespace.clone(),
        tail: args.tail,
        ..Options::default()
    };

    let runner = Runner::for_config(options, &pipeline, &pipeline_dir)?;
    let cancel = cancellation_on_ctrl_c();
    let out = Output::stdout();

    runner
        .run(&cancel, &out, &pipeline.build.artifacts)
        .await?;

    Ok(())
}
