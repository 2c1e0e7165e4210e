//! Pipeline runner
//!
//! Composes the selected builder, tester, deployer, tagger, syncer and
//! trigger into the two entry points consumed by the CLI: `run` (the
//! single-shot pipeline) and `dev` (the watch-driven loop).

use std::collections::HashSet;
use std::path::Path;
use std::sync::{Arc, Mutex};

use anyhow::Result;
use tokio_util::sync::CancellationToken;
use tracing::info;

use derrick_core::build::BuildResult;
use derrick_core::config::{Artifact, Pipeline, API_VERSION};
use derrick_core::options::Options;

use crate::build::{Builder, Tagger};
use crate::deploy::{Deployer, WithLabels};
use crate::error::{ConfigError, RunnerError};
use crate::kubernetes::{self, ColorPicker, ImageList, LogAggregator};
use crate::output::Output;
use crate::sync::{KubectlSyncer, Syncer};
use crate::tester::{CommandTester, Tester};
use crate::watch::Trigger;

mod changes;
pub mod dependencies;
mod dev;
mod factory;
mod notifications;
#[cfg(test)]
pub(crate) mod testutil;
mod timings;

pub use changes::ChangeSet;
pub use dependencies::dependencies_for_artifact;

/// The assembled pipeline orchestrator
pub struct Runner {
    builder: Arc<dyn Builder>,
    tester: Arc<dyn Tester>,
    deployer: Arc<dyn Deployer>,
    tagger: Arc<dyn Tagger>,
    syncer: Arc<dyn Syncer>,
    trigger: Arc<dyn Trigger>,
    options: Options,
    kube_context: String,
    /// Latest-builds registry: image name to the most recent build
    /// result across all runs; merged, never truncated
    builds: Arc<Mutex<Vec<BuildResult>>>,
}

impl Runner {
    /// Assembles a runner for a parsed pipeline
    ///
    /// `pipeline_dir` is the directory of the pipeline file; every
    /// relative path in the deploy and test config resolves against it.
    pub fn for_config(options: Options, pipeline: &Pipeline, pipeline_dir: &Path) -> Result<Self> {
        if pipeline.api_version.is_empty() {
            return Err(ConfigError::MissingApiVersion.into());
        }
        if pipeline.api_version != API_VERSION {
            return Err(ConfigError::UnsupportedApiVersion(pipeline.api_version.clone()).into());
        }

        let kube_context = kubernetes::current_context()?;
        info!("Using kubectl context: {}", kube_context);
        let namespace = options.namespace.as_deref();

        let tagger = factory::create_tagger(&pipeline.build.tag_policy, &options.custom_tag)?;
        let builder = factory::create_builder(&pipeline.build)?;
        let tester: Box<dyn Tester> = Box::new(CommandTester::new(&pipeline.test, pipeline_dir));
        let deployer =
            factory::create_deployer(&pipeline.deploy, &kube_context, namespace, pipeline_dir)?;

        // The label set closes over the assembled trio; the decorator
        // itself holds no references back into it.
        let labels = factory::runner_labels(builder.as_ref(), deployer.as_ref(), tagger.as_ref());
        let deployer: Box<dyn Deployer> =
            Box::new(WithLabels::new(deployer, labels, &kube_context, namespace));

        let (builder, tester, mut deployer) = timings::with_timings(builder, tester, deployer);
        if options.notification {
            deployer = Box::new(notifications::WithNotifications::new(deployer));
        }

        let trigger = factory::create_trigger(&options)?;
        let syncer = KubectlSyncer::new(&kube_context, namespace);

        Ok(Self {
            builder: Arc::from(builder),
            tester: Arc::from(tester),
            deployer: Arc::from(deployer),
            tagger: Arc::from(tagger),
            syncer: Arc::new(syncer),
            trigger,
            options,
            kube_context,
            builds: Arc::new(Mutex::new(Vec::new())),
        })
    }

    /// Builds the artifacts, tests them, deploys them, then optionally
    /// tails their logs until cancellation
    pub async fn run(
        &self,
        cancel: &CancellationToken,
        out: &Output,
        artifacts: &[Artifact],
    ) -> Result<(), RunnerError> {
        let builds = match self
            .builder
            .build(cancel, out, self.tagger.as_ref(), artifacts)
            .await
        {
            Ok(builds) => builds,
            Err(err) => {
                if cancel.is_cancelled() {
                    return Ok(());
                }
                return Err(RunnerError::Build(err));
            }
        };
        self.update_builds(&builds);

        if let Err(err) = self.tester.test(cancel, out, &builds).await {
            if cancel.is_cancelled() {
                return Ok(());
            }
            return Err(RunnerError::Test(err));
        }

        if let Err(err) = self.deployer.deploy(cancel, out, &builds).await {
            if cancel.is_cancelled() {
                return Ok(());
            }
            return Err(RunnerError::Deploy(err));
        }

        if self.options.tail {
            let image_list = ImageList::new();
            for build in &builds {
                image_list.add(build.tag.clone());
            }
            let logger = LogAggregator::new(
                out.clone(),
                image_list,
                ColorPicker::new(artifacts),
                &self.kube_context,
                self.options.namespace.as_deref(),
            );
            logger.start(cancel)?;
            cancel.cancelled().await;
        }

        Ok(())
    }

    /// Merges a fresh batch over the latest-builds registry
    fn update_builds(&self, batch: &[BuildResult]) {
        let mut builds = self.builds.lock().unwrap();
        let merged = merge_with_previous_builds(batch, &builds);
        *builds = merged;
    }

    #[cfg(test)]
    pub(crate) fn from_parts(
        builder: Arc<dyn Builder>,
        tester: Arc<dyn Tester>,
        deployer: Arc<dyn Deployer>,
        tagger: Arc<dyn Tagger>,
        syncer: Arc<dyn Syncer>,
        trigger: Arc<dyn Trigger>,
        options: Options,
    ) -> Self {
        Self {
            builder,
            tester,
            deployer,
            tagger,
            syncer,
            trigger,
            options,
            kube_context: "test-context".to_string(),
            builds: Arc::new(Mutex::new(Vec::new())),
        }
    }
}

/// Merge rule for the latest-builds registry
///
/// The result contains every entry of the fresh batch, plus every
/// previous entry whose image name the batch does not mention. A partial
/// rebuild therefore still presents a complete set to the deployer.
pub fn merge_with_previous_builds(
    builds: &[BuildResult],
    previous: &[BuildResult],
) -> Vec<BuildResult> {
    let updated: HashSet<&str> = builds.iter().map(|b| b.image_name.as_str()).collect();

    let mut merged = builds.to_vec();
    merged.extend(
        previous
            .iter()
            .filter(|p| !updated.contains(p.image_name.as_str()))
            .cloned(),
    );

    merged
}
