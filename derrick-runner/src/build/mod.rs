//! Builders
//!
//! A builder turns the pipeline's artifacts into freshly tagged images.
//! Exactly one variant is selected from the pipeline's build config:
//! the local docker daemon, Google Cloud Build, or an in-cluster kaniko
//! pod.

use anyhow::Result;
use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use derrick_core::build::BuildResult;
use derrick_core::config::Artifact;

use crate::output::Output;

mod gcb;
mod kaniko;
mod local;
pub mod tag;

pub use gcb::GoogleCloudBuilder;
pub use kaniko::KanikoBuilder;
pub use local::LocalBuilder;
pub use tag::Tagger;

/// Builds container images for a list of artifacts
///
/// Implementations must abort promptly when the cancellation handle
/// fires and must not return partial batches: either every artifact
/// built, or the call failed.
#[async_trait]
pub trait Builder: Send + Sync {
    /// Short name used in logs and resource labels
    fn name(&self) -> &'static str;

    async fn build(
        &self,
        cancel: &CancellationToken,
        out: &Output,
        tagger: &dyn Tagger,
        artifacts: &[Artifact],
    ) -> Result<Vec<BuildResult>>;
}
