//! Google Cloud Build builder
//!
//! Submits each artifact's workspace to the cloud build service and lets
//! it produce the tagged image remotely. Only Dockerfile artifacts are
//! supported remotely.

use anyhow::{Context, Result};
use async_trait::async_trait;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::info;

use derrick_core::build::BuildResult;
use derrick_core::config::{Artifact, ArtifactKind, GoogleCloudBuild};

use crate::output::Output;
use crate::process::run_streamed;

use super::{Builder, Tagger};

pub struct GoogleCloudBuilder {
    cfg: GoogleCloudBuild,
}

impl GoogleCloudBuilder {
    pub fn new(cfg: &GoogleCloudBuild) -> Self {
        Self { cfg: cfg.clone() }
    }
}

#[async_trait]
impl Builder for GoogleCloudBuilder {
    fn name(&self) -> &'static str {
        "google-cloud-build"
    }

    async fn build(
        &self,
        cancel: &CancellationToken,
        out: &Output,
        tagger: &dyn Tagger,
        artifacts: &[Artifact],
    ) -> Result<Vec<BuildResult>> {
        let mut results = Vec::with_capacity(artifacts.len());

        for artifact in artifacts {
            if !matches!(artifact.kind, ArtifactKind::Docker(_)) {
                anyhow::bail!(
                    "artifact {} is not a docker artifact; cloud build only supports Dockerfiles",
                    artifact.image_name
                );
            }

            let tag = tagger
                .generate_tag(&artifact.workspace, &artifact.image_name)
                .with_context(|| format!("generating tag for {}", artifact.image_name))?;

            info!("Submitting {} to cloud build as {}", artifact.image_name, tag);

            let mut cmd = Command::new("gcloud");
            cmd.arg("builds")
                .arg("submit")
                .arg("--project")
                .arg(&self.cfg.project_id)
                .arg("--tag")
                .arg(&tag)
                .arg(&artifact.workspace);

            run_streamed(cancel, out, cmd, "gcloud builds submit")
                .await
                .with_context(|| format!("building {}", artifact.image_name))?;

            results.push(BuildResult::new(&artifact.image_name, tag));
        }

        Ok(results)
    }
}
