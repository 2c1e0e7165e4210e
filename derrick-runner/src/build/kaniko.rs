//! In-cluster builder
//!
//! Runs a short-lived kaniko pod per artifact that builds the image from
//! the uploaded source tree and pushes it to the target reference.

use anyhow::{Context, Result};
use async_trait::async_trait;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::info;
use uuid::Uuid;

use derrick_core::build::BuildResult;
use derrick_core::config::{Artifact, ArtifactKind, KanikoBuild};

use crate::output::Output;
use crate::process::run_streamed;

use super::{Builder, Tagger};

const KANIKO_IMAGE: &str = "gcr.io/kaniko-project/executor:latest";

pub struct KanikoBuilder {
    cfg: KanikoBuild,
}

impl KanikoBuilder {
    pub fn new(cfg: &KanikoBuild) -> Self {
        Self { cfg: cfg.clone() }
    }
}

#[async_trait]
impl Builder for KanikoBuilder {
    fn name(&self) -> &'static str {
        "kaniko"
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
            let ArtifactKind::Docker(docker) = &artifact.kind else {
                anyhow::bail!(
                    "artifact {} is not a docker artifact; kaniko builds from a Dockerfile",
                    artifact.image_name
                );
            };

            let tag = tagger
                .generate_tag(&artifact.workspace, &artifact.image_name)
                .with_context(|| format!("generating tag for {}", artifact.image_name))?;

            let pod = format!("kaniko-{}", &Uuid::new_v4().to_string()[..8]);
            info!("Building {} in-cluster as {} (pod {})", artifact.image_name, tag, pod);

            let mut cmd = Command::new("kubectl");
            cmd.arg("run")
                .arg(&pod)
                .arg("--rm")
                .arg("--attach")
                .arg("--restart=Never")
                .arg(format!("--image={KANIKO_IMAGE}"));
            if let Some(namespace) = &self.cfg.namespace {
                cmd.arg("--namespace").arg(namespace);
            }
            cmd.arg("--")
                .arg(format!("--dockerfile={}", docker.dockerfile.display()))
                .arg(format!("--context=dir://{}", artifact.workspace.display()))
                .arg(format!("--destination={tag}"));

            run_streamed(cancel, out, cmd, "kaniko build")
                .await
                .with_context(|| format!("building {}", artifact.image_name))?;

            results.push(BuildResult::new(&artifact.image_name, tag));
        }

        Ok(results)
    }
}
