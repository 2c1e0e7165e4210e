//! Local builder
//!
//! Builds artifacts with the tools on the developer's machine: docker
//! for Dockerfile artifacts, bazel and the jib plugins for the rest.

use anyhow::{Context, Result};
use async_trait::async_trait;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::info;

use derrick_core::build::BuildResult;
use derrick_core::config::{Artifact, ArtifactKind, LocalBuild};

use crate::output::Output;
use crate::process::run_streamed;

use super::{Builder, Tagger};

pub struct LocalBuilder {
    cfg: LocalBuild,
}

impl LocalBuilder {
    pub fn new(cfg: &LocalBuild) -> Self {
        Self { cfg: cfg.clone() }
    }

    async fn build_artifact(
        &self,
        cancel: &CancellationToken,
        out: &Output,
        artifact: &Artifact,
        tag: &str,
    ) -> Result<()> {
        match &artifact.kind {
            ArtifactKind::Docker(docker) => {
                let dockerfile = artifact.workspace.join(&docker.dockerfile);

                let mut cmd = Command::new("docker");
                cmd.arg("build")
                    .arg("--file")
                    .arg(&dockerfile)
                    .arg("--tag")
                    .arg(tag);
                for (key, value) in &docker.build_args {
                    cmd.arg("--build-arg").arg(format!("{key}={value}"));
                }
                cmd.arg(&artifact.workspace);

                run_streamed(cancel, out, cmd, "docker build").await
            }

            ArtifactKind::Bazel(bazel) => {
                let mut cmd = Command::new("bazel");
                cmd.arg("run").arg(&bazel.target).current_dir(&artifact.workspace);
                run_streamed(cancel, out, cmd, "bazel run").await?;

                // bazel loads the image under the target's own name
                let loaded = bazel_image_name(&bazel.target);
                let mut tag_cmd = Command::new("docker");
                tag_cmd.arg("tag").arg(&loaded).arg(tag);
                run_streamed(cancel, out, tag_cmd, "docker tag").await
            }

            ArtifactKind::JibMaven(jib) => {
                let mut cmd = Command::new("mvn");
                cmd.arg("--batch-mode");
                if let Some(module) = &jib.module {
                    cmd.arg("--projects").arg(module);
                }
                cmd.arg("package")
                    .arg("jib:dockerBuild")
                    .arg(format!("-Dimage={tag}"))
                    .current_dir(&artifact.workspace);

                run_streamed(cancel, out, cmd, "mvn jib:dockerBuild").await
            }

            ArtifactKind::JibGradle(jib) => {
                let task = match &jib.project {
                    Some(project) => format!(":{project}:jibDockerBuild"),
                    None => "jibDockerBuild".to_string(),
                };

                let mut cmd = Command::new("gradle");
                cmd.arg(task)
                    .arg(format!("--image={tag}"))
                    .current_dir(&artifact.workspace);

                run_streamed(cancel, out, cmd, "gradle jibDockerBuild").await
            }
        }
    }

    async fn push(&self, cancel: &CancellationToken, out: &Output, tag: &str) -> Result<()> {
        let mut cmd = Command::new("docker");
        cmd.arg("push").arg(tag);
        run_streamed(cancel, out, cmd, "docker push").await
    }
}

// bazel image targets load as bazel/<package>:<name>
fn bazel_image_name(target: &str) -> String {
    let trimmed = target.trim_start_matches("//");
    match trimmed.split_once(':') {
        Some((package, name)) => format!("bazel/{package}:{name}"),
        None => format!("bazel:{trimmed}"),
    }
}

#[async_trait]
impl Builder for LocalBuilder {
    fn name(&self) -> &'static str {
        "local"
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
            let tag = tagger
                .generate_tag(&artifact.workspace, &artifact.image_name)
                .with_context(|| format!("generating tag for {}", artifact.image_name))?;

            info!("Building {} as {}", artifact.image_name, tag);
            self.build_artifact(cancel, out, artifact, &tag)
                .await
                .with_context(|| format!("building {}", artifact.image_name))?;

            if self.cfg.push {
                self.push(cancel, out, &tag)
                    .await
                    .with_context(|| format!("pushing {tag}"))?;
            }

            results.push(BuildResult::new(&artifact.image_name, tag));
        }

        Ok(results)
    }
}
