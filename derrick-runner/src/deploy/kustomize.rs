//! kustomize deployer
//!
//! Renders the configured overlay with `kustomize build`, rewrites image
//! references to the fresh tags and pipes the result through
//! `kubectl apply`, mirroring the kubectl deployer's flow.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use async_trait::async_trait;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;

use derrick_core::build::BuildResult;
use derrick_core::config::KustomizeDeploy;

use crate::output::Output;
use crate::process::{capture_output, run_streamed_with_input};

use super::{replace_images, DeployedRef, Deployer};

pub struct KustomizeDeployer {
    cfg: KustomizeDeploy,
    kube_context: String,
    namespace: Option<String>,
    working_dir: PathBuf,
}

impl KustomizeDeployer {
    pub fn new(
        cfg: &KustomizeDeploy,
        kube_context: &str,
        namespace: Option<&str>,
        working_dir: &Path,
    ) -> Self {
        Self {
            cfg: cfg.clone(),
            kube_context: kube_context.to_string(),
            namespace: namespace.map(String::from),
            working_dir: working_dir.to_path_buf(),
        }
    }

    fn overlay_dir(&self) -> PathBuf {
        self.working_dir.join(&self.cfg.path)
    }
}

#[async_trait]
impl Deployer for KustomizeDeployer {
    fn name(&self) -> &'static str {
        "kustomize"
    }

    async fn deploy(
        &self,
        cancel: &CancellationToken,
        out: &Output,
        builds: &[BuildResult],
    ) -> Result<Vec<DeployedRef>> {
        let mut build_cmd = Command::new("kustomize");
        build_cmd.arg("build").arg(self.overlay_dir());

        let manifests = capture_output(cancel, build_cmd, "kustomize build")
            .await
            .context("rendering kustomization")?;
        let rendered = replace_images(&manifests, builds);
        let refs = super::kubectl::parse_deployed_refs(&rendered);

        let mut cmd = Command::new("kubectl");
        cmd.arg("--context").arg(&self.kube_context);
        if let Some(namespace) = &self.namespace {
            cmd.arg("--namespace").arg(namespace);
        }
        cmd.arg("apply").arg("-f").arg("-");

        run_streamed_with_input(cancel, out, cmd, Some(rendered.into_bytes()), "kubectl apply")
            .await?;

        Ok(refs)
    }

    fn dependencies(&self) -> Result<Vec<PathBuf>> {
        let mut paths = Vec::new();

        for entry in walkdir::WalkDir::new(self.overlay_dir())
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
        {
            paths.push(entry.into_path());
        }

        Ok(paths)
    }
}
