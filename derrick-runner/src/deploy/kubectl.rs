//! kubectl deployer
//!
//! Reads the configured manifest globs, rewrites image references to the
//! fresh tags and pipes the result through `kubectl apply`.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use derrick_core::build::BuildResult;
use derrick_core::config::KubectlDeploy;

use crate::output::Output;
use crate::process::run_streamed_with_input;

use super::{replace_images, DeployedRef, Deployer};

pub struct KubectlDeployer {
    cfg: KubectlDeploy,
    kube_context: String,
    namespace: Option<String>,
    /// Directory of the pipeline file; manifest globs resolve here, not
    /// in the process working directory.
    working_dir: PathBuf,
}

impl KubectlDeployer {
    pub fn new(
        cfg: &KubectlDeploy,
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

    fn manifest_files(&self) -> Result<Vec<PathBuf>> {
        let mut files = Vec::new();

        for pattern in &self.cfg.manifests {
            let full = self.working_dir.join(pattern);
            let matches = glob::glob(&full.to_string_lossy())
                .with_context(|| format!("bad manifest pattern {pattern:?}"))?;
            for path in matches.filter_map(|m| m.ok()) {
                files.push(path);
            }
        }

        files.sort();
        Ok(files)
    }

    fn read_manifests(&self) -> Result<String> {
        let mut combined = String::new();

        for path in self.manifest_files()? {
            let contents = std::fs::read_to_string(&path)
                .with_context(|| format!("reading manifest {}", path.display()))?;
            if !combined.is_empty() {
                combined.push_str("---\n");
            }
            combined.push_str(&contents);
            if !combined.ends_with('\n') {
                combined.push('\n');
            }
        }

        Ok(combined)
    }

    fn kubectl(&self) -> Command {
        let mut cmd = Command::new("kubectl");
        cmd.arg("--context").arg(&self.kube_context);
        if let Some(namespace) = &self.namespace {
            cmd.arg("--namespace").arg(namespace);
        }
        cmd
    }
}

#[async_trait]
impl Deployer for KubectlDeployer {
    fn name(&self) -> &'static str {
        "kubectl"
    }

    async fn deploy(
        &self,
        cancel: &CancellationToken,
        out: &Output,
        builds: &[BuildResult],
    ) -> Result<Vec<DeployedRef>> {
        let manifests = self.read_manifests()?;
        if manifests.is_empty() {
            anyhow::bail!("no manifests matched {:?}", self.cfg.manifests);
        }

        let rendered = replace_images(&manifests, builds);
        let refs = parse_deployed_refs(&rendered);
        debug!("applying {} manifest object(s)", refs.len());

        let mut cmd = self.kubectl();
        cmd.arg("apply").arg("-f").arg("-");
        run_streamed_with_input(cancel, out, cmd, Some(rendered.into_bytes()), "kubectl apply")
            .await?;

        Ok(refs)
    }

    fn dependencies(&self) -> Result<Vec<PathBuf>> {
        self.manifest_files()
    }
}

#[derive(Deserialize)]
struct ManifestHeader {
    kind: Option<String>,
    metadata: Option<ManifestMetadata>,
}

#[derive(Deserialize)]
struct ManifestMetadata {
    name: Option<String>,
}

/// Extracts (kind, name) pairs from a rendered multi-document manifest
pub(super) fn parse_deployed_refs(rendered: &str) -> Vec<DeployedRef> {
    let mut refs = Vec::new();

    for document in rendered.split("\n---") {
        let Ok(header) = serde_yaml_ng::from_str::<ManifestHeader>(document) else {
            continue;
        };
        if let (Some(kind), Some(ManifestMetadata { name: Some(name) })) =
            (header.kind, header.metadata)
        {
            refs.push(DeployedRef { kind, name });
        }
    }

    refs
}
