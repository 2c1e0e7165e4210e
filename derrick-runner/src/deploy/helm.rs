//! helm deployer
//!
//! Applies each configured release with `helm upgrade --install`,
//! passing the release's fresh image reference as the `image` value.

use std::path::{Path, PathBuf};

use anyhow::Result;
use async_trait::async_trait;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;

use derrick_core::build::BuildResult;
use derrick_core::config::HelmDeploy;

use crate::output::Output;
use crate::process::run_streamed;

use super::{DeployedRef, Deployer};

pub struct HelmDeployer {
    cfg: HelmDeploy,
    kube_context: String,
    namespace: Option<String>,
    working_dir: PathBuf,
}

impl HelmDeployer {
    pub fn new(
        cfg: &HelmDeploy,
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
}

#[async_trait]
impl Deployer for HelmDeployer {
    fn name(&self) -> &'static str {
        "helm"
    }

    async fn deploy(
        &self,
        cancel: &CancellationToken,
        out: &Output,
        builds: &[BuildResult],
    ) -> Result<Vec<DeployedRef>> {
        let mut refs = Vec::with_capacity(self.cfg.releases.len());

        for release in &self.cfg.releases {
            let mut cmd = Command::new("helm");
            cmd.arg("upgrade")
                .arg("--install")
                .arg(&release.name)
                .arg(self.working_dir.join(&release.chart_path))
                .arg("--kube-context")
                .arg(&self.kube_context);
            if let Some(namespace) = &self.namespace {
                cmd.arg("--namespace").arg(namespace);
            }
            for file in &release.value_files {
                cmd.arg("-f").arg(self.working_dir.join(file));
            }
            for (key, value) in &release.set_values {
                cmd.arg("--set-string").arg(format!("{key}={value}"));
            }
            if let Some(image_name) = &release.image_name {
                if let Some(build) = builds.iter().find(|b| &b.image_name == image_name) {
                    cmd.arg("--set-string").arg(format!("image={}", build.tag));
                }
            }

            run_streamed(cancel, out, cmd, "helm upgrade").await?;

            refs.push(DeployedRef {
                kind: "Release".to_string(),
                name: release.name.clone(),
            });
        }

        Ok(refs)
    }

    fn dependencies(&self) -> Result<Vec<PathBuf>> {
        let mut paths = Vec::new();

        for release in &self.cfg.releases {
            let chart = self.working_dir.join(&release.chart_path);
            for entry in walkdir::WalkDir::new(&chart)
                .into_iter()
                .filter_map(|e| e.ok())
                .filter(|e| e.file_type().is_file())
            {
                paths.push(entry.into_path());
            }
            for file in &release.value_files {
                paths.push(self.working_dir.join(file));
            }
        }

        Ok(paths)
    }
}
