//! Label decorator
//!
//! Wraps a deployer so every resource it applies is stamped with a
//! consistent label set describing which builder, tagger and deployer
//! produced it. The label map is computed once at assembly time from the
//! already-constructed collaborators, so the decorator holds no
//! references back into the trio it describes.

use std::collections::BTreeMap;
use std::path::PathBuf;

use anyhow::Result;
use async_trait::async_trait;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use derrick_core::build::BuildResult;

use crate::output::Output;
use crate::process::capture_output;

use super::{DeployedRef, Deployer};

pub struct WithLabels {
    deployer: Box<dyn Deployer>,
    labels: BTreeMap<String, String>,
    kube_context: String,
    namespace: Option<String>,
}

impl WithLabels {
    pub fn new(
        deployer: Box<dyn Deployer>,
        labels: BTreeMap<String, String>,
        kube_context: &str,
        namespace: Option<&str>,
    ) -> Self {
        Self {
            deployer,
            labels,
            kube_context: kube_context.to_string(),
            namespace: namespace.map(String::from),
        }
    }

    async fn label_resource(&self, cancel: &CancellationToken, deployed: &DeployedRef) -> Result<()> {
        // helm releases are not addressable kubernetes objects
        if deployed.kind == "Release" {
            return Ok(());
        }

        let mut cmd = Command::new("kubectl");
        cmd.arg("--context").arg(&self.kube_context);
        if let Some(namespace) = &self.namespace {
            cmd.arg("--namespace").arg(namespace);
        }
        cmd.arg("label")
            .arg("--overwrite")
            .arg(format!("{}/{}", deployed.kind.to_lowercase(), deployed.name));
        for (key, value) in &self.labels {
            cmd.arg(format!("{key}={value}"));
        }

        capture_output(cancel, cmd, "kubectl label").await?;
        Ok(())
    }
}

#[async_trait]
impl Deployer for WithLabels {
    fn name(&self) -> &'static str {
        self.deployer.name()
    }

    async fn deploy(
        &self,
        cancel: &CancellationToken,
        out: &Output,
        builds: &[BuildResult],
    ) -> Result<Vec<DeployedRef>> {
        let refs = self.deployer.deploy(cancel, out, builds).await?;

        for deployed in &refs {
            if let Err(err) = self.label_resource(cancel, deployed).await {
                warn!(
                    "failed to label {}/{}: {err:#}",
                    deployed.kind, deployed.name
                );
            }
        }

        Ok(refs)
    }

    fn dependencies(&self) -> Result<Vec<PathBuf>> {
        self.deployer.dependencies()
    }
}
