//! kubectl syncer
//!
//! Copies changed files into (and removes deleted files from) every pod
//! currently running the sync item's image.

use anyhow::{Context, Result};
use async_trait::async_trait;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::kubernetes::list_pods;
use crate::process::capture_output;

use super::{SyncItem, Syncer};

pub struct KubectlSyncer {
    kube_context: String,
    namespace: Option<String>,
}

impl KubectlSyncer {
    pub fn new(kube_context: &str, namespace: Option<&str>) -> Self {
        Self {
            kube_context: kube_context.to_string(),
            namespace: namespace.map(String::from),
        }
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
impl Syncer for KubectlSyncer {
    async fn sync(&self, cancel: &CancellationToken, item: &SyncItem) -> Result<()> {
        let pods = list_pods(&self.kube_context, self.namespace.as_deref())
            .await
            .context("listing pods to sync")?;

        let targets: Vec<_> = pods
            .iter()
            .filter(|pod| pod.phase == "Running" && pod.images.iter().any(|i| i == &item.image))
            .collect();
        if targets.is_empty() {
            anyhow::bail!("no running pod found for {}", item.image);
        }

        for pod in targets {
            debug!("syncing {} file(s) into pod {}", item.file_count(), pod.name);

            for (source, destination) in &item.copy {
                let mut cmd = self.kubectl();
                cmd.arg("cp")
                    .arg(source)
                    .arg(format!("{}:{}", pod.name, destination.display()));
                capture_output(cancel, cmd, "kubectl cp")
                    .await
                    .with_context(|| format!("copying {}", source.display()))?;
            }

            for destination in &item.delete {
                let mut cmd = self.kubectl();
                cmd.arg("exec")
                    .arg(&pod.name)
                    .arg("--")
                    .arg("rm")
                    .arg("-rf")
                    .arg(destination);
                capture_output(cancel, cmd, "kubectl exec rm")
                    .await
                    .with_context(|| format!("deleting {}", destination.display()))?;
            }
        }

        Ok(())
    }
}
