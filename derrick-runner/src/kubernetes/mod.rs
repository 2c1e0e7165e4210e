//! Kubernetes helpers
//!
//! Cluster-facing plumbing shared by the log aggregator, port forwarder
//! and syncer: context resolution and pod discovery, both via kubectl.

use anyhow::{Context, Result};
use serde_json::Value;
use tokio::process::Command;

mod image_list;
mod log;
mod port_forward;

pub use image_list::ImageList;
pub use log::{ColorPicker, LogAggregator};
pub use port_forward::PortForwarder;

/// Resolves the kubectl context the runner will talk to
pub fn current_context() -> Result<String> {
    crate::process::output_of(
        std::process::Command::new("kubectl").args(["config", "current-context"]),
        "kubectl config current-context",
    )
    .context("getting current cluster context")
}

/// A pod as seen by the watch-side helpers
#[derive(Debug, Clone)]
pub struct PodInfo {
    pub name: String,
    pub phase: String,
    pub images: Vec<String>,
    pub ports: Vec<u16>,
}

/// Lists pods in the target namespace
pub async fn list_pods(kube_context: &str, namespace: Option<&str>) -> Result<Vec<PodInfo>> {
    let mut cmd = Command::new("kubectl");
    cmd.arg("--context").arg(kube_context);
    if let Some(namespace) = namespace {
        cmd.arg("--namespace").arg(namespace);
    }
    cmd.args(["get", "pods", "--output", "json"]);
    cmd.stdin(std::process::Stdio::null());

    let output = cmd.output().await.context("running kubectl get pods")?;
    if !output.status.success() {
        anyhow::bail!(
            "kubectl get pods failed: {}",
            String::from_utf8_lossy(&output.stderr).trim()
        );
    }

    let parsed: Value =
        serde_json::from_slice(&output.stdout).context("parsing kubectl get pods output")?;

    let mut pods = Vec::new();
    for item in parsed["items"].as_array().unwrap_or(&Vec::new()) {
        let name = item["metadata"]["name"].as_str().unwrap_or_default();
        if name.is_empty() {
            continue;
        }

        let mut images = Vec::new();
        let mut ports = Vec::new();
        for container in item["spec"]["containers"].as_array().unwrap_or(&Vec::new()) {
            if let Some(image) = container["image"].as_str() {
                images.push(image.to_string());
            }
            for port in container["ports"].as_array().unwrap_or(&Vec::new()) {
                if let Some(number) = port["containerPort"].as_u64() {
                    ports.push(number as u16);
                }
            }
        }

        pods.push(PodInfo {
            name: name.to_string(),
            phase: item["status"]["phase"].as_str().unwrap_or_default().to_string(),
            images,
            ports,
        });
    }

    Ok(pods)
}
