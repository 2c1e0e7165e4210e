//! Port forwarding
//!
//! Forwards the declared container ports of every pod running one of the
//! pipeline's images to the same port locally, for as long as the dev
//! session lasts.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Result;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::{list_pods, ImageList};
use crate::output::Output;

const POD_POLL_INTERVAL: Duration = Duration::from_secs(1);

pub struct PortForwarder {
    out: Output,
    images: ImageList,
    kube_context: String,
    namespace: Option<String>,
}

impl PortForwarder {
    pub fn new(
        out: Output,
        images: ImageList,
        kube_context: &str,
        namespace: Option<&str>,
    ) -> Self {
        Self {
            out,
            images,
            kube_context: kube_context.to_string(),
            namespace: namespace.map(String::from),
        }
    }

    /// Starts forwarding in the background until cancellation
    pub fn start(&self, cancel: &CancellationToken) -> Result<()> {
        let out = self.out.clone();
        let images = self.images.clone();
        let kube_context = self.kube_context.clone();
        let namespace = self.namespace.clone();
        let cancel = cancel.clone();

        tokio::spawn(async move {
            let forwarded = Arc::new(Mutex::new(HashSet::<(String, u16)>::new()));

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(POD_POLL_INTERVAL) => {}
                }

                let pods = match list_pods(&kube_context, namespace.as_deref()).await {
                    Ok(pods) => pods,
                    Err(err) => {
                        debug!("pod discovery failed: {err:#}");
                        continue;
                    }
                };

                for pod in pods {
                    if pod.phase != "Running" || !pod.images.iter().any(|i| images.contains(i)) {
                        continue;
                    }

                    for port in pod.ports.clone() {
                        let key = (pod.name.clone(), port);
                        if !forwarded.lock().unwrap().insert(key.clone()) {
                            continue;
                        }

                        out.write_line(&format!("Port forwarding pod/{} {}", pod.name, port));
                        forward(
                            cancel.clone(),
                            Arc::clone(&forwarded),
                            kube_context.clone(),
                            namespace.clone(),
                            key,
                        );
                    }
                }
            }
        });

        Ok(())
    }
}

fn forward(
    cancel: CancellationToken,
    forwarded: Arc<Mutex<HashSet<(String, u16)>>>,
    kube_context: String,
    namespace: Option<String>,
    key: (String, u16),
) {
    tokio::spawn(async move {
        let (pod, port) = &key;

        let mut cmd = Command::new("kubectl");
        cmd.arg("--context").arg(&kube_context);
        if let Some(namespace) = &namespace {
            cmd.arg("--namespace").arg(namespace);
        }
        cmd.arg("port-forward")
            .arg(format!("pod/{pod}"))
            .arg(format!("{port}:{port}"));
        cmd.stdout(std::process::Stdio::null())
            .stderr(std::process::Stdio::null())
            .stdin(std::process::Stdio::null());

        match cmd.spawn() {
            Ok(mut child) => {
                tokio::select! {
                    _ = cancel.cancelled() => { let _ = child.kill().await; }
                    _ = child.wait() => {}
                }
            }
            Err(err) => debug!("failed forwarding {pod}:{port}: {err:#}"),
        }

        // the pod may be replaced after a redeploy; allow re-forwarding
        forwarded.lock().unwrap().remove(&key);
    });
}
