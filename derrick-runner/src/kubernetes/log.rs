//! Log aggregation
//!
//! Tails the logs of every pod running one of the pipeline's images and
//! writes them, colour-prefixed per artifact, through the shared output
//! handle. While the dev loop is working the aggregator is muted: lines
//! are buffered and flushed on unmute so interactive prints are never
//! interleaved with pod output.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Result;
use colored::{Color, Colorize};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use derrick_core::config::Artifact;

use super::{list_pods, ImageList, PodInfo};
use crate::output::Output;

const POD_POLL_INTERVAL: Duration = Duration::from_secs(1);

const PALETTE: [Color; 6] = [
    Color::Blue,
    Color::Green,
    Color::Magenta,
    Color::Yellow,
    Color::Cyan,
    Color::Red,
];

/// Deterministic colour per artifact image name
pub struct ColorPicker {
    colors: HashMap<String, Color>,
}

impl ColorPicker {
    pub fn new(artifacts: &[Artifact]) -> Self {
        let colors = artifacts
            .iter()
            .enumerate()
            .map(|(i, a)| (a.image_name.clone(), PALETTE[i % PALETTE.len()]))
            .collect();
        Self { colors }
    }

    /// Picks the colour of the artifact whose image produced `image_ref`
    pub fn pick(&self, image_ref: &str) -> Color {
        self.colors
            .iter()
            .find(|(name, _)| image_ref.starts_with(name.as_str()))
            .map(|(_, color)| *color)
            .unwrap_or(Color::White)
    }
}

struct Inner {
    out: Output,
    images: ImageList,
    picker: ColorPicker,
    kube_context: String,
    namespace: Option<String>,
    muted: AtomicBool,
    buffer: Mutex<Vec<String>>,
    tracked: Mutex<HashSet<String>>,
    stop: CancellationToken,
}

impl Inner {
    fn emit(&self, line: String) {
        if self.muted.load(Ordering::SeqCst) {
            self.buffer.lock().unwrap().push(line);
        } else {
            self.out.write_line(&line);
        }
    }
}

/// Streams pod logs for the images in the image list
#[derive(Clone)]
pub struct LogAggregator {
    inner: Arc<Inner>,
}

impl LogAggregator {
    pub fn new(
        out: Output,
        images: ImageList,
        picker: ColorPicker,
        kube_context: &str,
        namespace: Option<&str>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                out,
                images,
                picker,
                kube_context: kube_context.to_string(),
                namespace: namespace.map(String::from),
                muted: AtomicBool::new(false),
                buffer: Mutex::new(Vec::new()),
                tracked: Mutex::new(HashSet::new()),
                stop: CancellationToken::new(),
            }),
        }
    }

    /// Starts watching pods in the background; the spawned work runs
    /// until the cancellation handle fires or `stop` is called
    pub fn start(&self, cancel: &CancellationToken) -> Result<()> {
        let inner = Arc::clone(&self.inner);
        let cancel = cancel.clone();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = inner.stop.cancelled() => break,
                    _ = tokio::time::sleep(POD_POLL_INTERVAL) => {}
                }

                let pods = match list_pods(&inner.kube_context, inner.namespace.as_deref()).await {
                    Ok(pods) => pods,
                    Err(err) => {
                        debug!("pod discovery failed: {err:#}");
                        continue;
                    }
                };

                for pod in pods {
                    if pod.phase != "Running" {
                        continue;
                    }
                    let Some(image) = pod.images.iter().find(|i| inner.images.contains(i.as_str()))
                    else {
                        continue;
                    };
                    if !inner.tracked.lock().unwrap().insert(pod.name.clone()) {
                        continue;
                    }

                    tail_pod(Arc::clone(&inner), cancel.clone(), pod.clone(), image.clone());
                }
            }
        });

        Ok(())
    }

    /// Holds pod output back until `unmute`
    pub fn mute(&self) {
        self.inner.muted.store(true, Ordering::SeqCst);
    }

    /// Resumes output, flushing everything buffered while muted
    pub fn unmute(&self) {
        self.inner.muted.store(false, Ordering::SeqCst);
        let buffered: Vec<String> = std::mem::take(&mut *self.inner.buffer.lock().unwrap());
        for line in buffered {
            self.inner.out.write_line(&line);
        }
    }

    /// Stops the aggregator for good; buffered output is discarded
    pub fn stop(&self) {
        self.inner.stop.cancel();
    }
}

fn tail_pod(inner: Arc<Inner>, cancel: CancellationToken, pod: PodInfo, image: String) {
    tokio::spawn(async move {
        let color = inner.picker.pick(&image);
        let prefix = format!("[{}]", pod.name).color(color).to_string();

        let mut cmd = Command::new("kubectl");
        cmd.arg("--context").arg(&inner.kube_context);
        if let Some(namespace) = &inner.namespace {
            cmd.arg("--namespace").arg(namespace);
        }
        cmd.args(["logs", "--follow", &pod.name]);
        cmd.stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::null())
            .stdin(std::process::Stdio::null());

        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(err) => {
                debug!("failed tailing pod {}: {err:#}", pod.name);
                inner.tracked.lock().unwrap().remove(&pod.name);
                return;
            }
        };

        if let Some(stdout) = child.stdout.take() {
            let mut lines = BufReader::new(stdout).lines();
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = inner.stop.cancelled() => break,
                    line = lines.next_line() => match line {
                        Ok(Some(line)) => inner.emit(format!("{prefix} {line}")),
                        _ => break,
                    }
                }
            }
        }

        let _ = child.kill().await;
        // the pod may come back under a new tag; allow re-tailing
        inner.tracked.lock().unwrap().remove(&pod.name);
    });
}
