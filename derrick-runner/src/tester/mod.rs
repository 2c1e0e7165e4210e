//! Testers
//!
//! A tester validates a batch of freshly built images before they are
//! deployed. The command tester runs each configured suite's shell
//! commands with `IMAGE` pointing at the suite's fresh reference.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use async_trait::async_trait;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use derrick_core::build::BuildResult;
use derrick_core::config::TestSuite;

use crate::output::Output;
use crate::process::run_streamed;

/// Runs tests against built images
#[async_trait]
pub trait Tester: Send + Sync {
    async fn test(
        &self,
        cancel: &CancellationToken,
        out: &Output,
        builds: &[BuildResult],
    ) -> Result<()>;

    /// Paths whose changes should re-apply the deployment
    fn test_dependencies(&self) -> Result<Vec<PathBuf>>;
}

/// Shell-command tester configured from the pipeline's test slot
pub struct CommandTester {
    suites: Vec<TestSuite>,
    root: PathBuf,
}

impl CommandTester {
    /// `root` is the pipeline file's directory; suite paths resolve
    /// against it.
    pub fn new(suites: &[TestSuite], root: &Path) -> Self {
        Self {
            suites: suites.to_vec(),
            root: root.to_path_buf(),
        }
    }
}

#[async_trait]
impl Tester for CommandTester {
    async fn test(
        &self,
        cancel: &CancellationToken,
        out: &Output,
        builds: &[BuildResult],
    ) -> Result<()> {
        for suite in &self.suites {
            // Only suites whose image is part of this batch run; a
            // partial rebuild does not re-test unchanged artifacts.
            let Some(build) = builds.iter().find(|b| b.image_name == suite.image) else {
                debug!("skipping test suite for {}: not in this batch", suite.image);
                continue;
            };

            for command in &suite.commands {
                let mut cmd = Command::new("sh");
                cmd.arg("-c")
                    .arg(command)
                    .env("IMAGE", &build.tag)
                    .current_dir(&self.root);

                run_streamed(cancel, out, cmd, "test command")
                    .await
                    .with_context(|| format!("testing {}: {command}", suite.image))?;
            }
        }

        Ok(())
    }

    fn test_dependencies(&self) -> Result<Vec<PathBuf>> {
        let mut paths = Vec::new();

        for suite in &self.suites {
            for pattern in &suite.paths {
                let full = self.root.join(pattern);
                let matches = glob::glob(&full.to_string_lossy())
                    .with_context(|| format!("bad test path pattern {pattern:?}"))?;
                for path in matches.filter_map(|m| m.ok()) {
                    paths.push(path);
                }
            }
        }

        Ok(paths)
    }
}
