//! Timing decorators
//!
//! Wrap the builder, tester and deployer so every call reports its
//! elapsed wall time without the core knowing. Each wrapper implements
//! the same contract as what it wraps.

use std::path::PathBuf;
use std::time::Instant;

use anyhow::Result;
use async_trait::async_trait;
use colored::Colorize;
use tokio_util::sync::CancellationToken;

use derrick_core::build::BuildResult;
use derrick_core::config::Artifact;

use crate::build::{Builder, Tagger};
use crate::deploy::{DeployedRef, Deployer};
use crate::output::Output;
use crate::tester::Tester;

pub(crate) fn with_timings(
    builder: Box<dyn Builder>,
    tester: Box<dyn Tester>,
    deployer: Box<dyn Deployer>,
) -> (Box<dyn Builder>, Box<dyn Tester>, Box<dyn Deployer>) {
    (
        Box::new(TimedBuilder { inner: builder }),
        Box::new(TimedTester { inner: tester }),
        Box::new(TimedDeployer { inner: deployer }),
    )
}

fn report(out: &Output, what: &str, started: Instant) {
    let line = format!("{what} complete in {:.1?}", started.elapsed());
    out.write_line(&line.cyan().to_string());
}

struct TimedBuilder {
    inner: Box<dyn Builder>,
}

#[async_trait]
impl Builder for TimedBuilder {
    fn name(&self) -> &'static str {
        self.inner.name()
    }

    async fn build(
        &self,
        cancel: &CancellationToken,
        out: &Output,
        tagger: &dyn Tagger,
        artifacts: &[Artifact],
    ) -> Result<Vec<BuildResult>> {
        let started = Instant::now();
        let result = self.inner.build(cancel, out, tagger, artifacts).await;
        report(out, "Build", started);
        result
    }
}

struct TimedTester {
    inner: Box<dyn Tester>,
}

#[async_trait]
impl Tester for TimedTester {
    async fn test(
        &self,
        cancel: &CancellationToken,
        out: &Output,
        builds: &[BuildResult],
    ) -> Result<()> {
        let started = Instant::now();
        let result = self.inner.test(cancel, out, builds).await;
        report(out, "Test", started);
        result
    }

    fn test_dependencies(&self) -> Result<Vec<PathBuf>> {
        self.inner.test_dependencies()
    }
}

struct TimedDeployer {
    inner: Box<dyn Deployer>,
}

#[async_trait]
impl Deployer for TimedDeployer {
    fn name(&self) -> &'static str {
        self.inner.name()
    }

    async fn deploy(
        &self,
        cancel: &CancellationToken,
        out: &Output,
        builds: &[BuildResult],
    ) -> Result<Vec<DeployedRef>> {
        let started = Instant::now();
        let result = self.inner.deploy(cancel, out, builds).await;
        report(out, "Deploy", started);
        result
    }

    fn dependencies(&self) -> Result<Vec<PathBuf>> {
        self.inner.dependencies()
    }
}
