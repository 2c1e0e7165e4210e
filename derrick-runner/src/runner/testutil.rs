//! Fake collaborators for runner tests
//!
//! Each fake records its calls and can be told to fail, which is all the
//! dev-loop scenarios need.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

use anyhow::Result;
use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use derrick_core::build::BuildResult;
use derrick_core::config::Artifact;

use crate::build::{Builder, Tagger};
use crate::deploy::{DeployedRef, Deployer};
use crate::output::Output;
use crate::sync::{SyncItem, Syncer};
use crate::tester::Tester;

/// Tags each batch `<image>:tag<n>` where n counts build calls
pub(crate) struct FakeBuilder {
    pub calls: Mutex<Vec<Vec<String>>>,
    pub fail: AtomicBool,
    counter: AtomicUsize,
}

impl FakeBuilder {
    pub fn new() -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            fail: AtomicBool::new(false),
            counter: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl Builder for FakeBuilder {
    fn name(&self) -> &'static str {
        "fake"
    }

    async fn build(
        &self,
        _cancel: &CancellationToken,
        _out: &Output,
        _tagger: &dyn Tagger,
        artifacts: &[Artifact],
    ) -> Result<Vec<BuildResult>> {
        if self.fail.load(Ordering::SeqCst) {
            anyhow::bail!("docker build exited with status 1");
        }

        let names: Vec<String> = artifacts.iter().map(|a| a.image_name.clone()).collect();
        self.calls.lock().unwrap().push(names.clone());

        let n = self.counter.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(names
            .into_iter()
            .map(|name| {
                let tag = format!("{name}:tag{n}");
                BuildResult::new(name, tag)
            })
            .collect())
    }
}

pub(crate) struct FakeTagger;

impl Tagger for FakeTagger {
    fn name(&self) -> &'static str {
        "fake"
    }

    fn generate_tag(&self, _workspace: &std::path::Path, image_name: &str) -> Result<String> {
        Ok(format!("{image_name}:fixed"))
    }
}

pub(crate) struct FakeTester {
    pub calls: Mutex<Vec<Vec<BuildResult>>>,
    pub fail: AtomicBool,
}

impl FakeTester {
    pub fn new() -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            fail: AtomicBool::new(false),
        }
    }
}

#[async_trait]
impl Tester for FakeTester {
    async fn test(
        &self,
        _cancel: &CancellationToken,
        _out: &Output,
        builds: &[BuildResult],
    ) -> Result<()> {
        self.calls.lock().unwrap().push(builds.to_vec());
        if self.fail.load(Ordering::SeqCst) {
            anyhow::bail!("test command exited with status 1");
        }
        Ok(())
    }

    fn test_dependencies(&self) -> Result<Vec<PathBuf>> {
        Ok(Vec::new())
    }
}

pub(crate) struct FakeDeployer {
    pub calls: Mutex<Vec<Vec<BuildResult>>>,
    pub fail: AtomicBool,
}

impl FakeDeployer {
    pub fn new() -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            fail: AtomicBool::new(false),
        }
    }
}

#[async_trait]
impl Deployer for FakeDeployer {
    fn name(&self) -> &'static str {
        "fake"
    }

    async fn deploy(
        &self,
        _cancel: &CancellationToken,
        _out: &Output,
        builds: &[BuildResult],
    ) -> Result<Vec<DeployedRef>> {
        self.calls.lock().unwrap().push(builds.to_vec());
        if self.fail.load(Ordering::SeqCst) {
            anyhow::bail!("kubectl apply exited with status 1");
        }
        Ok(Vec::new())
    }

    fn dependencies(&self) -> Result<Vec<PathBuf>> {
        Ok(Vec::new())
    }
}

pub(crate) struct FakeSyncer {
    pub synced: Mutex<Vec<SyncItem>>,
    pub fail: AtomicBool,
}

impl FakeSyncer {
    pub fn new() -> Self {
        Self {
            synced: Mutex::new(Vec::new()),
            fail: AtomicBool::new(false),
        }
    }
}

#[async_trait]
impl Syncer for FakeSyncer {
    async fn sync(&self, _cancel: &CancellationToken, item: &SyncItem) -> Result<()> {
        if self.fail.load(Ordering::SeqCst) {
            anyhow::bail!("no running pod found for {}", item.image);
        }
        self.synced.lock().unwrap().push(item.clone());
        Ok(())
    }
}
