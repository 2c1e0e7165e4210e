//! Notification decorator
//!
//! Rings the terminal bell when a deploy completes so the developer can
//! look away while the pipeline grinds.

use std::path::PathBuf;

use anyhow::Result;
use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use derrick_core::build::BuildResult;

use crate::deploy::{DeployedRef, Deployer};
use crate::output::Output;

pub(crate) struct WithNotifications {
    deployer: Box<dyn Deployer>,
}

impl WithNotifications {
    pub(crate) fn new(deployer: Box<dyn Deployer>) -> Self {
        Self { deployer }
    }
}

#[async_trait]
impl Deployer for WithNotifications {
    fn name(&self) -> &'static str {
        self.deployer.name()
    }

    async fn deploy(
        &self,
        cancel: &CancellationToken,
        out: &Output,
        builds: &[BuildResult],
    ) -> Result<Vec<DeployedRef>> {
        let result = self.deployer.deploy(cancel, out, builds).await;
        out.write_raw(b"\x07");
        result
    }

    fn dependencies(&self) -> Result<Vec<PathBuf>> {
        self.deployer.dependencies()
    }
}
