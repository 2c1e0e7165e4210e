//! Triggers
//!
//! A trigger paces the watcher's ticks and owns the informational
//! prompt shown whenever the loop re-arms.

use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, BufReader};

use crate::output::Output;

/// Governs the dev-loop tick cadence
#[async_trait]
pub trait Trigger: Send + Sync {
    /// Prints the prompt telling the developer the loop is observing
    fn watch_for_changes(&self, out: &Output);

    /// Resolves when the next poll should run
    async fn wait(&self);
}

/// Ticks on a fixed interval
pub struct PollTrigger {
    interval: Duration,
}

impl PollTrigger {
    pub fn new(interval: Duration) -> Self {
        Self { interval }
    }
}

#[async_trait]
impl Trigger for PollTrigger {
    fn watch_for_changes(&self, out: &Output) {
        out.write_line(&format!(
            "Watching for changes every {:?}...",
            self.interval
        ));
    }

    async fn wait(&self) {
        tokio::time::sleep(self.interval).await;
    }
}

/// Ticks when the developer presses enter
pub struct ManualTrigger {}

#[async_trait]
impl Trigger for ManualTrigger {
    fn watch_for_changes(&self, out: &Output) {
        out.write_line("Press enter to rebuild/redeploy the changes");
    }

    async fn wait(&self) {
        let mut line = String::new();
        let mut reader = BufReader::new(tokio::io::stdin());
        // EOF on stdin would spin; park until cancellation tears us down
        if reader.read_line(&mut line).await.unwrap_or(0) == 0 {
            std::future::pending::<()>().await;
        }
    }
}
