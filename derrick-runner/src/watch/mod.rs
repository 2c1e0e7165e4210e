//! File watching
//!
//! A polling watcher over an append-only set of registrations. Each
//! registration pairs a dependency lister (invoked on every poll) with
//! an event handler (invoked when any listed path changes). The watcher
//! calls the on-change callback once per tick in which at least one
//! handler fired; the trigger governs the tick cadence.

use std::collections::BTreeMap;
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::SystemTime;

use anyhow::Result;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use derrick_core::events::Events;

use crate::error::RunnerError;

mod trigger;

pub use trigger::{ManualTrigger, PollTrigger, Trigger};

/// Lists the paths a registration watches; polled every tick
pub type DepsLister = Box<dyn Fn() -> Result<Vec<PathBuf>> + Send>;

/// Receives the changes detected for one registration in one tick
pub type EventsHandler = Box<dyn FnMut(Events) + Send>;

#[derive(Clone, PartialEq, Eq)]
struct FileState {
    modified: SystemTime,
    size: u64,
}

struct Registration {
    lister: DepsLister,
    handler: EventsHandler,
    snapshot: BTreeMap<PathBuf, FileState>,
}

/// Polling file watcher
#[derive(Default)]
pub struct PollWatcher {
    registrations: Vec<Registration>,
}

impl PollWatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a registration; registrations cannot be removed within a run
    pub fn register(&mut self, lister: DepsLister, handler: EventsHandler) -> Result<()> {
        self.registrations.push(Registration {
            lister,
            handler,
            snapshot: BTreeMap::new(),
        });
        Ok(())
    }

    /// Watches until cancellation, dispatching `on_change` once per tick
    /// with at least one event
    ///
    /// Ticks are strictly serial: the next poll starts only after
    /// `on_change` returns. An error from `on_change` (the reload
    /// sentinel) ends the watch.
    pub async fn run<F, Fut>(
        mut self,
        cancel: &CancellationToken,
        trigger: Arc<dyn Trigger>,
        mut on_change: F,
    ) -> Result<(), RunnerError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<(), RunnerError>>,
    {
        // Baseline snapshots so the first tick only reports real changes.
        for registration in &mut self.registrations {
            registration.snapshot = take_snapshot(&registration.lister).unwrap_or_default();
        }

        loop {
            tokio::select! {
                _ = cancel.cancelled() => return Ok(()),
                _ = trigger.wait() => {}
            }

            let mut changed_any = false;
            for registration in &mut self.registrations {
                let next = match take_snapshot(&registration.lister) {
                    Ok(next) => next,
                    Err(err) => {
                        // keep the previous snapshot; a transient listing
                        // failure must not look like mass deletion
                        warn!("failed listing watched files: {err:#}");
                        continue;
                    }
                };
                let events = diff(&registration.snapshot, &next);
                registration.snapshot = next;

                if !events.is_empty() {
                    debug!(
                        "changes detected: {} added, {} modified, {} deleted",
                        events.added.len(),
                        events.modified.len(),
                        events.deleted.len()
                    );
                    (registration.handler)(events);
                    changed_any = true;
                }
            }

            if changed_any {
                on_change().await?;
            }
        }
    }
}

/// Captures the current state of every listed path that exists
///
/// The dependency resolver suppresses cancellation-time errors itself,
/// so an error here is a real listing failure.
fn take_snapshot(lister: &DepsLister) -> Result<BTreeMap<PathBuf, FileState>> {
    let paths = lister()?;

    let mut snapshot = BTreeMap::new();
    for path in paths {
        let Ok(metadata) = std::fs::metadata(&path) else {
            continue;
        };
        if !metadata.is_file() {
            continue;
        }
        let Ok(modified) = metadata.modified() else {
            continue;
        };
        snapshot.insert(
            path,
            FileState {
                modified,
                size: metadata.len(),
            },
        );
    }

    Ok(snapshot)
}

fn diff(old: &BTreeMap<PathBuf, FileState>, new: &BTreeMap<PathBuf, FileState>) -> Events {
    let mut events = Events::default();

    for (path, state) in new {
        match old.get(path) {
            None => events.added.push(path.clone()),
            Some(previous) if previous != state => events.modified.push(path.clone()),
            Some(_) => {}
        }
    }
    for path in old.keys() {
        if !new.contains_key(path) {
            events.deleted.push(path.clone());
        }
    }

    events
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::time::Duration;

    fn lister_for(paths: Vec<PathBuf>) -> DepsLister {
        Box::new(move || Ok(paths.clone()))
    }

    #[test]
    fn test_diff_classifies_changes() {
        let time = SystemTime::now();
        let state = |size| FileState {
            modified: time,
            size,
        };

        let old: BTreeMap<_, _> = [
            (PathBuf::from("kept"), state(1)),
            (PathBuf::from("grown"), state(1)),
            (PathBuf::from("gone"), state(1)),
        ]
        .into_iter()
        .collect();
        let new: BTreeMap<_, _> = [
            (PathBuf::from("kept"), state(1)),
            (PathBuf::from("grown"), state(2)),
            (PathBuf::from("fresh"), state(1)),
        ]
        .into_iter()
        .collect();

        let events = diff(&old, &new);
        assert_eq!(events.added, vec![PathBuf::from("fresh")]);
        assert_eq!(events.modified, vec![PathBuf::from("grown")]);
        assert_eq!(events.deleted, vec![PathBuf::from("gone")]);
    }

    #[tokio::test]
    async fn test_watcher_reports_modification() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("main.go");
        std::fs::write(&file, "package main").unwrap();

        let seen = Arc::new(Mutex::new(Vec::<Events>::new()));

        let mut watcher = PollWatcher::new();
        let handler_seen = Arc::clone(&seen);
        watcher
            .register(
                lister_for(vec![file.clone()]),
                Box::new(move |events| handler_seen.lock().unwrap().push(events)),
            )
            .unwrap();

        let cancel = CancellationToken::new();
        let trigger: Arc<dyn Trigger> = Arc::new(PollTrigger::new(Duration::from_millis(50)));

        let run_cancel = cancel.clone();
        let handle = tokio::spawn(async move {
            watcher
                .run(&run_cancel, trigger, || async { Ok(()) })
                .await
        });

        // Give the watcher time to baseline, then grow the file so the
        // change shows even on coarse mtime granularity.
        tokio::time::sleep(Duration::from_millis(150)).await;
        std::fs::write(&file, "package main // edited to a longer size").unwrap();
        tokio::time::sleep(Duration::from_millis(300)).await;

        cancel.cancel();
        handle.await.unwrap().unwrap();

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].modified, vec![file]);
    }

    #[tokio::test]
    async fn test_on_change_error_ends_the_watch() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("derrick.yaml");
        std::fs::write(&file, "apiVersion: derrick/v1").unwrap();

        let mut watcher = PollWatcher::new();
        watcher
            .register(lister_for(vec![file.clone()]), Box::new(|_| {}))
            .unwrap();

        let cancel = CancellationToken::new();
        let trigger: Arc<dyn Trigger> = Arc::new(PollTrigger::new(Duration::from_millis(50)));

        let run_cancel = cancel.clone();
        let handle = tokio::spawn(async move {
            watcher
                .run(&run_cancel, trigger, || async {
                    Err(RunnerError::ConfigurationChanged)
                })
                .await
        });

        tokio::time::sleep(Duration::from_millis(150)).await;
        std::fs::write(&file, "apiVersion: derrick/v1 # touched with more bytes").unwrap();

        let result = tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(result, Err(RunnerError::ConfigurationChanged)));
    }
}
