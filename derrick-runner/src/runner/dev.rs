//! Dev loop
//!
//! The watch-driven state machine. After one full pipeline run the
//! watcher takes over; each tick classifies what changed and performs
//! the minimal action restoring the cluster: nothing, an in-place file
//! sync, a rebuild of the dirty subset, or a redeploy. Only an edit to
//! the pipeline file itself ends the loop, via the reload sentinel —
//! every operational failure is a warning and the loop survives to the
//! next tick.

use std::sync::{Arc, Mutex};

use anyhow::Context;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use derrick_core::build::BuildResult;
use derrick_core::config::Artifact;

use crate::build::{Builder, Tagger};
use crate::deploy::Deployer;
use crate::error::RunnerError;
use crate::kubernetes::{ColorPicker, ImageList, LogAggregator, PortForwarder};
use crate::output::Output;
use crate::sync::{self, Syncer};
use crate::tester::Tester;
use crate::watch::{PollWatcher, Trigger};

use super::changes::ChangeSet;
use super::dependencies::dependencies_for_artifact;
use super::{merge_with_previous_builds, Runner};

impl Runner {
    /// Watches for changes and re-runs the minimal pipeline until
    /// interrupted
    ///
    /// Returns `RunnerError::ConfigurationChanged` when the pipeline
    /// file itself was edited; the caller should re-read it and re-enter
    /// dev mode.
    pub async fn dev(
        &self,
        cancel: &CancellationToken,
        out: &Output,
        artifacts: &[Artifact],
    ) -> Result<(), RunnerError> {
        let image_list = ImageList::new();
        let logger = LogAggregator::new(
            out.clone(),
            image_list.clone(),
            ColorPicker::new(artifacts),
            &self.kube_context,
            self.options.namespace.as_deref(),
        );

        let changed = Arc::new(Mutex::new(ChangeSet::default()));
        let mut watcher = PollWatcher::new();

        for artifact in artifacts {
            if !should_watch(&self.options.watch, artifact) {
                continue;
            }

            let lister_cancel = cancel.clone();
            let lister_artifact = artifact.clone();
            let handler_artifact = artifact.clone();
            let handler_changed = Arc::clone(&changed);
            watcher
                .register(
                    Box::new(move || {
                        dependencies_for_artifact(&lister_cancel, &lister_artifact)
                    }),
                    Box::new(move |events| {
                        handler_changed
                            .lock()
                            .unwrap()
                            .add_dirty_artifact(handler_artifact.clone(), events);
                    }),
                )
                .with_context(|| {
                    format!("watching files for artifact {}", artifact.image_name)
                })?;
        }

        let tester = Arc::clone(&self.tester);
        let redeploy_changed = Arc::clone(&changed);
        watcher
            .register(
                Box::new(move || tester.test_dependencies()),
                Box::new(move |_| redeploy_changed.lock().unwrap().needs_redeploy = true),
            )
            .context("watching test files")?;

        let deployer = Arc::clone(&self.deployer);
        let redeploy_changed = Arc::clone(&changed);
        watcher
            .register(
                Box::new(move || deployer.dependencies()),
                Box::new(move |_| redeploy_changed.lock().unwrap().needs_redeploy = true),
            )
            .context("watching files for deployer")?;

        let config_file = self.options.config_file.clone();
        let reload_changed = Arc::clone(&changed);
        watcher
            .register(
                Box::new(move || Ok(vec![config_file.clone()])),
                Box::new(move |_| reload_changed.lock().unwrap().needs_reload = true),
            )
            .context("watching pipeline configuration")?;

        // First run: reach a steady state before observing changes.
        let first = match self
            .builder
            .build(cancel, out, self.tagger.as_ref(), artifacts)
            .await
        {
            Ok(builds) => builds,
            Err(err) => {
                if cancel.is_cancelled() {
                    return Ok(());
                }
                return Err(RunnerError::Build(
                    err.context("exiting dev mode because the first build failed"),
                ));
            }
        };
        for build in &first {
            image_list.add(build.tag.clone());
        }
        self.update_builds(&first);

        if let Err(err) = self.tester.test(cancel, out, &first).await {
            if cancel.is_cancelled() {
                return Ok(());
            }
            return Err(RunnerError::Test(
                err.context("exiting dev mode because the first test run failed"),
            ));
        }

        let all = self.builds.lock().unwrap().clone();
        if let Err(err) = self.deployer.deploy(cancel, out, &all).await {
            if cancel.is_cancelled() {
                return Ok(());
            }
            return Err(RunnerError::Deploy(
                err.context("exiting dev mode because the first deploy failed"),
            ));
        }

        if self.options.tail_dev {
            logger.start(cancel)?;
        }
        if self.options.port_forward {
            let forwarder = PortForwarder::new(
                out.clone(),
                image_list.clone(),
                &self.kube_context,
                self.options.namespace.as_deref(),
            );
            forwarder.start(cancel)?;
        }

        self.trigger.watch_for_changes(out);

        let dev_loop = Arc::new(DevLoop {
            builder: Arc::clone(&self.builder),
            tester: Arc::clone(&self.tester),
            deployer: Arc::clone(&self.deployer),
            tagger: Arc::clone(&self.tagger),
            syncer: Arc::clone(&self.syncer),
            trigger: Arc::clone(&self.trigger),
            builds: Arc::clone(&self.builds),
            changed,
            image_list,
            logger,
            out: out.clone(),
            cancel: cancel.clone(),
        });

        watcher
            .run(cancel, Arc::clone(&self.trigger), move || {
                let dev_loop = Arc::clone(&dev_loop);
                async move { dev_loop.on_change().await }
            })
            .await
    }
}

/// An artifact is watched iff its image name contains any filter
/// substring; an empty filter watches everything
fn should_watch(filter: &[String], artifact: &Artifact) -> bool {
    filter.is_empty()
        || filter
            .iter()
            .any(|expression| artifact.image_name.contains(expression.as_str()))
}

/// Everything one tick of the dev loop needs, shared with the watcher's
/// on-change callback
struct DevLoop {
    builder: Arc<dyn Builder>,
    tester: Arc<dyn Tester>,
    deployer: Arc<dyn Deployer>,
    tagger: Arc<dyn Tagger>,
    syncer: Arc<dyn Syncer>,
    trigger: Arc<dyn Trigger>,
    builds: Arc<Mutex<Vec<BuildResult>>>,
    changed: Arc<Mutex<ChangeSet>>,
    image_list: ImageList,
    logger: LogAggregator,
    out: Output,
    cancel: CancellationToken,
}

impl DevLoop {
    /// One tick: classify, act, re-arm
    ///
    /// Log output is muted for the duration and unmuted on every exit
    /// except reload, which stops the logs for good. The trigger is
    /// re-armed on every exit, success or failure.
    async fn on_change(&self) -> Result<(), RunnerError> {
        if self.cancel.is_cancelled() {
            return Ok(());
        }

        self.logger.mute();
        let result = self.handle_changes().await;
        if !matches!(result, Err(RunnerError::ConfigurationChanged)) {
            self.logger.unmute();
        }
        self.trigger.watch_for_changes(&self.out);

        result
    }

    async fn handle_changes(&self) -> Result<(), RunnerError> {
        // Taking the set by value resets it; events recorded while this
        // tick works accumulate into the fresh one.
        let mut changed = std::mem::take(&mut *self.changed.lock().unwrap());
        let current_builds = self.builds.lock().unwrap().clone();

        // Phase A: classify each dirty artifact as syncable or not.
        let dirty: Vec<_> = changed.dirty_artifacts.drain(..).collect();
        for (artifact, events) in dirty {
            match sync::new_item(&artifact, &events, &current_builds) {
                Some(item) => changed.needs_resync.push(item),
                None => changed.needs_rebuild.push(artifact),
            }
        }

        // Phase B: exactly one branch, in priority order.
        if changed.needs_reload {
            self.logger.stop();
            return Err(RunnerError::ConfigurationChanged);
        }

        if !changed.needs_resync.is_empty() {
            for item in &changed.needs_resync {
                self.out.write_line(&format!(
                    "Syncing {} files for {}",
                    item.file_count(),
                    item.image
                ));

                if let Err(err) = self.syncer.sync(&self.cancel, item).await {
                    warn!("Skipping deploy due to sync error: {err:#}");
                    return Ok(());
                }
            }
        } else if !changed.needs_rebuild.is_empty() {
            let batch = match self
                .builder
                .build(&self.cancel, &self.out, self.tagger.as_ref(), &changed.needs_rebuild)
                .await
            {
                Ok(batch) => batch,
                Err(err) => {
                    warn!("Skipping deploy due to build error: {err:#}");
                    return Ok(());
                }
            };

            for build in &batch {
                self.image_list.add(build.tag.clone());
            }
            {
                let mut builds = self.builds.lock().unwrap();
                let merged = merge_with_previous_builds(&batch, &builds);
                *builds = merged;
            }

            if let Err(err) = self.tester.test(&self.cancel, &self.out, &batch).await {
                warn!("Skipping deploy due to failed tests: {err:#}");
                return Ok(());
            }

            // Deploy the whole registry so previously built but
            // unchanged artifacts stay in the manifest set.
            let all = self.builds.lock().unwrap().clone();
            if let Err(err) = self.deployer.deploy(&self.cancel, &self.out, &all).await {
                warn!("Skipping deploy due to error: {err:#}");
                return Ok(());
            }
        } else if changed.needs_redeploy {
            let all = self.builds.lock().unwrap().clone();
            if let Err(err) = self.deployer.deploy(&self.cancel, &self.out, &all).await {
                warn!("Skipping deploy due to error: {err:#}");
                return Ok(());
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::output::capture::{captured_output, Captured};
    use crate::runner::testutil::*;
    use crate::watch::PollTrigger;
    use derrick_core::events::Events;
    use derrick_core::options::Options;
    use std::path::PathBuf;
    use std::sync::atomic::Ordering;
    use std::time::Duration;

    struct Fixture {
        dev: DevLoop,
        builder: Arc<FakeBuilder>,
        tester: Arc<FakeTester>,
        deployer: Arc<FakeDeployer>,
        syncer: Arc<FakeSyncer>,
        captured: Captured,
    }

    fn fixture() -> Fixture {
        let (out, captured) = captured_output();
        let builder = Arc::new(FakeBuilder::new());
        let tester = Arc::new(FakeTester::new());
        let deployer = Arc::new(FakeDeployer::new());
        let syncer = Arc::new(FakeSyncer::new());
        let image_list = ImageList::new();

        let dev = DevLoop {
            builder: Arc::clone(&builder) as Arc<dyn Builder>,
            tester: Arc::clone(&tester) as Arc<dyn Tester>,
            deployer: Arc::clone(&deployer) as Arc<dyn Deployer>,
            tagger: Arc::new(FakeTagger),
            syncer: Arc::clone(&syncer) as Arc<dyn Syncer>,
            trigger: Arc::new(PollTrigger::new(Duration::from_millis(10))),
            builds: Arc::new(Mutex::new(Vec::new())),
            changed: Arc::new(Mutex::new(ChangeSet::default())),
            image_list: image_list.clone(),
            logger: LogAggregator::new(
                out.clone(),
                image_list,
                ColorPicker::new(&[]),
                "test-context",
                None,
            ),
            out,
            cancel: CancellationToken::new(),
        };

        Fixture {
            dev,
            builder,
            tester,
            deployer,
            syncer,
            captured,
        }
    }

    fn edit(path: &str) -> Events {
        Events {
            modified: vec![PathBuf::from(path)],
            ..Default::default()
        }
    }

    fn build(name: &str, tag: &str) -> BuildResult {
        BuildResult::new(name, format!("{name}:{tag}"))
    }

    fn mark_dirty(fixture: &Fixture, artifact: &Artifact, path: &str) {
        fixture
            .dev
            .changed
            .lock()
            .unwrap()
            .add_dirty_artifact(artifact.clone(), edit(path));
    }

    #[test]
    fn test_should_watch_filter() {
        let artifact = Artifact::docker("image1", ".");

        assert!(should_watch(&[], &artifact));
        assert!(should_watch(&["img".to_string()], &artifact));
        assert!(should_watch(
            &["other".to_string(), "image1".to_string()],
            &artifact
        ));
        assert!(!should_watch(&["other".to_string()], &artifact));
    }

    #[tokio::test]
    async fn test_rebuild_tick_updates_the_registry() {
        let fixture = fixture();
        let artifact = Artifact::docker("example", ".");

        mark_dirty(&fixture, &artifact, "main.go");
        fixture.dev.on_change().await.unwrap();
        assert_eq!(*fixture.dev.builds.lock().unwrap(), vec![build("example", "tag1")]);

        mark_dirty(&fixture, &artifact, "main.go");
        fixture.dev.on_change().await.unwrap();

        assert_eq!(
            *fixture.builder.calls.lock().unwrap(),
            vec![vec!["example"], vec!["example"]]
        );
        assert_eq!(
            fixture.tester.calls.lock().unwrap().last().unwrap(),
            &vec![build("example", "tag2")]
        );
        assert_eq!(
            fixture.deployer.calls.lock().unwrap().last().unwrap(),
            &vec![build("example", "tag2")]
        );
        assert_eq!(*fixture.dev.builds.lock().unwrap(), vec![build("example", "tag2")]);
        assert!(fixture.dev.image_list.contains("example:tag2"));
    }

    #[tokio::test]
    async fn test_partial_rebuild_deploys_the_full_registry() {
        let fixture = fixture();
        let image1 = Artifact::docker("image1", ".");
        let image2 = Artifact::docker("image2", ".");

        mark_dirty(&fixture, &image1, "one/main.go");
        mark_dirty(&fixture, &image2, "two/main.go");
        fixture.dev.on_change().await.unwrap();

        mark_dirty(&fixture, &image2, "two/main.go");
        fixture.dev.on_change().await.unwrap();

        assert_eq!(
            fixture.builder.calls.lock().unwrap().last().unwrap(),
            &vec!["image2"]
        );
        // Fresh build first, surviving previous entry after.
        assert_eq!(
            fixture.deployer.calls.lock().unwrap().last().unwrap(),
            &vec![build("image2", "tag2"), build("image1", "tag1")]
        );
    }

    #[tokio::test]
    async fn test_reload_wins_and_skips_the_pipeline() {
        let fixture = fixture();
        let artifact = Artifact::docker("example", ".");

        mark_dirty(&fixture, &artifact, "main.go");
        fixture.dev.changed.lock().unwrap().needs_reload = true;

        let err = fixture.dev.on_change().await.unwrap_err();

        assert!(err.is_configuration_changed());
        assert!(fixture.builder.calls.lock().unwrap().is_empty());
        assert!(fixture.tester.calls.lock().unwrap().is_empty());
        assert!(fixture.deployer.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_build_failure_keeps_the_loop_alive() {
        let fixture = fixture();
        let artifact = Artifact::docker("example", ".");

        fixture.builder.fail.store(true, Ordering::SeqCst);
        mark_dirty(&fixture, &artifact, "main.go");
        fixture.dev.on_change().await.unwrap();

        assert!(fixture.tester.calls.lock().unwrap().is_empty());
        assert!(fixture.deployer.calls.lock().unwrap().is_empty());
        assert!(fixture.dev.changed.lock().unwrap().is_empty());
        assert!(fixture.captured.contents().contains("Watching for changes"));

        // The next edit after a fix rebuilds normally.
        fixture.builder.fail.store(false, Ordering::SeqCst);
        mark_dirty(&fixture, &artifact, "main.go");
        fixture.dev.on_change().await.unwrap();

        assert_eq!(*fixture.dev.builds.lock().unwrap(), vec![build("example", "tag1")]);
        assert_eq!(fixture.deployer.calls.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_test_failure_skips_deploy_but_keeps_registry() {
        let fixture = fixture();
        let artifact = Artifact::docker("example", ".");

        fixture.tester.fail.store(true, Ordering::SeqCst);
        mark_dirty(&fixture, &artifact, "main.go");
        fixture.dev.on_change().await.unwrap();

        assert!(fixture.deployer.calls.lock().unwrap().is_empty());
        assert_eq!(*fixture.dev.builds.lock().unwrap(), vec![build("example", "tag1")]);
    }

    #[tokio::test]
    async fn test_matching_changes_sync_instead_of_rebuilding() {
        let fixture = fixture();
        let mut artifact = Artifact::docker("example", "web");
        artifact.sync.insert("*.html".to_string(), "/var/www".to_string());

        *fixture.dev.builds.lock().unwrap() = vec![build("example", "tag1")];
        mark_dirty(&fixture, &artifact, "web/index.html");
        fixture.dev.on_change().await.unwrap();

        assert!(fixture.builder.calls.lock().unwrap().is_empty());
        let synced = fixture.syncer.synced.lock().unwrap();
        assert_eq!(synced.len(), 1);
        assert_eq!(synced[0].image, "example:tag1");
        assert!(fixture
            .captured
            .contents()
            .contains("Syncing 1 files for example:tag1"));
    }

    #[tokio::test]
    async fn test_sync_error_is_swallowed() {
        let fixture = fixture();
        let mut artifact = Artifact::docker("example", "web");
        artifact.sync.insert("*.html".to_string(), "/var/www".to_string());

        *fixture.dev.builds.lock().unwrap() = vec![build("example", "tag1")];
        fixture.syncer.fail.store(true, Ordering::SeqCst);
        mark_dirty(&fixture, &artifact, "web/index.html");

        fixture.dev.on_change().await.unwrap();

        assert!(fixture.deployer.calls.lock().unwrap().is_empty());
        assert!(fixture.captured.contents().contains("Watching for changes"));
    }

    #[tokio::test]
    async fn test_resync_takes_priority_over_rebuild() {
        let fixture = fixture();
        let mut syncable = Artifact::docker("example", "web");
        syncable.sync.insert("*.html".to_string(), "/var/www".to_string());
        let plain = Artifact::docker("other", ".");

        *fixture.dev.builds.lock().unwrap() = vec![build("example", "tag1")];
        mark_dirty(&fixture, &syncable, "web/index.html");
        mark_dirty(&fixture, &plain, "main.go");

        fixture.dev.on_change().await.unwrap();

        assert_eq!(fixture.syncer.synced.lock().unwrap().len(), 1);
        assert!(fixture.builder.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_redeploy_reapplies_the_registry_without_building() {
        let fixture = fixture();

        *fixture.dev.builds.lock().unwrap() =
            vec![build("image1", "tag1"), build("image2", "tag1")];
        fixture.dev.changed.lock().unwrap().needs_redeploy = true;

        fixture.dev.on_change().await.unwrap();

        assert!(fixture.builder.calls.lock().unwrap().is_empty());
        assert_eq!(
            *fixture.deployer.calls.lock().unwrap(),
            vec![vec![build("image1", "tag1"), build("image2", "tag1")]]
        );
    }

    #[tokio::test]
    async fn test_redeploy_error_is_swallowed() {
        let fixture = fixture();

        *fixture.dev.builds.lock().unwrap() = vec![build("image1", "tag1")];
        fixture.deployer.fail.store(true, Ordering::SeqCst);
        fixture.dev.changed.lock().unwrap().needs_redeploy = true;

        fixture.dev.on_change().await.unwrap();
        assert!(fixture.dev.changed.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_noop_tick_touches_nothing() {
        let fixture = fixture();

        fixture.dev.on_change().await.unwrap();

        assert!(fixture.builder.calls.lock().unwrap().is_empty());
        assert!(fixture.deployer.calls.lock().unwrap().is_empty());
        assert!(fixture.captured.contents().contains("Watching for changes"));
    }

    fn dev_runner(
        options: Options,
    ) -> (Runner, Arc<FakeBuilder>, Arc<FakeTester>, Arc<FakeDeployer>) {
        let builder = Arc::new(FakeBuilder::new());
        let tester = Arc::new(FakeTester::new());
        let deployer = Arc::new(FakeDeployer::new());

        let runner = Runner::from_parts(
            Arc::clone(&builder) as Arc<dyn Builder>,
            Arc::clone(&tester) as Arc<dyn Tester>,
            Arc::clone(&deployer) as Arc<dyn Deployer>,
            Arc::new(FakeTagger),
            Arc::new(FakeSyncer::new()),
            Arc::new(PollTrigger::new(Duration::from_millis(50))),
            options,
        );

        (runner, builder, tester, deployer)
    }

    #[tokio::test]
    async fn test_dev_returns_the_sentinel_when_the_pipeline_file_changes() {
        let dir = tempfile::tempdir().unwrap();
        let config_file = dir.path().join("derrick.yaml");
        std::fs::write(&config_file, "apiVersion: derrick/v1").unwrap();

        let workspace = dir.path().join("web");
        std::fs::create_dir(&workspace).unwrap();
        std::fs::write(workspace.join("Dockerfile"), "FROM scratch").unwrap();

        let options = Options {
            config_file: config_file.clone(),
            tail_dev: false,
            watch_poll_interval: Duration::from_millis(50),
            ..Options::default()
        };
        let (runner, _builder, _tester, deployer) = dev_runner(options);
        let artifacts = vec![Artifact::docker("example", &workspace)];

        let (out, _captured) = captured_output();
        let cancel = CancellationToken::new();
        let run_cancel = cancel.clone();
        let handle = tokio::spawn(async move {
            runner.dev(&run_cancel, &out, &artifacts).await
        });

        // Let the first run and the baseline snapshot happen, then edit
        // the pipeline file.
        tokio::time::sleep(Duration::from_millis(300)).await;
        std::fs::write(&config_file, "apiVersion: derrick/v1 # edited with more bytes").unwrap();

        let result = tokio::time::timeout(Duration::from_secs(10), handle)
            .await
            .expect("dev loop should return after the config edit")
            .unwrap();

        assert!(matches!(result, Err(RunnerError::ConfigurationChanged)));
        // The first run deployed once before the reload.
        assert_eq!(deployer.calls.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_dev_first_build_failure_aborts() {
        let dir = tempfile::tempdir().unwrap();
        let config_file = dir.path().join("derrick.yaml");
        std::fs::write(&config_file, "apiVersion: derrick/v1").unwrap();

        let options = Options {
            config_file,
            tail_dev: false,
            ..Options::default()
        };
        let (runner, builder, tester, _deployer) = dev_runner(options);
        builder.fail.store(true, Ordering::SeqCst);

        let (out, _captured) = captured_output();
        let err = runner
            .dev(&CancellationToken::new(), &out, &[])
            .await
            .unwrap_err();

        assert!(format!("{err:#}").contains("exiting dev mode because the first build failed"));
        assert!(tester.calls.lock().unwrap().is_empty());
    }
}
