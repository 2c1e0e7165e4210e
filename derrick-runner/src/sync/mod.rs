//! In-place file sync
//!
//! When every changed file of a dirty artifact matches one of its sync
//! rules, the files can be copied straight into the running container
//! instead of rebuilding the image. The planner produces the copy/delete
//! plan; the syncer executes it against the cluster.

use std::path::{Path, PathBuf};

use anyhow::Result;
use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use derrick_core::build::BuildResult;
use derrick_core::config::Artifact;
use derrick_core::events::Events;

mod kubectl;

pub use kubectl::KubectlSyncer;

/// Files to copy into and delete from the containers running one image
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncItem {
    /// Fully qualified reference currently running in the cluster
    pub image: String,

    /// (local source, container destination) pairs
    pub copy: Vec<(PathBuf, PathBuf)>,

    /// Container paths to remove
    pub delete: Vec<PathBuf>,
}

impl SyncItem {
    pub fn file_count(&self) -> usize {
        self.copy.len() + self.delete.len()
    }
}

/// Pushes a sync item into the running containers
#[async_trait]
pub trait Syncer: Send + Sync {
    async fn sync(&self, cancel: &CancellationToken, item: &SyncItem) -> Result<()>;
}

/// Plans an in-place sync for one dirty artifact
///
/// Returns `None` when the changes require a rebuild instead: the
/// artifact has no sync rules, it has never been built, or some changed
/// path matches no rule.
pub fn new_item(artifact: &Artifact, events: &Events, builds: &[BuildResult]) -> Option<SyncItem> {
    if artifact.sync.is_empty() {
        return None;
    }

    // Without a known running tag there is no container to target.
    let build = builds.iter().find(|b| b.image_name == artifact.image_name)?;

    let mut item = SyncItem {
        image: build.tag.clone(),
        ..Default::default()
    };

    for path in events.changed() {
        let destination = destination_for(artifact, path)?;
        item.copy.push((path.clone(), destination));
    }
    for path in &events.deleted {
        let destination = destination_for(artifact, path)?;
        item.delete.push(destination);
    }

    Some(item)
}

/// Maps one changed file to its container destination, or `None` if no
/// rule matches it
fn destination_for(artifact: &Artifact, path: &Path) -> Option<PathBuf> {
    let relative = path.strip_prefix(&artifact.workspace).ok()?;

    for (pattern, destination) in &artifact.sync {
        let matcher = match glob::Pattern::new(pattern) {
            Ok(matcher) => matcher,
            Err(err) => {
                warn!("ignoring invalid sync pattern {pattern:?}: {err}");
                continue;
            }
        };

        if matcher.matches_path(relative) {
            return Some(Path::new(destination).join(relative));
        }
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn artifact_with_rules(rules: &[(&str, &str)]) -> Artifact {
        let mut artifact = Artifact::docker("example", "web");
        artifact.sync = rules
            .iter()
            .map(|(src, dst)| (src.to_string(), dst.to_string()))
            .collect::<BTreeMap<_, _>>();
        artifact
    }

    fn builds() -> Vec<BuildResult> {
        vec![BuildResult::new("example", "example:tag1")]
    }

    #[test]
    fn test_no_rules_means_rebuild() {
        let artifact = Artifact::docker("example", "web");
        let events = Events {
            modified: vec![PathBuf::from("web/index.html")],
            ..Default::default()
        };

        assert_eq!(new_item(&artifact, &events, &builds()), None);
    }

    #[test]
    fn test_unbuilt_artifact_means_rebuild() {
        let artifact = artifact_with_rules(&[("*.html", "/var/www")]);
        let events = Events {
            modified: vec![PathBuf::from("web/index.html")],
            ..Default::default()
        };

        assert_eq!(new_item(&artifact, &events, &[]), None);
    }

    #[test]
    fn test_matching_changes_sync() {
        let artifact = artifact_with_rules(&[("*.html", "/var/www")]);
        let events = Events {
            modified: vec![PathBuf::from("web/index.html")],
            deleted: vec![PathBuf::from("web/old.html")],
            ..Default::default()
        };

        let item = new_item(&artifact, &events, &builds()).unwrap();
        assert_eq!(item.image, "example:tag1");
        assert_eq!(
            item.copy,
            vec![(
                PathBuf::from("web/index.html"),
                PathBuf::from("/var/www/index.html")
            )]
        );
        assert_eq!(item.delete, vec![PathBuf::from("/var/www/old.html")]);
        assert_eq!(item.file_count(), 2);
    }

    #[test]
    fn test_unmatched_change_means_rebuild() {
        let artifact = artifact_with_rules(&[("*.html", "/var/www")]);
        let events = Events {
            modified: vec![
                PathBuf::from("web/index.html"),
                PathBuf::from("web/main.go"),
            ],
            ..Default::default()
        };

        assert_eq!(new_item(&artifact, &events, &builds()), None);
    }

    #[test]
    fn test_nested_paths_keep_structure() {
        let artifact = artifact_with_rules(&[("static/**", "/srv")]);
        let events = Events {
            added: vec![PathBuf::from("web/static/css/site.css")],
            ..Default::default()
        };

        let item = new_item(&artifact, &events, &builds()).unwrap();
        assert_eq!(
            item.copy,
            vec![(
                PathBuf::from("web/static/css/site.css"),
                PathBuf::from("/srv/static/css/site.css")
            )]
        );
    }
}
