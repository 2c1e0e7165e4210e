//! Per-tick change accumulation
//!
//! The change set lives for one watch tick. Watch handlers record what
//! changed; the on-change handler classifies the dirty artifacts and
//! takes the whole set by value, leaving a fresh empty one behind for
//! events that arrive while it works.

use derrick_core::config::Artifact;
use derrick_core::events::Events;

use crate::sync::SyncItem;

#[derive(Default)]
pub struct ChangeSet {
    /// Artifacts with source changes, in the order they were reported
    pub dirty_artifacts: Vec<(Artifact, Events)>,

    /// Classified: changes that can be pushed into running containers
    pub needs_resync: Vec<SyncItem>,

    /// Classified: artifacts whose image must be rebuilt
    pub needs_rebuild: Vec<Artifact>,

    /// Deploy or test configuration changed; re-apply without rebuilding
    pub needs_redeploy: bool,

    /// The pipeline file itself changed; exit so the caller can re-read it
    pub needs_reload: bool,
}

impl ChangeSet {
    pub fn add_dirty_artifact(&mut self, artifact: Artifact, events: Events) {
        self.dirty_artifacts.push((artifact, events));
    }

    pub fn is_empty(&self) -> bool {
        self.dirty_artifacts.is_empty()
            && self.needs_resync.is_empty()
            && self.needs_rebuild.is_empty()
            && !self.needs_redeploy
            && !self.needs_reload
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_starts_empty() {
        assert!(ChangeSet::default().is_empty());
    }

    #[test]
    fn test_take_leaves_an_empty_set() {
        let mut changed = ChangeSet::default();
        changed.add_dirty_artifact(Artifact::docker("example", "."), Events::default());
        changed.needs_redeploy = true;

        let taken = std::mem::take(&mut changed);

        assert!(!taken.is_empty());
        assert!(changed.is_empty());
    }
}
