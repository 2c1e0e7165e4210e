//! Watch events

use std::path::PathBuf;

/// Filesystem changes reported for one watch registration in one tick
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Events {
    pub added: Vec<PathBuf>,
    pub modified: Vec<PathBuf>,
    pub deleted: Vec<PathBuf>,
}

impl Events {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.modified.is_empty() && self.deleted.is_empty()
    }

    /// Paths whose content changed on disk (added or modified)
    pub fn changed(&self) -> impl Iterator<Item = &PathBuf> {
        self.added.iter().chain(self.modified.iter())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty() {
        assert!(Events::default().is_empty());

        let events = Events {
            modified: vec![PathBuf::from("main.rs")],
            ..Default::default()
        };
        assert!(!events.is_empty());
    }
}
