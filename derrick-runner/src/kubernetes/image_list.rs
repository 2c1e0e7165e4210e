//! Deployed image list
//!
//! The set of image references the runner has deployed so far. The dev
//! loop adds tags after every build; the log aggregator and port
//! forwarder read it concurrently to decide which pods belong to the
//! pipeline, so access is internally synchronised.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

#[derive(Clone, Default)]
pub struct ImageList {
    inner: Arc<Mutex<HashSet<String>>>,
}

impl ImageList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, image: impl Into<String>) {
        self.inner.lock().unwrap().insert(image.into());
    }

    pub fn contains(&self, image: &str) -> bool {
        self.inner.lock().unwrap().contains(image)
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().unwrap().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shared_across_clones() {
        let list = ImageList::new();
        let clone = list.clone();

        list.add("example:tag1");

        assert!(clone.contains("example:tag1"));
        assert!(!clone.contains("example:tag2"));
    }
}
