//! Build results

use serde::{Deserialize, Serialize};

/// A successful build of one artifact
///
/// The image name is the artifact's stable identity; the tag is the
/// fully qualified reference (`name:tag`) produced by the tagger for
/// this particular build.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildResult {
    pub image_name: String,
    pub tag: String,
}

impl BuildResult {
    pub fn new(image_name: impl Into<String>, tag: impl Into<String>) -> Self {
        Self {
            image_name: image_name.into(),
            tag: tag.into(),
        }
    }
}
