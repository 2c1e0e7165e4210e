//! Deployers
//!
//! A deployer applies a complete batch of build results to the cluster.
//! Exactly one variant is selected from the pipeline's deploy config:
//! raw manifests through kubectl, templated releases through helm, or an
//! overlay through kustomize. Re-applying the same batch is a no-op on
//! cluster state; the dev loop relies on that for redeploys.

use std::path::PathBuf;

use anyhow::Result;
use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use derrick_core::build::BuildResult;

use crate::output::Output;

mod helm;
mod kubectl;
mod kustomize;
mod labels;

pub use helm::HelmDeployer;
pub use kubectl::KubectlDeployer;
pub use kustomize::KustomizeDeployer;
pub use labels::WithLabels;

/// A resource the deployer created or updated
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeployedRef {
    pub kind: String,
    pub name: String,
}

/// Applies built images to the cluster
#[async_trait]
pub trait Deployer: Send + Sync {
    /// Short name used in logs and resource labels
    fn name(&self) -> &'static str;

    /// `builds` always contains one entry per configured artifact, not
    /// just the ones rebuilt this tick.
    async fn deploy(
        &self,
        cancel: &CancellationToken,
        out: &Output,
        builds: &[BuildResult],
    ) -> Result<Vec<DeployedRef>>;

    /// Configuration files whose changes require a redeploy
    fn dependencies(&self) -> Result<Vec<PathBuf>>;
}

/// Rewrites image references in rendered manifests to the fresh tags
///
/// Lines of the form `image: <name>` or `image: <name>:<old-tag>` are
/// pointed at the build result for `<name>`; everything else passes
/// through untouched.
pub(crate) fn replace_images(manifests: &str, builds: &[BuildResult]) -> String {
    let mut rewritten = String::with_capacity(manifests.len());

    for line in manifests.lines() {
        rewritten.push_str(&rewrite_line(line, builds));
        rewritten.push('\n');
    }

    rewritten
}

fn rewrite_line(line: &str, builds: &[BuildResult]) -> String {
    let Some(colon) = line.find(':') else {
        return line.to_string();
    };
    let (key, value) = line.split_at(colon);
    let field = key.trim_start();
    if field != "image" && field != "- image" {
        return line.to_string();
    }

    let current = value[1..].trim().trim_matches('"').trim_matches('\'');
    let current_name = match current.rsplit_once(':') {
        // a colon introducing a tag, not a registry port
        Some((name, tag)) if !tag.contains('/') => name,
        _ => current,
    };

    for build in builds {
        if build.image_name == current_name {
            return format!("{key}: {}", build.tag);
        }
    }

    line.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_replace_images() {
        let manifest = "spec:\n  containers:\n  - name: web\n    image: example\n    command: [run]\n";
        let builds = vec![BuildResult::new("example", "example:tag2")];

        let rewritten = replace_images(manifest, &builds);
        assert!(rewritten.contains("    image: example:tag2\n"));
        assert!(rewritten.contains("command: [run]"));
    }

    #[test]
    fn test_replace_images_with_existing_tag() {
        let manifest = "    image: example:old\n";
        let builds = vec![BuildResult::new("example", "example:new")];

        assert_eq!(replace_images(manifest, &builds), "    image: example:new\n");
    }

    #[test]
    fn test_replace_images_in_list_items() {
        let manifest = "  containers:\n  - image: example\n";
        let builds = vec![BuildResult::new("example", "example:tag2")];

        assert_eq!(
            replace_images(manifest, &builds),
            "  containers:\n  - image: example:tag2\n"
        );
    }

    #[test]
    fn test_replace_images_leaves_other_images_alone() {
        let manifest = "    image: postgres:15\n";
        let builds = vec![BuildResult::new("example", "example:new")];

        assert_eq!(replace_images(manifest, &builds), manifest);
    }

    #[test]
    fn test_replace_images_keeps_registry_ports() {
        let manifest = "    image: localhost:5000/example\n";
        let builds = vec![BuildResult::new("localhost:5000/example", "localhost:5000/example:t1")];

        assert_eq!(
            replace_images(manifest, &builds),
            "    image: localhost:5000/example:t1\n"
        );
    }
}
