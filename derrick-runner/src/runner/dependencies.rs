//! Artifact dependency listing
//!
//! For one artifact, enumerate the source files that require a rebuild
//! when changed. Dispatches on the artifact kind; relative paths resolve
//! against the artifact's workspace. Errors after cancellation are
//! suppressed so shutdown never looks like files disappearing.

use std::path::PathBuf;

use anyhow::{Context, Result};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use derrick_core::config::{Artifact, ArtifactKind, BazelArtifact};

use crate::process::output_of;

pub fn dependencies_for_artifact(
    cancel: &CancellationToken,
    artifact: &Artifact,
) -> Result<Vec<PathBuf>> {
    let listed = match &artifact.kind {
        ArtifactKind::Docker(_) => docker_context_files(artifact),
        ArtifactKind::Bazel(bazel) => bazel_query_files(artifact, bazel),
        ArtifactKind::JibMaven(_) => build_tool_files(artifact, &["pom.xml"], "src"),
        ArtifactKind::JibGradle(_) => build_tool_files(
            artifact,
            &["build.gradle", "build.gradle.kts", "settings.gradle"],
            "src",
        ),
    };

    let listed = match listed {
        Ok(paths) => paths,
        Err(err) => {
            if cancel.is_cancelled() {
                debug!("ignoring dependency listing error after cancellation: {err:#}");
                return Ok(Vec::new());
            }
            return Err(err);
        }
    };

    Ok(listed
        .into_iter()
        .map(|path| {
            if path.is_absolute() {
                path
            } else {
                artifact.workspace.join(path)
            }
        })
        .collect())
}

/// The whole build context: every file under the workspace
fn docker_context_files(artifact: &Artifact) -> Result<Vec<PathBuf>> {
    if !artifact.workspace.exists() {
        anyhow::bail!("workspace {} does not exist", artifact.workspace.display());
    }

    let mut paths = Vec::new();
    for entry in walkdir::WalkDir::new(&artifact.workspace)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
    {
        let relative = entry
            .path()
            .strip_prefix(&artifact.workspace)
            .unwrap_or(entry.path())
            .to_path_buf();
        paths.push(relative);
    }

    Ok(paths)
}

/// Source files of the bazel target, as bazel reports them
fn bazel_query_files(artifact: &Artifact, bazel: &BazelArtifact) -> Result<Vec<PathBuf>> {
    let query = format!("kind(\"source file\", deps({}))", bazel.target);
    let stdout = output_of(
        std::process::Command::new("bazel")
            .args(["query", &query, "--output=location"])
            .current_dir(&artifact.workspace),
        "bazel query",
    )
    .with_context(|| format!("listing sources of {}", bazel.target))?;

    // location output: /abs/path/BUILD:12:1: source file //pkg:file
    Ok(stdout
        .lines()
        .filter_map(|line| line.split(':').next())
        .map(PathBuf::from)
        .collect())
}

/// Build descriptor files plus the conventional source tree
fn build_tool_files(
    artifact: &Artifact,
    descriptors: &[&str],
    source_dir: &str,
) -> Result<Vec<PathBuf>> {
    let mut paths = Vec::new();

    for descriptor in descriptors {
        if artifact.workspace.join(descriptor).is_file() {
            paths.push(PathBuf::from(descriptor));
        }
    }

    let sources = artifact.workspace.join(source_dir);
    if sources.is_dir() {
        for entry in walkdir::WalkDir::new(&sources)
            .sort_by_file_name()
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
        {
            let relative = entry
                .path()
                .strip_prefix(&artifact.workspace)
                .unwrap_or(entry.path())
                .to_path_buf();
            paths.push(relative);
        }
    }

    Ok(paths)
}
