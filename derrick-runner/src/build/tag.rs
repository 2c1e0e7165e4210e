//! Taggers
//!
//! A tagger computes the fully qualified reference (`name:tag`) for one
//! artifact build. Selection priority: user override, environment
//! template, content digest, git commit, date/time.

use std::path::Path;

use anyhow::{Context, Result};
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::process::output_of;

/// Computes an image reference for a given source tree
pub trait Tagger: Send + Sync {
    /// Short name used in logs and resource labels
    fn name(&self) -> &'static str;

    /// Returns the fully qualified reference for this build
    fn generate_tag(&self, workspace: &Path, image_name: &str) -> Result<String>;
}

/// Fixed tag supplied by the user on the command line
pub struct CustomTag {
    pub tag: String,
}

impl Tagger for CustomTag {
    fn name(&self) -> &'static str {
        "custom"
    }

    fn generate_tag(&self, _workspace: &Path, image_name: &str) -> Result<String> {
        Ok(format!("{}:{}", image_name, self.tag))
    }
}

/// Reference produced by expanding `${VAR}` against the environment
///
/// `IMAGE_NAME` is always available inside the template.
pub struct EnvTemplateTagger {
    template: String,
}

impl EnvTemplateTagger {
    pub fn new(template: impl Into<String>) -> Self {
        Self {
            template: template.into(),
        }
    }
}

impl Tagger for EnvTemplateTagger {
    fn name(&self) -> &'static str {
        "envTemplate"
    }

    fn generate_tag(&self, _workspace: &Path, image_name: &str) -> Result<String> {
        expand_template(&self.template, image_name)
    }
}

fn expand_template(template: &str, image_name: &str) -> Result<String> {
    let mut expanded = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(start) = rest.find("${") {
        expanded.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let end = after
            .find('}')
            .with_context(|| format!("unterminated variable in template {template:?}"))?;
        let var = &after[..end];

        if var == "IMAGE_NAME" {
            expanded.push_str(image_name);
        } else {
            let value = std::env::var(var)
                .with_context(|| format!("unset variable {var:?} in template {template:?}"))?;
            expanded.push_str(&value);
        }
        rest = &after[end + 1..];
    }
    expanded.push_str(rest);

    Ok(expanded)
}

/// Tag from a sha256 digest over the workspace contents
pub struct ChecksumTagger {}

impl Tagger for ChecksumTagger {
    fn name(&self) -> &'static str {
        "sha256"
    }

    fn generate_tag(&self, workspace: &Path, image_name: &str) -> Result<String> {
        let mut hasher = Sha256::new();

        for entry in walkdir::WalkDir::new(workspace)
            .sort_by_file_name()
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
        {
            let relative = entry
                .path()
                .strip_prefix(workspace)
                .unwrap_or(entry.path());
            hasher.update(relative.to_string_lossy().as_bytes());

            let contents = std::fs::read(entry.path())
                .with_context(|| format!("reading {}", entry.path().display()))?;
            hasher.update(&contents);
        }

        let digest = hasher.finalize();
        let hex: String = digest.iter().map(|b| format!("{b:02x}")).collect();

        Ok(format!("{}:{}", image_name, &hex[..12]))
    }
}

/// Tag from the current git commit, with a dirty suffix for unstaged work
pub struct GitCommitTagger {}

impl Tagger for GitCommitTagger {
    fn name(&self) -> &'static str {
        "gitCommit"
    }

    fn generate_tag(&self, workspace: &Path, image_name: &str) -> Result<String> {
        let commit = output_of(
            std::process::Command::new("git")
                .arg("-C")
                .arg(workspace)
                .args(["rev-parse", "--short=7", "HEAD"]),
            "git rev-parse",
        )?;

        let porcelain = output_of(
            std::process::Command::new("git")
                .arg("-C")
                .arg(workspace)
                .args(["status", "--porcelain"]),
            "git status",
        )?;

        let tag = if porcelain.is_empty() {
            commit
        } else {
            debug!("workspace {} has uncommitted changes", workspace.display());
            format!("{commit}-dirty")
        };

        Ok(format!("{image_name}:{tag}"))
    }
}

/// Tag from the wall clock, formatted without characters docker rejects
pub struct DateTimeTagger {
    format: String,
    utc: bool,
}

const DEFAULT_DATE_FORMAT: &str = "%Y-%m-%d_%H-%M-%S%.3f";

impl DateTimeTagger {
    pub fn new(format: Option<String>, time_zone: Option<String>) -> Self {
        Self {
            format: format.unwrap_or_else(|| DEFAULT_DATE_FORMAT.to_string()),
            utc: time_zone.as_deref() == Some("UTC"),
        }
    }
}

impl Tagger for DateTimeTagger {
    fn name(&self) -> &'static str {
        "dateTime"
    }

    fn generate_tag(&self, _workspace: &Path, image_name: &str) -> Result<String> {
        let timestamp = if self.utc {
            chrono::Utc::now().format(&self.format).to_string()
        } else {
            chrono::Local::now().format(&self.format).to_string()
        };

        Ok(format!("{image_name}:{timestamp}"))
    }
}
