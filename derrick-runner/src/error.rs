//! Error types for the runner
//!
//! Configuration errors terminate startup and carry the offending config
//! shape. `RunnerError` covers the two ways a running pipeline ends
//! early: a failed step, or the dedicated reload sentinel telling the
//! caller to re-read its configuration.

use derrick_core::config::{BuildConfig, DeployConfig, TagPolicy};
use thiserror::Error;

/// Errors raised while selecting collaborator variants from the pipeline
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("api version missing from pipeline configuration")]
    MissingApiVersion,

    #[error("unsupported api version {0:?}")]
    UnsupportedApiVersion(String),

    #[error("unknown builder for config {0:?}")]
    UnknownBuilder(Box<BuildConfig>),

    #[error("unknown deployer for config {0:?}")]
    UnknownDeployer(Box<DeployConfig>),

    #[error("unknown tagger for policy {0:?}")]
    UnknownTagger(Box<TagPolicy>),

    #[error("multiple tag policies set: {0:?}")]
    MultipleTagPolicies(Box<TagPolicy>),

    #[error("unknown trigger {0:?}, expected \"polling\" or \"manual\"")]
    UnknownTrigger(String),

    #[error("unknown profile {0:?}")]
    UnknownProfile(String),
}

/// Errors surfaced by `Runner::run` and `Runner::dev`
///
/// Operational errors inside a running dev loop are logged and
/// swallowed; only first-run failures and the reload sentinel reach the
/// caller.
#[derive(Debug, Error)]
pub enum RunnerError {
    /// The pipeline configuration file itself changed; the caller should
    /// re-read it and re-enter dev mode. Not a failure.
    #[error("configuration changed")]
    ConfigurationChanged,

    #[error("build step: {0}")]
    Build(#[source] anyhow::Error),

    #[error("test step: {0}")]
    Test(#[source] anyhow::Error),

    #[error("deploy step: {0}")]
    Deploy(#[source] anyhow::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl RunnerError {
    /// Check if this is the reload sentinel rather than a failure
    pub fn is_configuration_changed(&self) -> bool {
        matches!(self, Self::ConfigurationChanged)
    }
}
