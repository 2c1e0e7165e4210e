//! Collaborator selection
//!
//! Each pluggable slot of the pipeline selects exactly one
//! implementation; anything else is a configuration error carrying the
//! offending shape.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use tracing::debug;

use derrick_core::config::{BuildConfig, DeployConfig, TagPolicy};
use derrick_core::options::Options;

use crate::build::tag::{
    ChecksumTagger, CustomTag, DateTimeTagger, EnvTemplateTagger, GitCommitTagger,
};
use crate::build::{Builder, GoogleCloudBuilder, KanikoBuilder, LocalBuilder, Tagger};
use crate::deploy::{Deployer, HelmDeployer, KubectlDeployer, KustomizeDeployer};
use crate::error::ConfigError;
use crate::watch::{ManualTrigger, PollTrigger, Trigger};

/// Selects the tagger, in priority order: user override, environment
/// template, content digest, git commit, date/time
pub(crate) fn create_tagger(
    policy: &TagPolicy,
    custom_tag: &str,
) -> Result<Box<dyn Tagger>, ConfigError> {
    if !custom_tag.is_empty() {
        return Ok(Box::new(CustomTag {
            tag: custom_tag.to_string(),
        }));
    }

    if policy.count() > 1 {
        return Err(ConfigError::MultipleTagPolicies(Box::new(policy.clone())));
    }

    if let Some(env_template) = &policy.env_template {
        Ok(Box::new(EnvTemplateTagger::new(&env_template.template)))
    } else if policy.sha256.is_some() {
        Ok(Box::new(ChecksumTagger {}))
    } else if policy.git_commit.is_some() {
        Ok(Box::new(GitCommitTagger {}))
    } else if let Some(date_time) = &policy.date_time {
        Ok(Box::new(DateTimeTagger::new(
            date_time.format.clone(),
            date_time.time_zone.clone(),
        )))
    } else {
        Err(ConfigError::UnknownTagger(Box::new(policy.clone())))
    }
}

/// Selects the builder; exactly one variant must be present
pub(crate) fn create_builder(cfg: &BuildConfig) -> Result<Box<dyn Builder>, ConfigError> {
    let variants = [
        cfg.local.is_some(),
        cfg.google_cloud_build.is_some(),
        cfg.kaniko_build.is_some(),
    ]
    .iter()
    .filter(|set| **set)
    .count();
    if variants != 1 {
        return Err(ConfigError::UnknownBuilder(Box::new(cfg.clone())));
    }

    if let Some(local) = &cfg.local {
        debug!("Using builder: local");
        Ok(Box::new(LocalBuilder::new(local)))
    } else if let Some(gcb) = &cfg.google_cloud_build {
        debug!("Using builder: google cloud");
        Ok(Box::new(GoogleCloudBuilder::new(gcb)))
    } else if let Some(kaniko) = &cfg.kaniko_build {
        debug!("Using builder: kaniko");
        Ok(Box::new(KanikoBuilder::new(kaniko)))
    } else {
        unreachable!("variant count checked above")
    }
}

/// Selects the deployer; exactly one variant must be present
///
/// `working_dir` is the pipeline file's directory; every relative path
/// in the deploy config resolves against it, never against the process
/// working directory.
pub(crate) fn create_deployer(
    cfg: &DeployConfig,
    kube_context: &str,
    namespace: Option<&str>,
    working_dir: &Path,
) -> Result<Box<dyn Deployer>, ConfigError> {
    let variants = [
        cfg.kubectl.is_some(),
        cfg.helm.is_some(),
        cfg.kustomize.is_some(),
    ]
    .iter()
    .filter(|set| **set)
    .count();
    if variants != 1 {
        return Err(ConfigError::UnknownDeployer(Box::new(cfg.clone())));
    }

    if let Some(kubectl) = &cfg.kubectl {
        Ok(Box::new(KubectlDeployer::new(
            kubectl,
            kube_context,
            namespace,
            working_dir,
        )))
    } else if let Some(helm) = &cfg.helm {
        Ok(Box::new(HelmDeployer::new(
            helm,
            kube_context,
            namespace,
            working_dir,
        )))
    } else if let Some(kustomize) = &cfg.kustomize {
        Ok(Box::new(KustomizeDeployer::new(
            kustomize,
            kube_context,
            namespace,
            working_dir,
        )))
    } else {
        unreachable!("variant count checked above")
    }
}

/// Selects the trigger governing the dev-loop tick cadence
pub(crate) fn create_trigger(options: &Options) -> Result<Arc<dyn Trigger>, ConfigError> {
    match options.trigger.as_str() {
        "polling" => Ok(Arc::new(PollTrigger::new(options.watch_poll_interval))),
        "manual" => Ok(Arc::new(ManualTrigger {})),
        other => Err(ConfigError::UnknownTrigger(other.to_string())),
    }
}

/// The label set stamped on every deployed resource
///
/// Computed once from the assembled trio so the label decorator holds no
/// references back into it.
pub(crate) fn runner_labels(
    builder: &dyn Builder,
    deployer: &dyn Deployer,
    tagger: &dyn Tagger,
) -> BTreeMap<String, String> {
    BTreeMap::from([
        ("app.kubernetes.io/managed-by".to_string(), "derrick".to_string()),
        ("derrick.dev/builder".to_string(), builder.name().to_string()),
        ("derrick.dev/deployer".to_string(), deployer.name().to_string()),
        ("derrick.dev/tagger".to_string(), tagger.name().to_string()),
    ])
}
