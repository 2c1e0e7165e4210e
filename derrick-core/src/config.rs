//! Pipeline configuration
//!
//! The parsed `derrick.yaml` description. A pipeline has four slots:
//! build (one builder variant, a tag policy, an ordered artifact list),
//! test, deploy (one deployer variant) and profiles. The configuration
//! is frozen after parsing; factories read it to pick collaborator
//! variants but never mutate it.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

/// The api version this build of derrick understands
pub const API_VERSION: &str = "derrick/v1";

/// A parsed pipeline description
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Pipeline {
    #[serde(default)]
    pub api_version: String,

    #[serde(default)]
    pub build: BuildConfig,

    #[serde(default)]
    pub test: Vec<TestSuite>,

    #[serde(default)]
    pub deploy: DeployConfig,

    #[serde(default)]
    pub profiles: Vec<Profile>,
}

impl Pipeline {
    /// Parses a pipeline from its YAML source
    pub fn parse(contents: &str) -> Result<Self, serde_yaml_ng::Error> {
        let mut pipeline: Self = serde_yaml_ng::from_str(contents)?;
        pipeline.set_defaults();
        Ok(pipeline)
    }

    /// Fills unset one-of slots with their default variants
    ///
    /// Parsing a partial section leaves every variant unset; a pipeline
    /// with no builder means "local", not "error".
    fn set_defaults(&mut self) {
        let build = &mut self.build;
        if build.local.is_none()
            && build.google_cloud_build.is_none()
            && build.kaniko_build.is_none()
        {
            build.local = Some(LocalBuild::default());
        }
        if build.tag_policy.count() == 0 {
            build.tag_policy.git_commit = Some(GitTagger {});
        }

        let deploy = &mut self.deploy;
        if deploy.kubectl.is_none() && deploy.helm.is_none() && deploy.kustomize.is_none() {
            deploy.kubectl = Some(KubectlDeploy::default());
        }
    }

    /// Applies the named profile's overrides in place
    ///
    /// Returns false if no profile with that name exists.
    pub fn apply_profile(&mut self, name: &str) -> bool {
        let Some(profile) = self.profiles.iter().find(|p| p.name == name).cloned() else {
            return false;
        };

        if let Some(build) = profile.build {
            self.build = build;
        }
        if let Some(test) = profile.test {
            self.test = test;
        }
        if let Some(deploy) = profile.deploy {
            self.deploy = deploy;
        }
        self.set_defaults();

        true
    }
}

/// Build slot: exactly one builder variant, a tag policy and the artifacts
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildConfig {
    #[serde(default)]
    pub tag_policy: TagPolicy,

    #[serde(default)]
    pub artifacts: Vec<Artifact>,

    #[serde(default)]
    pub local: Option<LocalBuild>,

    #[serde(default)]
    pub google_cloud_build: Option<GoogleCloudBuild>,

    #[serde(default)]
    pub kaniko_build: Option<KanikoBuild>,
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            tag_policy: TagPolicy::default(),
            artifacts: Vec::new(),
            local: Some(LocalBuild::default()),
            google_cloud_build: None,
            kaniko_build: None,
        }
    }
}

/// Build on the local docker daemon
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocalBuild {
    /// Push images after building
    #[serde(default)]
    pub push: bool,
}

/// Build remotely with Google Cloud Build
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GoogleCloudBuild {
    pub project_id: String,
}

/// Build in-cluster with a kaniko pod
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KanikoBuild {
    #[serde(default)]
    pub namespace: Option<String>,
}

/// Tag policy: at most one strategy may be set
///
/// The default is the git-commit tagger, matching what most pipelines
/// want without any configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TagPolicy {
    #[serde(default)]
    pub env_template: Option<EnvTemplateTagger>,

    #[serde(default)]
    pub sha256: Option<ShaTagger>,

    #[serde(default)]
    pub git_commit: Option<GitTagger>,

    #[serde(default)]
    pub date_time: Option<DateTimeTagger>,
}

impl Default for TagPolicy {
    fn default() -> Self {
        Self {
            env_template: None,
            sha256: None,
            git_commit: Some(GitTagger {}),
            date_time: None,
        }
    }
}

impl TagPolicy {
    /// Number of strategies explicitly set
    pub fn count(&self) -> usize {
        [
            self.env_template.is_some(),
            self.sha256.is_some(),
            self.git_commit.is_some(),
            self.date_time.is_some(),
        ]
        .iter()
        .filter(|set| **set)
        .count()
    }
}

/// Tag from a template expanded against environment variables
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnvTemplateTagger {
    pub template: String,
}

/// Tag from a content digest of the artifact workspace
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ShaTagger {}

/// Tag from the current git commit of the artifact workspace
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GitTagger {}

/// Tag from the wall clock
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DateTimeTagger {
    #[serde(default)]
    pub format: Option<String>,

    /// "UTC" or unset for local time
    #[serde(default)]
    pub time_zone: Option<String>,
}

/// One logical source unit producing one image
///
/// The image name is the stable identity across rebuilds; the tag
/// changes with every build. Relative paths in the build recipe resolve
/// inside the workspace.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Artifact {
    pub image_name: String,

    #[serde(default = "default_workspace")]
    pub workspace: PathBuf,

    /// Sync rules: source glob (workspace-relative) to container
    /// destination directory. Empty means changes always rebuild.
    #[serde(default)]
    pub sync: BTreeMap<String, String>,

    /// The build recipe for this artifact
    #[serde(flatten)]
    pub kind: ArtifactKind,
}

fn default_workspace() -> PathBuf {
    PathBuf::from(".")
}

impl Artifact {
    /// Shorthand used throughout tests and factories
    pub fn docker(image_name: impl Into<String>, workspace: impl Into<PathBuf>) -> Self {
        Self {
            image_name: image_name.into(),
            workspace: workspace.into(),
            sync: BTreeMap::new(),
            kind: ArtifactKind::Docker(DockerArtifact::default()),
        }
    }
}

/// Build recipe discriminant; exactly one per artifact
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ArtifactKind {
    Docker(DockerArtifact),
    Bazel(BazelArtifact),
    JibMaven(JibMavenArtifact),
    JibGradle(JibGradleArtifact),
}

/// Plain Dockerfile build
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DockerArtifact {
    #[serde(default = "default_dockerfile")]
    pub dockerfile: PathBuf,

    #[serde(default)]
    pub build_args: BTreeMap<String, String>,
}

fn default_dockerfile() -> PathBuf {
    PathBuf::from("Dockerfile")
}

impl Default for DockerArtifact {
    fn default() -> Self {
        Self {
            dockerfile: default_dockerfile(),
            build_args: BTreeMap::new(),
        }
    }
}

/// Image produced by a bazel target
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BazelArtifact {
    pub target: String,
}

/// JVM image built by the jib maven plugin
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JibMavenArtifact {
    #[serde(default)]
    pub module: Option<String>,
}

/// JVM image built by the jib gradle plugin
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JibGradleArtifact {
    #[serde(default)]
    pub project: Option<String>,
}

/// One test suite, run against a single built image
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestSuite {
    /// The artifact image this suite exercises
    pub image: String,

    /// Shell commands run with IMAGE set to the freshly built reference
    #[serde(default)]
    pub commands: Vec<String>,

    /// Globs (relative to the pipeline file) whose changes re-apply the
    /// deployment
    #[serde(default)]
    pub paths: Vec<String>,
}

/// Deploy slot: exactly one deployer variant
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeployConfig {
    #[serde(default)]
    pub kubectl: Option<KubectlDeploy>,

    #[serde(default)]
    pub helm: Option<HelmDeploy>,

    #[serde(default)]
    pub kustomize: Option<KustomizeDeploy>,
}

impl Default for DeployConfig {
    fn default() -> Self {
        Self {
            kubectl: Some(KubectlDeploy::default()),
            helm: None,
            kustomize: None,
        }
    }
}

/// Raw manifests piped through kubectl apply
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KubectlDeploy {
    /// Manifest globs, relative to the pipeline file
    #[serde(default = "default_manifests")]
    pub manifests: Vec<String>,
}

fn default_manifests() -> Vec<String> {
    vec!["k8s/*.yaml".to_string()]
}

impl Default for KubectlDeploy {
    fn default() -> Self {
        Self {
            manifests: default_manifests(),
        }
    }
}

/// Templated releases applied with helm
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HelmDeploy {
    #[serde(default)]
    pub releases: Vec<HelmRelease>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HelmRelease {
    pub name: String,

    /// Chart directory, relative to the pipeline file
    pub chart_path: PathBuf,

    /// Value files passed with -f
    #[serde(default)]
    pub value_files: Vec<PathBuf>,

    /// Artifact whose fresh reference is passed as the `image` value
    #[serde(default)]
    pub image_name: Option<String>,

    #[serde(default)]
    pub set_values: BTreeMap<String, String>,
}

/// Overlay composition applied with kustomize
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KustomizeDeploy {
    /// Kustomization directory, relative to the pipeline file
    pub path: PathBuf,
}

/// Named set of overrides for the build/test/deploy slots
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Profile {
    pub name: String,

    #[serde(default)]
    pub build: Option<BuildConfig>,

    #[serde(default)]
    pub test: Option<Vec<TestSuite>>,

    #[serde(default)]
    pub deploy: Option<DeployConfig>,
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
apiVersion: derrick/v1
build:
  artifacts:
    - imageName: example
      docker: {}
deploy:
  kubectl:
    manifests: ["k8s/*.yaml"]
"#;

    #[test]
    fn test_parse_minimal() {
        let pipeline = Pipeline::parse(MINIMAL).unwrap();

        assert_eq!(pipeline.api_version, API_VERSION);
        assert_eq!(pipeline.build.artifacts.len(), 1);
        assert_eq!(pipeline.build.artifacts[0].image_name, "example");
        assert_eq!(pipeline.build.artifacts[0].workspace, PathBuf::from("."));
        assert!(matches!(
            pipeline.build.artifacts[0].kind,
            ArtifactKind::Docker(_)
        ));

        // Defaults fill the unset slots
        assert!(pipeline.build.local.is_some());
        assert!(pipeline.build.tag_policy.git_commit.is_some());
        assert!(pipeline.deploy.kubectl.is_some());
    }

    #[test]
    fn test_parse_rejects_two_artifact_kinds() {
        let two_kinds = r#"
apiVersion: derrick/v1
build:
  artifacts:
    - imageName: example
      docker: {}
      bazel: { target: "//:image" }
"#;
        assert!(Pipeline::parse(two_kinds).is_err());
    }

    #[test]
    fn test_tag_policy_count() {
        let mut policy = TagPolicy::default();
        assert_eq!(policy.count(), 1);

        policy.sha256 = Some(ShaTagger {});
        assert_eq!(policy.count(), 2);
    }

    #[test]
    fn test_apply_profile() {
        let source = r#"
apiVersion: derrick/v1
build:
  artifacts:
    - imageName: example
      docker: {}
profiles:
  - name: gcb
    build:
      googleCloudBuild:
        projectId: my-project
      artifacts:
        - imageName: example
          docker: {}
"#;
        let mut pipeline = Pipeline::parse(source).unwrap();

        assert!(!pipeline.apply_profile("missing"));
        assert!(pipeline.apply_profile("gcb"));
        assert!(pipeline.build.google_cloud_build.is_some());
        assert!(pipeline.build.local.is_none());
    }

    #[test]
    fn test_sync_rules_parse() {
        let source = r#"
apiVersion: derrick/v1
build:
  artifacts:
    - imageName: example
      workspace: web
      sync:
        "*.html": /var/www
      docker: {}
"#;
        let pipeline = Pipeline::parse(source).unwrap();
        let artifact = &pipeline.build.artifacts[0];

        assert_eq!(artifact.sync.get("*.html"), Some(&"/var/www".to_string()));
    }
}
