//! Runtime options
//!
//! Everything the CLI decides per invocation, as opposed to the pipeline
//! file which describes the project itself.

use std::path::PathBuf;
use std::time::Duration;

/// Options passed from the command line into the runner
#[derive(Debug, Clone)]
pub struct Options {
    /// Path to the pipeline configuration file
    pub config_file: PathBuf,

    /// User-supplied tag overriding the configured tag policy
    pub custom_tag: String,

    /// Kubernetes namespace for deploys; empty means the context default
    pub namespace: Option<String>,

    /// Image-name substrings selecting which artifacts to watch in dev
    /// mode; empty watches all of them
    pub watch: Vec<String>,

    /// Trigger governing the dev-loop tick cadence ("polling" or "manual")
    pub trigger: String,

    /// Interval between watch polls for the polling trigger
    pub watch_poll_interval: Duration,

    /// Stream logs after a one-shot run
    pub tail: bool,

    /// Stream logs during dev mode
    pub tail_dev: bool,

    /// Forward container ports of deployed pods during dev mode
    pub port_forward: bool,

    /// Ring the terminal bell when a deploy completes
    pub notification: bool,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            config_file: PathBuf::from("derrick.yaml"),
            custom_tag: String::new(),
            namespace: None,
            watch: Vec::new(),
            trigger: "polling".to_string(),
            watch_poll_interval: Duration::from_secs(1),
            tail: false,
            tail_dev: true,
            port_forward: false,
            notification: false,
        }
    }
}
