//! Core types for container reconciliation

use crate::error::InfrastructureError;
use dockerkit::RetryConfig;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

/// Where a definition came from and where it should run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputContext {
    /// Plugin that produced the definition
    pub plugin: String,
    /// Graph resource the definition was derived from
    pub source_resource: Option<i64>,
    /// Machine the container runs on
    pub machine: String,
}

impl OutputContext {
    pub fn new(plugin: impl Into<String>, machine: impl Into<String>) -> Self {
        Self {
            plugin: plugin.into(),
            source_resource: None,
            machine: machine.into(),
        }
    }

    pub fn with_source(mut self, internal_id: i64) -> Self {
        self.source_resource = Some(internal_id);
        self
    }
}

/// Content of one build-context entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum FileSource {
    /// Bytes given directly
    Inline(Vec<u8>),
    /// A host file, or a host directory copied recursively
    Host(PathBuf),
}

/// One entry of a build context.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildFile {
    /// Path inside the context
    pub path: String,
    pub source: FileSource,
}

/// Instructions and files an image is built from.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildContext {
    /// Build instructions (Dockerfile text)
    pub instructions: String,
    pub files: Vec<BuildFile>,
}

/// A host directory mounted into the container.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolumeMount {
    /// Relative paths live under the configured volumes root
    pub host_path: PathBuf,
    pub container_path: String,
    pub read_only: bool,
}

/// A port the application serves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Endpoint {
    pub host_port: u16,
    pub container_port: u16,
    /// Reachable from outside the machine, through the entry redirector
    pub external: bool,
}

/// An outbound port the application reaches through the exit redirector.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortRedirect {
    /// Port applications connect to on the exit redirector
    pub port: u16,
    pub target_host: String,
    pub target_port: u16,
}

/// Step run once the container reports running.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PostStartAction {
    /// Run a command inside the container
    Exec(Vec<String>),
    /// Write a file inside the container
    InjectFile { path: String, content: Vec<u8> },
}

/// Everything that should be running for one application.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplicationDefinition {
    /// Container name, unique across the desired set
    pub name: String,
    pub build: BuildContext,
    pub volumes: Vec<VolumeMount>,
    pub environment: BTreeMap<String, String>,
    /// Overrides the image command when not empty
    pub command: Vec<String>,
    /// Names of applications that must be started first
    pub depends_on: Vec<String>,
    pub endpoints: Vec<Endpoint>,
    pub port_redirects: Vec<PortRedirect>,
    pub post_start: Vec<PostStartAction>,
    /// Restart even if nothing changed
    pub restart: bool,
    /// Extra privileges, e.g. `NET_ADMIN`
    pub capabilities: Vec<String>,
}

impl ApplicationDefinition {
    pub fn new(name: impl Into<String>, instructions: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            build: BuildContext {
                instructions: instructions.into(),
                files: Vec::new(),
            },
            ..Self::default()
        }
    }

    pub fn with_file(mut self, path: impl Into<String>, source: FileSource) -> Self {
        self.build.files.push(BuildFile {
            path: path.into(),
            source,
        });
        self
    }

    pub fn with_volume(mut self, host_path: impl Into<PathBuf>, container_path: impl Into<String>) -> Self {
        self.volumes.push(VolumeMount {
            host_path: host_path.into(),
            container_path: container_path.into(),
            read_only: false,
        });
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.environment.insert(key.into(), value.into());
        self
    }

    pub fn with_command(mut self, command: Vec<String>) -> Self {
        self.command = command;
        self
    }

    pub fn depends_on(mut self, name: impl Into<String>) -> Self {
        let name = name.into();
        if !self.depends_on.contains(&name) {
            self.depends_on.push(name);
        }
        self
    }

    pub fn with_endpoint(mut self, host_port: u16, container_port: u16, external: bool) -> Self {
        self.endpoints.push(Endpoint {
            host_port,
            container_port,
            external,
        });
        self
    }

    pub fn with_redirect(mut self, port: u16, target_host: impl Into<String>, target_port: u16) -> Self {
        self.port_redirects.push(PortRedirect {
            port,
            target_host: target_host.into(),
            target_port,
        });
        self
    }

    pub fn with_post_start(mut self, action: PostStartAction) -> Self {
        self.post_start.push(action);
        self
    }

    pub fn with_restart(mut self, restart: bool) -> Self {
        self.restart = restart;
        self
    }

    pub fn needs_entry_redirector(&self) -> bool {
        self.endpoints.iter().any(|e| e.external)
    }

    pub fn needs_exit_redirector(&self) -> bool {
        !self.port_redirects.is_empty()
    }
}

/// A definition paired with its context.
pub type DesiredApplication = (OutputContext, ApplicationDefinition);

/// What happened to one desired container during a pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ContainerOutcome {
    /// Already running the right image
    Unchanged,
    /// Started or restarted
    Started { rebuilt: bool },
    /// Not touched, e.g. vetoed or blocked by a failed dependency
    Skipped { reason: String },
    Failed(InfrastructureError),
}

impl ContainerOutcome {
    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Failed(_))
    }
}

/// What a pass would do, computed without touching any container.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconcilePlan {
    /// Observed containers that are not desired
    pub prune: Vec<String>,
    /// Desired containers grouped by dependency level, first level first
    pub levels: Vec<Vec<String>>,
}

/// Summary of a reconciliation pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconcileSummary {
    pub pruned: Vec<String>,
    pub built: Vec<String>,
    pub started: Vec<String>,
    pub unchanged: Vec<String>,
    pub skipped: Vec<(String, String)>,
    pub failures: Vec<InfrastructureError>,
}

impl ReconcileSummary {
    /// Record the outcome of one container. Builds are recorded separately,
    /// since an image may be built for a container that then does not start.
    pub fn add_outcome(&mut self, name: &str, outcome: &ContainerOutcome) {
        match outcome {
            ContainerOutcome::Unchanged => self.unchanged.push(name.to_string()),
            ContainerOutcome::Started { .. } => self.started.push(name.to_string()),
            ContainerOutcome::Skipped { reason } => {
                self.skipped.push((name.to_string(), reason.clone()));
            }
            ContainerOutcome::Failed(error) => self.failures.push(error.clone()),
        }
    }

    /// Check if the pass was fully successful (no failures)
    pub fn is_success(&self) -> bool {
        self.failures.is_empty()
    }

    /// Number of containers pruned, built or started
    pub fn total_changes(&self) -> usize {
        self.pruned.len() + self.built.len() + self.started.len()
    }
}

/// Options for a reconciliation pass
#[derive(Debug, Clone)]
pub struct ReconcileOptions {
    /// Containers converged in parallel within one dependency level
    pub jobs: usize,
    /// Remove observed containers that are not desired
    pub prune: bool,
    /// Host directory relative volume paths resolve against
    pub volumes_root: PathBuf,
    /// How long a started container may take to report running
    pub start_timeout: Duration,
    /// Pause between status polls while waiting
    pub poll_interval: Duration,
    /// Network every container joins
    pub network: Option<String>,
    /// Prefix of built image tags
    pub image_prefix: String,
    /// Retry policy for builds and starts
    pub retry: RetryConfig,
}

impl Default for ReconcileOptions {
    fn default() -> Self {
        Self {
            jobs: 4,
            prune: true,
            volumes_root: PathBuf::from("/var/lib/infragraph/volumes"),
            start_timeout: Duration::from_secs(30),
            poll_interval: Duration::from_millis(500),
            network: None,
            image_prefix: "infragraph".to_string(),
            retry: RetryConfig::default(),
        }
    }
}

impl ReconcileOptions {
    /// Tag of the image built for `name`.
    pub fn image_tag(&self, name: &str) -> String {
        format!("{}/{name}:latest", self.image_prefix)
    }
}
