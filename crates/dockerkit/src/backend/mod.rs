//! Backend abstraction for container control.
//!
//! The [`ControlPlane`] trait defines the interface for driving containers,
//! allowing for different implementations (real docker CLI, in-memory
//! simulation for tests and dry runs).

pub mod docker;
pub mod memory;

use crate::error::Result;
use crate::types::{BuildSpec, ContainerStatus, ExecOutput, ObservedContainerState, RunSpec};

/// Operations the reconciler needs from a container runtime.
pub trait ControlPlane: Send + Sync {
    /// Short backend name for logs.
    fn name(&self) -> &'static str;

    /// Check if the runtime answers.
    fn is_available(&self) -> bool;

    /// Snapshot of every container, running or not.
    fn list(&self) -> Result<ObservedContainerState>;

    /// Create and start a container. Returns its id.
    fn run(&self, spec: &RunSpec) -> Result<String>;

    /// Stop a container. Stopping a stopped container is not an error.
    fn stop(&self, name: &str) -> Result<()>;

    /// Remove a stopped container.
    fn remove(&self, name: &str) -> Result<()>;

    /// Build an image and label it with the spec's fingerprint.
    fn build_image(&self, spec: &BuildSpec) -> Result<()>;

    /// Fingerprint label of an image, `None` when the image or label is missing.
    fn image_fingerprint(&self, image: &str) -> Result<Option<String>>;

    /// Run a command inside a running container.
    fn exec(&self, container: &str, command: &[String]) -> Result<ExecOutput>;

    /// Write `content` to `path` inside a running container.
    fn copy_content(&self, container: &str, path: &str, content: &[u8]) -> Result<()>;

    /// Current status of one container.
    fn status(&self, name: &str) -> Result<Option<ContainerStatus>> {
        Ok(self.list()?.by_name(name).map(|c| c.status.clone()))
    }
}

/// Get the default backend (real docker CLI).
pub fn default_backend() -> Result<docker::DockerCli> {
    docker::DockerCli::new()
}
