//! # dockerkit
//!
//! Container control plane for the reconciler.
//!
//! This crate provides:
//! - The [`ControlPlane`] trait: list, run, stop, remove, build, exec, copy
//! - [`DockerCli`], which shells out to `docker`
//! - [`InMemoryControlPlane`], a recording simulation for tests and dry runs
//! - A parser for the tabular `docker ps` report
//! - Error categorization and retry with exponential backoff
//!
//! ## Example
//!
//! ```no_run
//! use dockerkit::{ControlPlane, DockerCli};
//!
//! let docker = DockerCli::new().expect("docker not available");
//! for container in docker.list()?.iter() {
//!     println!("{} {} {}", container.name, container.image, container.status);
//! }
//! # Ok::<(), dockerkit::Error>(())
//! ```
//!
//! ## Retry Logic
//!
//! Registry and network errors are transient. Wrap calls in
//! [`retry::with_retry`] to retry them with exponential backoff.

pub mod backend;
mod error;
pub mod listing;
pub mod retry;
mod types;

pub use backend::docker::DockerCli;
pub use backend::memory::{Action, InMemoryControlPlane};
pub use backend::{ControlPlane, default_backend};
pub use error::{Error, ErrorCategory, Result};
pub use listing::parse_listing;
pub use retry::{LogCallback, NoCallback, RetryCallback, with_retry};
pub use types::{
    BuildSpec, ContainerRecord, ContainerStatus, ContextFile, ExecOutput, FINGERPRINT_LABEL,
    Mount, ObservedContainerState, PortBinding, RetryConfig, RunSpec,
};
