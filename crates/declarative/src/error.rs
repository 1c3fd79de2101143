//! Error types for reconciliation.
//!
//! [`Error`] aborts a whole pass before any container is touched, or when the
//! control plane cannot even be listed. Failures of a single container are
//! [`InfrastructureError`]s: they are recorded in the summary and alerted, and
//! never stop sibling containers.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Errors that abort a reconciliation pass.
#[derive(Debug, Error)]
pub enum Error {
    /// Start dependencies form a cycle
    #[error("dependency cycle involving application '{application}'")]
    DependencyCycle {
        /// One application on the cycle
        application: String,
    },

    /// An application depends on a name nothing defines
    #[error("application '{application}' depends on unknown application '{dependency}'")]
    UnknownDependency {
        /// The dependent application
        application: String,
        /// The missing dependency
        dependency: String,
    },

    /// Two definitions share a container name
    #[error("application '{name}' is defined more than once")]
    DuplicateApplication {
        /// The duplicated name
        name: String,
    },

    /// Another pass is running
    #[error("a reconciliation pass is already in progress")]
    PassInProgress,

    /// Control plane failure outside any single container
    #[error("control plane error: {0}")]
    ControlPlane(#[from] dockerkit::Error),

    /// Worker pool could not be created
    #[error("failed to create thread pool: {0}")]
    ThreadPool(String),
}

/// Result type for reconciliation.
pub type Result<T> = std::result::Result<T, Error>;

/// Step at which a container failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Prune,
    Volumes,
    Build,
    Start,
    PostStart,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Prune => "prune",
            Stage::Volumes => "volumes",
            Stage::Build => "build",
            Stage::Start => "start",
            Stage::PostStart => "post-start",
        };
        f.write_str(name)
    }
}

/// Failure of one container, isolated from the rest of the pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Error)]
#[error("{container}: {stage} failed: {message}")]
pub struct InfrastructureError {
    pub container: String,
    pub stage: Stage,
    pub message: String,
}

impl InfrastructureError {
    pub fn new(container: &str, stage: Stage, message: impl fmt::Display) -> Self {
        Self {
            container: container.to_string(),
            stage,
            message: message.to_string(),
        }
    }
}
