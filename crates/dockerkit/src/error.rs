//! Error types for container control-plane operations.
//!
//! Errors are categorized to enable retry of transient failures (registry
//! pulls, a daemon that is restarting) and appropriate alerting for the rest.

use thiserror::Error;

/// Categories of control-plane errors for retry logic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Registry or network failure (transient, retryable)
    Network,
    /// Container or image does not exist
    NotFound,
    /// Name already in use, or container in the wrong state
    Conflict,
    /// Permission denied on the daemon socket or a host path
    Permission,
    /// Docker is not installed or the daemon does not answer
    DaemonUnavailable,
    /// Other/unknown errors
    Other,
}

impl ErrorCategory {
    /// Whether this error category is typically transient and worth retrying.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Network)
    }

    /// Get a user-friendly description of this error category.
    pub fn description(&self) -> &'static str {
        match self {
            Self::Network => "Network connectivity issue",
            Self::NotFound => "Container or image not found",
            Self::Conflict => "Container conflict",
            Self::Permission => "Permission denied",
            Self::DaemonUnavailable => "Container daemon unavailable",
            Self::Other => "Unexpected error",
        }
    }

    /// Get actionable advice for resolving this error category.
    pub fn advice(&self) -> &'static str {
        match self {
            Self::Network => "Check registry connectivity and try again",
            Self::NotFound => "Check the container or image name",
            Self::Conflict => "Remove the conflicting container and retry",
            Self::Permission => "Check access to the docker socket and volume paths",
            Self::DaemonUnavailable => "Start the docker daemon or install docker",
            Self::Other => "Check the error details for more information",
        }
    }
}

/// Errors that can occur while talking to the container control plane.
#[derive(Debug, Error)]
pub enum Error {
    /// Network-related error (registry, DNS, timeout)
    #[error("network error: {message}")]
    Network {
        /// Detailed error message
        message: String,
    },

    /// Container or image not found
    #[error("not found: {name}")]
    NotFound {
        /// Name of the missing container or image
        name: String,
    },

    /// Name collision or invalid container state
    #[error("conflict: {message}")]
    Conflict {
        /// Description of the conflict
        message: String,
    },

    /// Permission denied
    #[error("permission denied: {message}")]
    Permission {
        /// Details about what permission was denied
        message: String,
    },

    /// Docker is missing or the daemon is down
    #[error("container daemon unavailable: {message}")]
    DaemonUnavailable {
        /// Why the daemon could not be reached
        message: String,
    },

    /// The container listing report could not be parsed
    #[error("invalid container listing at line {line}: {message}")]
    ListingParse {
        /// Line number of the offending row (1-indexed)
        line: usize,
        /// Description of the problem
        message: String,
    },

    /// Command execution failed
    #[error("command failed: {message}")]
    CommandFailed {
        /// Description of what command failed
        message: String,
        /// Standard error output from the failed command
        stderr: String,
    },

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON parsing error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Other error
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Get the error category for retry logic.
    pub fn category(&self) -> ErrorCategory {
        match self {
            Error::Network { .. } => ErrorCategory::Network,
            Error::NotFound { .. } => ErrorCategory::NotFound,
            Error::Conflict { .. } => ErrorCategory::Conflict,
            Error::Permission { .. } => ErrorCategory::Permission,
            Error::DaemonUnavailable { .. } => ErrorCategory::DaemonUnavailable,
            _ => ErrorCategory::Other,
        }
    }

    /// Whether this error is typically transient and worth retrying.
    pub fn is_retryable(&self) -> bool {
        self.category().is_retryable()
    }

    /// Create an error from docker command output.
    ///
    /// Analyzes stderr to categorize the error appropriately.
    pub fn from_docker_output(stderr: &str, subject: Option<&str>) -> Self {
        let stderr_lower = stderr.to_lowercase();

        if stderr_lower.contains("cannot connect to the docker daemon")
            || stderr_lower.contains("is the docker daemon running")
            || stderr_lower.contains("error during connect")
        {
            return Error::DaemonUnavailable {
                message: stderr.trim().to_string(),
            };
        }

        if stderr_lower.contains("permission denied")
            || stderr_lower.contains("operation not permitted")
        {
            return Error::Permission {
                message: stderr.trim().to_string(),
            };
        }

        if stderr_lower.contains("tls handshake timeout")
            || stderr_lower.contains("i/o timeout")
            || stderr_lower.contains("timed out")
            || stderr_lower.contains("connection refused")
            || stderr_lower.contains("temporary failure in name resolution")
            || stderr_lower.contains("no such host")
            || stderr_lower.contains("toomanyrequests")
        {
            return Error::Network {
                message: stderr.trim().to_string(),
            };
        }

        if stderr_lower.contains("no such container")
            || stderr_lower.contains("no such image")
            || stderr_lower.contains("no such object")
            || stderr_lower.contains("not found")
        {
            return Error::NotFound {
                name: subject.unwrap_or("unknown").to_string(),
            };
        }

        if stderr_lower.contains("conflict")
            || stderr_lower.contains("already in use")
            || stderr_lower.contains("is not running")
            || stderr_lower.contains("is restarting")
        {
            return Error::Conflict {
                message: stderr.trim().to_string(),
            };
        }

        Error::CommandFailed {
            message: format!(
                "docker command failed{}",
                subject.map(|n| format!(" for {n}")).unwrap_or_default()
            ),
            stderr: stderr.trim().to_string(),
        }
    }
}

/// Result type for control-plane operations.
pub type Result<T> = std::result::Result<T, Error>;
