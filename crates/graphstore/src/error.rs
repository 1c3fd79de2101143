//! Error types for graph storage and change execution.
//!
//! Errors are categorized so callers can tell a rejected batch (nothing was
//! written) from a storage failure or an exhausted id range.

use thiserror::Error;

/// Categories of graph errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Malformed batch, rejected before any commit
    Validation,
    /// Identity collision or structural conflict
    Conflict,
    /// No id left in an allocator range
    Exhaustion,
    /// Same change failed too many times in a row
    RepeatedFailure,
    /// Backend or serialization failure
    Storage,
}

impl ErrorCategory {
    /// Whether nothing was written when an error of this category occurred.
    pub fn is_rejection(&self) -> bool {
        matches!(self, Self::Validation | Self::Conflict)
    }

    /// Get a user-friendly description of this error category.
    pub fn description(&self) -> &'static str {
        match self {
            Self::Validation => "Invalid change batch",
            Self::Conflict => "Conflicting change batch",
            Self::Exhaustion => "Id range exhausted",
            Self::RepeatedFailure => "Change keeps failing",
            Self::Storage => "Storage failure",
        }
    }
}

/// Errors that can occur while reading or mutating the resource graph.
#[derive(Debug, Error)]
pub enum Error {
    /// Batch references something that does not exist or breaks a schema
    #[error("validation failed: {message}")]
    Validation {
        /// What is wrong with the batch
        message: String,
    },

    /// Identity collision at commit time
    #[error("conflict: {message}")]
    Conflict {
        /// Description of the conflict
        message: String,
    },

    /// A hook rejected the batch
    #[error("hook {hook} failed: {message}")]
    Hook {
        /// Name of the hook event being dispatched
        hook: &'static str,
        /// Message returned by the hook
        message: String,
    },

    /// Work feeding the engine failed before it produced a batch
    #[error("{task} failed: {message}")]
    Task {
        /// Key the caller reports the work under
        task: String,
        /// What went wrong
        message: String,
    },

    /// The allocator was used before `configure` was called
    #[error("id allocator is not initialized")]
    NotInitialized,

    /// No free id left in the configured range
    #[error("no free id left for {resource_type}.{property} in [{range_start}, {range_end}]")]
    Exhausted {
        /// Resource type scanned
        resource_type: String,
        /// Property acting as the id
        property: String,
        /// First id of the range
        range_start: i64,
        /// Last id of the range
        range_end: i64,
    },

    /// The same change failed on consecutive attempts and was quarantined
    #[error("change {fingerprint} failed {attempts} times in a row: {last_error}")]
    RepeatedFailure {
        /// Fingerprint of the failing batch, or the key of the failing task
        fingerprint: String,
        /// Number of consecutive failures
        attempts: u32,
        /// Message of the last failure
        last_error: String,
    },

    /// Database error
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// JSON (de)serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A lock was poisoned by a panicking thread
    #[error("lock poisoned: {0}")]
    Poisoned(&'static str),
}

impl Error {
    /// Build a validation error.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    /// Build a conflict error.
    pub fn conflict(message: impl Into<String>) -> Self {
        Self::Conflict {
            message: message.into(),
        }
    }

    /// Build a task error.
    pub fn task(task: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Task {
            task: task.into(),
            message: message.into(),
        }
    }

    /// Get the error category.
    pub fn category(&self) -> ErrorCategory {
        match self {
            Error::Validation { .. } | Error::Hook { .. } | Error::Task { .. } => {
                ErrorCategory::Validation
            }
            Error::Conflict { .. } => ErrorCategory::Conflict,
            Error::Exhausted { .. } | Error::NotInitialized => ErrorCategory::Exhaustion,
            Error::RepeatedFailure { .. } => ErrorCategory::RepeatedFailure,
            _ => ErrorCategory::Storage,
        }
    }
}

/// Result type for graph operations.
pub type Result<T> = std::result::Result<T, Error>;
