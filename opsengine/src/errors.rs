//! Error types for the operation processing engine.
//!
//! The taxonomy separates storage-level failures (conflict, unavailable),
//! engine-level outcomes (timeout, step failure) and pipeline definition
//! mistakes. Only step failures and the global timeout may ever translate
//! into a terminal operation state; everything else is transient.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Classification of an error recorded on an operation.
///
/// Steps choose the reason; the engine only produces `Timeout`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorReason {
    /// A step reported a failure of its own work.
    StepFailure,
    /// A step failed because an external dependency misbehaved.
    Dependency,
    /// The operation exceeded its global processing window.
    Timeout,
}

impl fmt::Display for ErrorReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::StepFailure => write!(f, "step_failure"),
            Self::Dependency => write!(f, "dependency"),
            Self::Timeout => write!(f, "timeout"),
        }
    }
}

/// The classified error of the most recent failed step, persisted on the
/// operation for whoever polls its status.
///
/// A later failure overwrites (never merges with) the previous one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LastError {
    /// The component that produced the error (usually a step name).
    pub component: String,
    /// Human-readable message.
    pub message: String,
    /// Classification of the failure.
    pub reason: ErrorReason,
}

impl LastError {
    /// Creates a step-failure error for the given component.
    #[must_use]
    pub fn step_failure(component: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            component: component.into(),
            message: message.into(),
            reason: ErrorReason::StepFailure,
        }
    }

    /// Creates a dependency error for the given component.
    #[must_use]
    pub fn dependency(component: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            component: component.into(),
            message: message.into(),
            reason: ErrorReason::Dependency,
        }
    }

    /// Creates a timeout error.
    #[must_use]
    pub fn timeout(component: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            component: component.into(),
            message: message.into(),
            reason: ErrorReason::Timeout,
        }
    }

    /// Returns a copy with the message prefixed by additional context.
    #[must_use]
    pub fn wrap(&self, context: &str) -> Self {
        Self {
            component: self.component.clone(),
            message: format!("{context}: {}", self.message),
            reason: self.reason,
        }
    }
}

impl fmt::Display for LastError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}: {}", self.reason, self.component, self.message)
    }
}

/// Errors returned by the storage layer.
#[derive(Debug, Clone, Error)]
pub enum StorageError {
    /// No operation with the given id exists.
    #[error("operation {id} not found")]
    NotFound {
        /// The operation id.
        id: String,
    },

    /// An operation with the given id already exists.
    #[error("operation {id} already exists")]
    AlreadyExists {
        /// The operation id.
        id: String,
    },

    /// The write used a stale version; another writer got there first.
    #[error("version conflict for operation {id}: wrote with version {expected}, stored version is {actual}")]
    Conflict {
        /// The operation id.
        id: String,
        /// The version the writer held.
        expected: u64,
        /// The version currently stored.
        actual: u64,
    },

    /// The backend could not be reached or answered with a transport error.
    #[error("storage unavailable: {0}")]
    Unavailable(String),
}

impl StorageError {
    /// Returns true if the error is an optimistic-lock conflict.
    #[must_use]
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict { .. })
    }
}

/// Errors surfaced by the engine to the queue and to callers.
#[derive(Debug, Clone, Error)]
pub enum EngineError {
    /// The operation could not be loaded or persisted; revisit shortly.
    #[error("transient storage failure for operation {id}: {message}")]
    StorageUnavailable {
        /// The operation id.
        id: String,
        /// Description of the underlying failure.
        message: String,
    },

    /// Two consecutive optimistic-lock conflicts; revisit shortly.
    #[error("persistent version conflict for operation {id}")]
    Conflict {
        /// The operation id.
        id: String,
    },

    /// The operation exceeded its global processing window.
    #[error("operation {id} exceeded the {timeout_secs}s processing window")]
    Timeout {
        /// The operation id.
        id: String,
        /// The configured window in seconds.
        timeout_secs: u64,
    },

    /// A step reported a failure; the pipeline run stops here.
    #[error("step '{step}' failed: {message}")]
    StepFailed {
        /// The failing step.
        step: String,
        /// The step's message.
        message: String,
    },
}

impl EngineError {
    /// Returns true if the error only means "try again later".
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::StorageUnavailable { .. } | Self::Conflict { .. })
    }

    /// Builds a transient storage error for the given operation.
    #[must_use]
    pub fn storage(id: impl Into<String>, source: &StorageError) -> Self {
        Self::StorageUnavailable {
            id: id.into(),
            message: source.to_string(),
        }
    }
}

/// Error raised when a staged pipeline definition is invalid.
#[derive(Debug, Clone, Error)]
#[error("invalid pipeline definition for '{pipeline}': {message}")]
pub struct DefinitionError {
    /// The pipeline being defined.
    pub pipeline: String,
    /// What is wrong with the definition.
    pub message: String,
}

impl DefinitionError {
    /// Creates a new definition error.
    #[must_use]
    pub fn new(pipeline: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            pipeline: pipeline.into(),
            message: message.into(),
        }
    }
}
