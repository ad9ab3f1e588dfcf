//! Error types for acquisitions.
//!
//! `FreezerError` covers the orchestrator, the case directory layer and the
//! post-acquisition pipeline. Probe adapters have their own `ProbeError`
//! (see `probes`) which never escapes a worker: it is folded into the task
//! record as a `Failed` status with a diagnostic detail.

use crate::orchestrator::AcquisitionPhase;
use crate::task::TaskId;
use std::path::PathBuf;

/// The main error type for freezer operations.
#[derive(Debug, thiserror::Error)]
pub enum FreezerError {
    /// I/O error (file read/write, permissions, etc.)
    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: Option<PathBuf>,
        #[source]
        source: std::io::Error,
    },

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// The acquisition directory could not be allocated
    #[error("Cannot create acquisition directory under {root:?}: {source}")]
    AcquisitionDirectory {
        root: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A task with the same identity is already registered
    #[error("Task {0} is already registered")]
    DuplicateTask(TaskId),

    /// No task with this identity is registered
    #[error("Task {0} is not registered")]
    UnknownTask(TaskId),

    /// A record was asked to finish with a non-terminal status
    #[error("Invalid transition for task {id}: {reason}")]
    InvalidTransition { id: TaskId, reason: String },

    /// A command was issued in the wrong orchestrator phase
    #[error("Cannot {operation} while acquisition is {phase}")]
    InvalidPhase {
        operation: &'static str,
        phase: AcquisitionPhase,
    },

    /// A stop request that names no task at all
    #[error("Stop request contains no tasks")]
    EmptyStop,

    /// The target URL could not be parsed
    #[error("Invalid URL '{url}': {message}")]
    InvalidUrl { url: String, message: String },

    /// Report generation failed
    #[error("Report generation failed: {0}")]
    Report(String),

    /// Tokio task join error
    #[error("Async task failed: {0}")]
    TaskJoin(#[from] tokio::task::JoinError),

    /// Generic error for external library errors
    #[error("{context}: {message}")]
    External { context: String, message: String },
}

/// Result type alias using FreezerError
pub type FreezerResult<T> = Result<T, FreezerError>;

impl FreezerError {
    /// Create an I/O error with path context
    pub fn io(source: std::io::Error, path: impl Into<Option<PathBuf>>) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Create an external error with context
    pub fn external(context: impl Into<String>, message: impl Into<String>) -> Self {
        Self::External {
            context: context.into(),
            message: message.into(),
        }
    }
}

/// Convert from raw I/O errors (without path context)
impl From<std::io::Error> for FreezerError {
    fn from(source: std::io::Error) -> Self {
        Self::Io { path: None, source }
    }
}
