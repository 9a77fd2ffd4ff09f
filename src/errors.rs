//! Structured error types with stable machine-readable codes
//!
//! The taxonomy follows the recovery contract: anything recoverable without
//! loss of user-visible correctness is handled inside the component that hit
//! it; only errors that would corrupt graph invariants or reject a request
//! outright travel upward.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Structured error shape handed to embedding applications
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorReport {
    /// Machine-readable error code
    pub code: String,

    /// Human-readable error message
    pub message: String,
}

/// Engine error kinds
#[derive(Debug)]
pub enum EngineError {
    /// Malformed input (empty URL, non-finite timestamp, internal scheme).
    /// Surfaced to the caller; nothing was mutated.
    InvalidInput { field: String, reason: String },

    /// The external keyword extractor failed or timed out. Recovered by
    /// falling back to the heuristic extractor; never surfaced from the
    /// pipeline itself.
    ExtractionUnavailable(String),

    /// Snapshot read or write failed. Recovered locally (empty start on
    /// read, retried on the next shutdown for writes).
    SnapshotIo(String),

    /// A graph invariant was found violated. The in-flight visit is aborted
    /// and the staged copy discarded; the published state is untouched.
    InvariantViolation(String),

    /// New visits are rejected while the engine drains its queue.
    ShutdownInProgress,

    /// Wrapper for unexpected failures
    Internal(anyhow::Error),
}

impl EngineError {
    pub fn invalid_input(field: &str, reason: impl Into<String>) -> Self {
        Self::InvalidInput {
            field: field.to_string(),
            reason: reason.into(),
        }
    }

    /// Get the stable error code for client identification
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidInput { .. } => "INVALID_INPUT",
            Self::ExtractionUnavailable(_) => "EXTRACTION_UNAVAILABLE",
            Self::SnapshotIo(_) => "SNAPSHOT_IO",
            Self::InvariantViolation(_) => "INVARIANT_VIOLATION",
            Self::ShutdownInProgress => "SHUTDOWN_IN_PROGRESS",
            Self::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// Get the detailed error message
    pub fn message(&self) -> String {
        match self {
            Self::InvalidInput { field, reason } => {
                format!("Invalid input for field '{field}': {reason}")
            }
            Self::ExtractionUnavailable(msg) => format!("Keyword extraction unavailable: {msg}"),
            Self::SnapshotIo(msg) => format!("Snapshot I/O failed: {msg}"),
            Self::InvariantViolation(msg) => format!("Graph invariant violated: {msg}"),
            Self::ShutdownInProgress => "Engine is shutting down".to_string(),
            Self::Internal(err) => format!("Internal error: {err}"),
        }
    }

    /// Convert to the serializable report shape
    pub fn to_report(&self) -> ErrorReport {
        ErrorReport {
            code: self.code().to_string(),
            message: self.message(),
        }
    }

    /// Rebuild an equivalent error value.
    ///
    /// Visit jobs can carry several reply channels after queue coalescing and
    /// each replier needs its own error value; `anyhow::Error` is not `Clone`,
    /// so the `Internal` variant is replicated through its rendered message.
    pub fn replicate(&self) -> Self {
        match self {
            Self::InvalidInput { field, reason } => Self::InvalidInput {
                field: field.clone(),
                reason: reason.clone(),
            },
            Self::ExtractionUnavailable(msg) => Self::ExtractionUnavailable(msg.clone()),
            Self::SnapshotIo(msg) => Self::SnapshotIo(msg.clone()),
            Self::InvariantViolation(msg) => Self::InvariantViolation(msg.clone()),
            Self::ShutdownInProgress => Self::ShutdownInProgress,
            Self::Internal(err) => Self::Internal(anyhow::anyhow!("{err:#}")),
        }
    }
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message())
    }
}

impl std::error::Error for EngineError {}

impl From<anyhow::Error> for EngineError {
    fn from(err: anyhow::Error) -> Self {
        Self::Internal(err)
    }
}

/// Helper trait to convert validation failures into `InvalidInput`
pub trait ValidationErrorExt<T> {
    fn map_validation_err(self, field: &str) -> Result<T>;
}

impl<T> ValidationErrorExt<T> for anyhow::Result<T> {
    fn map_validation_err(self, field: &str) -> Result<T> {
        self.map_err(|e| EngineError::InvalidInput {
            field: field.to_string(),
            reason: e.to_string(),
        })
    }
}

/// Type alias for Results using EngineError
pub type Result<T> = std::result::Result<T, EngineError>;
