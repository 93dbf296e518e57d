//! # Pipeline Error Types
//!
//! Error taxonomy shared by the decode orchestrator, seek task and rendezvous.

use thiserror::Error;

/// Errors that can occur while driving the decode pipeline.
///
/// The type is `Clone` so that a single outcome can be stored in a
/// rendezvous slot or handed to several waiters.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PipelineError {
    // ========================================================================
    // Backend Errors
    // ========================================================================
    /// A backend decode call failed. Treated as permanent for the stream.
    #[error("Decode backend rejected the request: {0}")]
    BackendRejected(String),

    /// The backend could not honor a seek request.
    #[error("Seek failed: {0}")]
    SeekFailed(String),

    // ========================================================================
    // Lifecycle Errors
    // ========================================================================
    /// The operation was cancelled explicitly.
    #[error("Operation aborted")]
    Aborted,

    /// The decoder was torn down while a request was outstanding.
    #[error("Decoder is shutting down")]
    ShuttingDown,

    // ========================================================================
    // Generic Errors
    // ========================================================================
    /// Configuration failed validation.
    #[error("Invalid pipeline configuration: {0}")]
    InvalidConfig(String),

    /// Internal error (should not occur in normal operation).
    #[error("Internal error: {0}")]
    Internal(String),
}

impl PipelineError {
    /// Returns `true` if this error is the result of a cancellation or teardown
    /// rather than a failure of the media itself.
    pub fn is_cancellation(&self) -> bool {
        matches!(self, PipelineError::Aborted | PipelineError::ShuttingDown)
    }

    /// Returns `true` if the decode backend is responsible for this error.
    pub fn is_backend_failure(&self) -> bool {
        matches!(
            self,
            PipelineError::BackendRejected(_) | PipelineError::SeekFailed(_)
        )
    }
}

/// Result type for pipeline operations.
pub type Result<T> = std::result::Result<T, PipelineError>;
