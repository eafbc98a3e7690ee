//! Error types for the core layer.

use dockapi_engine::{EngineError, VolumeSpecError};
use std::time::Duration;
use thiserror::Error;

/// Result type alias for core operations.
pub type Result<T> = std::result::Result<T, CoreError>;

/// Errors that can occur in core operations.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Invalid parameters.
    #[error("bad request: {0}")]
    BadRequest(String),

    /// Unknown, unmanaged or removed container.
    #[error("not found: {0}")]
    NotFound(String),

    /// Port already in use, name taken, or container in the wrong state.
    #[error("conflict: {0}")]
    Conflict(String),

    /// Requested host port outside the TCP range, or no free port found.
    #[error("port unavailable: {0}")]
    PortUnavailable(String),

    /// Upstream unreachable or failing at the transport level.
    #[error("bad gateway: {0}")]
    BadGateway(String),

    /// The health probe never succeeded within its budget.
    #[error("readiness timeout: {url} did not return 2xx within {timeout:?} ({attempts} attempts)")]
    ReadinessTimeout {
        /// Probed URL.
        url: String,
        /// Configured budget.
        timeout: Duration,
        /// Attempts made.
        attempts: u32,
        /// Outcome of the final attempt.
        last_error: Option<String>,
    },

    /// The caller went away.
    #[error("cancelled: {0}")]
    Cancelled(String),

    /// The exec mechanism itself could not be invoked.
    #[error("exec failed: {0}")]
    ExecFailed(String),

    /// The container engine failed unexpectedly.
    #[error("engine error: {0}")]
    Engine(String),
}

impl CoreError {
    /// Creates a new bad request error.
    #[must_use]
    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::BadRequest(msg.into())
    }

    /// Creates a new not found error.
    #[must_use]
    pub fn not_found(resource: impl Into<String>) -> Self {
        Self::NotFound(resource.into())
    }

    /// Creates a new conflict error.
    #[must_use]
    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }

    /// Returns true if this is a not found error.
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

impl From<EngineError> for CoreError {
    fn from(err: EngineError) -> Self {
        match err {
            EngineError::NotFound(msg) => Self::NotFound(msg),
            EngineError::Conflict(msg) | EngineError::PortConflict(msg) => Self::Conflict(msg),
            EngineError::InvalidRequest(msg) => Self::BadRequest(msg),
            EngineError::Unavailable(msg) | EngineError::Engine(msg) => Self::Engine(msg),
        }
    }
}

impl From<VolumeSpecError> for CoreError {
    fn from(err: VolumeSpecError) -> Self {
        Self::BadRequest(err.to_string())
    }
}
