//! Error types for the engine adapter.

use thiserror::Error;

/// Result type alias for engine operations.
pub type Result<T> = std::result::Result<T, EngineError>;

/// Errors reported by a [`ContainerEngine`](crate::ContainerEngine).
#[derive(Debug, Clone, Error)]
pub enum EngineError {
    /// Container or image does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// The engine refused the operation because of existing state
    /// (name already taken, container not in the right state).
    #[error("conflict: {0}")]
    Conflict(String),

    /// The requested host port could not be bound.
    #[error("port conflict: {0}")]
    PortConflict(String),

    /// The engine rejected the request parameters.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// The engine could not be reached or the connection dropped mid-call.
    #[error("engine unavailable: {0}")]
    Unavailable(String),

    /// Any other engine-side failure.
    #[error("engine error: {0}")]
    Engine(String),
}

impl EngineError {
    /// Creates a new not found error.
    #[must_use]
    pub fn not_found(resource: impl Into<String>) -> Self {
        Self::NotFound(resource.into())
    }

    /// Returns true if this is a not found error.
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }

    /// Returns true if the engine connection itself failed.
    #[must_use]
    pub const fn is_unavailable(&self) -> bool {
        matches!(self, Self::Unavailable(_))
    }
}
