//! Error types for the HTTP surface.

use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use dockapi_core::CoreError;
use serde::Serialize;
use thiserror::Error;

/// Result type alias for HTTP handlers.
pub type Result<T> = std::result::Result<T, ApiError>;

/// Non-standard status for a request abandoned before completion.
const CLIENT_CLOSED_REQUEST: u16 = 499;

/// Errors returned to HTTP clients.
#[derive(Debug, Error)]
pub enum ApiError {
    /// Invalid parameters or unsupported method.
    #[error("{0}")]
    BadRequest(String),

    /// Unknown, unmanaged or removed container.
    #[error("{0}")]
    NotFound(String),

    /// Port, name or state conflict.
    #[error("{0}")]
    Conflict(String),

    /// Upstream container unreachable.
    #[error("{0}")]
    BadGateway(String),

    /// Health probe never succeeded.
    #[error("{0}")]
    ReadinessTimeout(String),

    /// The operation was cancelled.
    #[error("{0}")]
    Cancelled(String),

    /// The exec mechanism failed.
    #[error("{0}")]
    ExecFailed(String),

    /// Engine failure.
    #[error("{0}")]
    Engine(String),
}

impl ApiError {
    /// Returns the taxonomy name reported in the `kind` field.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::BadRequest(_) => "bad_request",
            Self::NotFound(_) => "not_found",
            Self::Conflict(_) => "conflict",
            Self::BadGateway(_) => "bad_gateway",
            Self::ReadinessTimeout(_) => "readiness_timeout",
            Self::Cancelled(_) => "cancelled",
            Self::ExecFailed(_) => "exec_failed",
            Self::Engine(_) => "engine_error",
        }
    }

    /// Returns the HTTP status code for this error.
    #[must_use]
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Conflict(_) => StatusCode::CONFLICT,
            Self::BadGateway(_) => StatusCode::BAD_GATEWAY,
            Self::ReadinessTimeout(_) => StatusCode::GATEWAY_TIMEOUT,
            Self::Cancelled(_) => StatusCode::from_u16(CLIENT_CLOSED_REQUEST)
                .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR),
            Self::ExecFailed(_) | Self::Engine(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<CoreError> for ApiError {
    fn from(err: CoreError) -> Self {
        let detail = err.to_string();
        match err {
            CoreError::BadRequest(_) | CoreError::PortUnavailable(_) => Self::BadRequest(detail),
            CoreError::NotFound(_) => Self::NotFound(detail),
            CoreError::Conflict(_) => Self::Conflict(detail),
            CoreError::BadGateway(_) => Self::BadGateway(detail),
            CoreError::ReadinessTimeout { .. } => Self::ReadinessTimeout(detail),
            CoreError::Cancelled(_) => Self::Cancelled(detail),
            CoreError::ExecFailed(_) => Self::ExecFailed(detail),
            CoreError::Engine(_) => Self::Engine(detail),
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self::BadRequest(rejection.body_text())
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        Self::BadRequest(rejection.body_text())
    }
}

/// Error response body.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    /// Taxonomy name.
    pub kind: &'static str,
    /// Human readable message.
    pub detail: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::warn!(kind = self.kind(), "request failed: {}", self);
        } else {
            tracing::debug!(kind = self.kind(), "request rejected: {}", self);
        }
        let body = ErrorResponse {
            kind: self.kind(),
            detail: self.to_string(),
        };

        (status, axum::Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn core_errors_map_to_status() {
        let cases = [
            (CoreError::bad_request("x"), 400, "bad_request"),
            (CoreError::PortUnavailable("70000".into()), 400, "bad_request"),
            (CoreError::not_found("x"), 404, "not_found"),
            (CoreError::conflict("x"), 409, "conflict"),
            (CoreError::BadGateway("x".into()), 502, "bad_gateway"),
            (
                CoreError::ReadinessTimeout {
                    url: "http://127.0.0.1:1/".into(),
                    timeout: Duration::from_secs(1),
                    attempts: 2,
                    last_error: None,
                },
                504,
                "readiness_timeout",
            ),
            (CoreError::Cancelled("x".into()), 499, "cancelled"),
            (CoreError::ExecFailed("x".into()), 500, "exec_failed"),
            (CoreError::Engine("x".into()), 500, "engine_error"),
        ];

        for (core, status, kind) in cases {
            let err = ApiError::from(core);
            assert_eq!(err.status_code().as_u16(), status);
            assert_eq!(err.kind(), kind);
        }
    }

    #[test]
    fn detail_keeps_core_message() {
        let err = ApiError::from(CoreError::not_found("container abc not found"));
        assert!(err.to_string().contains("container abc not found"));
    }
}
