//! Task-local trace ID for cross-layer propagation.
//!
//! The HTTP middleware scopes each request in [`CURRENT_TRACE_ID`]; runtime
//! operations read it back so their log lines carry the originating request's
//! trace ID.

tokio::task_local! {
    /// Task-local trace ID. Set by the HTTP middleware, read by the runtime.
    pub static CURRENT_TRACE_ID: String;
}

/// Returns the current trace ID, or an empty string outside a request.
pub fn current_trace_id() -> String {
    CURRENT_TRACE_ID
        .try_with(|id| id.clone())
        .unwrap_or_default()
}
