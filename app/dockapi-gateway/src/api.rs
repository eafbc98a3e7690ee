//! HTTP router.

use crate::handlers;
use crate::proxy::Forwarder;
use crate::trace::trace_id_middleware;
use axum::{
    middleware,
    routing::{any, get, post},
    Router,
};
use dockapi_core::Runtime;
use std::sync::Arc;
use tower_http::cors::CorsLayer;

/// Application state shared with handlers.
#[derive(Clone)]
pub struct AppState {
    /// Shared runtime.
    pub runtime: Arc<Runtime>,
    /// Reverse proxy client.
    pub forwarder: Forwarder,
}

/// Creates the router with all endpoints.
#[must_use]
pub fn create_router(runtime: Arc<Runtime>) -> Router {
    let forwarder = Forwarder::new(runtime.config().proxy.connect_timeout());
    let state = AppState { runtime, forwarder };

    Router::new()
        .route("/healthz", get(handlers::healthz))
        .route("/images", get(handlers::list_images))
        .route("/images/pull", post(handlers::pull_image))
        .route("/containers", get(handlers::list_containers))
        .route("/containers/run", post(handlers::run_container))
        .route(
            "/containers/:id",
            get(handlers::inspect_container).delete(handlers::remove_container),
        )
        .route("/containers/:id/start", post(handlers::start_container))
        .route("/containers/:id/stop", post(handlers::stop_container))
        .route("/containers/:id/logs", get(handlers::container_logs))
        .route("/containers/:id/exec", post(handlers::exec_container))
        .route("/proxy/:id", get(handlers::proxy_info))
        .route("/proxy/:id/", any(handlers::proxy_request))
        .route("/proxy/:id/*path", any(handlers::proxy_request))
        .layer(CorsLayer::permissive())
        .layer(middleware::from_fn(trace_id_middleware))
        .with_state(state)
}
