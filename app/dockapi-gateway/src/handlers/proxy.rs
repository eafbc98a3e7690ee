use crate::api::AppState;
use crate::error::{ApiError, Result};
use crate::proxy::{ensure_forwardable, split_proxy_uri};
use crate::types::ProxyInfo;
use axum::body::Body;
use axum::extract::{OriginalUri, Path, State};
use axum::http::Request;
use axum::response::Response;
use axum::Json;
use dockapi_engine::ContainerId;

/// Report where a container is proxied to.
pub async fn proxy_info(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ProxyInfo>> {
    let upstream = state.runtime.upstream(&ContainerId::from(id.as_str())).await?;
    Ok(Json(ProxyInfo::from(&upstream)))
}

/// Forward a request to a container's published port.
///
/// The sub-path and query come from the raw request URI.
pub async fn proxy_request(
    State(state): State<AppState>,
    OriginalUri(uri): OriginalUri,
    request: Request<Body>,
) -> Result<Response> {
    ensure_forwardable(request.method())?;
    let (id, path_and_query) = split_proxy_uri(&uri)
        .ok_or_else(|| ApiError::NotFound(format!("no container in proxy path {}", uri.path())))?;

    let upstream = state.runtime.upstream(&ContainerId::from(id)).await?;
    state
        .forwarder
        .forward(&upstream, &path_and_query, request)
        .await
}
