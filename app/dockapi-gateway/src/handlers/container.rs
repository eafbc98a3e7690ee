use crate::api::AppState;
use crate::error::Result;
use crate::types::{ContainerInfo, RemoveQuery, RemoveResponse, RunContainerRequest, StatusResponse};
use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{Path, Query, State};
use axum::Json;
use dockapi_core::RunSpec;
use dockapi_engine::{ContainerId, ContainerStatus};

/// List managed containers.
pub async fn list_containers(State(state): State<AppState>) -> Result<Json<Vec<ContainerInfo>>> {
    let containers = state.runtime.list().await?;
    Ok(Json(containers.into_iter().map(ContainerInfo::from).collect()))
}

/// Launch a managed container, optionally waiting for readiness.
///
/// A client that disconnects during the readiness wait cancels it; the
/// container itself is left running.
pub async fn run_container(
    State(state): State<AppState>,
    payload: std::result::Result<Json<RunContainerRequest>, JsonRejection>,
) -> Result<Json<ContainerInfo>> {
    let Json(request) = payload?;
    let spec = RunSpec::try_from(request)?;

    let cancel = state.runtime.request_token();
    let _guard = cancel.clone().drop_guard();
    let container = state.runtime.run(spec, &cancel).await?;
    Ok(Json(container.into()))
}

/// Inspect a managed container.
pub async fn inspect_container(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ContainerInfo>> {
    let container = state.runtime.inspect(&ContainerId::from(id.as_str())).await?;
    Ok(Json(container.into()))
}

/// Start a stopped container on its recorded host port.
pub async fn start_container(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<StatusResponse>> {
    let container = state.runtime.start(&ContainerId::from(id.as_str())).await?;
    Ok(Json(StatusResponse {
        id: container.id.to_string(),
        status: container.status.to_string(),
    }))
}

/// Stop a container.
pub async fn stop_container(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<StatusResponse>> {
    let id = state.runtime.stop(&ContainerId::from(id.as_str())).await?;
    Ok(Json(StatusResponse {
        id: id.to_string(),
        status: ContainerStatus::Stopped.to_string(),
    }))
}

/// Remove a container and release its host port.
pub async fn remove_container(
    State(state): State<AppState>,
    Path(id): Path<String>,
    query: std::result::Result<Query<RemoveQuery>, QueryRejection>,
) -> Result<Json<RemoveResponse>> {
    let Query(query) = query?;
    let id = state
        .runtime
        .remove(&ContainerId::from(id.as_str()), query.force)
        .await?;
    Ok(Json(RemoveResponse {
        id: id.to_string(),
        removed: true,
    }))
}
