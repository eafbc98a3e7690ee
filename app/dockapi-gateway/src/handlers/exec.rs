use crate::api::AppState;
use crate::error::Result;
use crate::types::{ExecRequestBody, ExecResponse};
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::Json;
use dockapi_core::ExecRequest;
use dockapi_engine::ContainerId;

/// Run a command in a running container.
///
/// A non-zero exit code is a successful response; only a broken exec
/// mechanism is an error.
pub async fn exec_container(
    State(state): State<AppState>,
    Path(id): Path<String>,
    payload: std::result::Result<Json<ExecRequestBody>, JsonRejection>,
) -> Result<Json<ExecResponse>> {
    let Json(body) = payload?;
    let request = ExecRequest::new(&body.command, body.workdir, body.env, body.tty)?;

    let cancel = state.runtime.request_token();
    let _guard = cancel.clone().drop_guard();
    let result = state
        .runtime
        .exec(&ContainerId::from(id.as_str()), &request, &cancel)
        .await?;
    Ok(Json(ExecResponse::new(id, result)))
}
