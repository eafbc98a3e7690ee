use crate::api::AppState;
use crate::error::Result;
use crate::types::HealthResponse;
use axum::extract::State;
use axum::Json;

/// Health check; fails when the engine is unreachable.
pub async fn healthz(State(state): State<AppState>) -> Result<Json<HealthResponse>> {
    state.runtime.ping().await?;
    Ok(Json(HealthResponse { ok: true }))
}
