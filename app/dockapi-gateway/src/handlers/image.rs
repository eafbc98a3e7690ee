use crate::api::AppState;
use crate::error::Result;
use crate::types::{ImageInfo, PullImageRequest, PullImageResponse};
use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::Json;

/// List local images.
pub async fn list_images(State(state): State<AppState>) -> Result<Json<Vec<ImageInfo>>> {
    let images = state.runtime.list_images().await?;
    Ok(Json(images.into_iter().map(ImageInfo::from).collect()))
}

/// Pull an image.
pub async fn pull_image(
    State(state): State<AppState>,
    payload: std::result::Result<Json<PullImageRequest>, JsonRejection>,
) -> Result<Json<PullImageResponse>> {
    let Json(request) = payload?;
    let id = state.runtime.pull_image(&request.image).await?;
    Ok(Json(PullImageResponse { id }))
}
