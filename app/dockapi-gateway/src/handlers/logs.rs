use crate::api::AppState;
use crate::error::{ApiError, Result};
use crate::types::LogsQuery;
use axum::body::Body;
use axum::extract::rejection::QueryRejection;
use axum::extract::{Path, Query, State};
use axum::http::header;
use axum::response::Response;
use bytes::Bytes;
use dockapi_core::{LogFeed, LogRequest};
use dockapi_engine::ContainerId;
use futures::StreamExt;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;

/// Chunks buffered between the engine feed and a slow client.
const LOG_CHANNEL_CAPACITY: usize = 64;

/// Stream container logs as plain text.
///
/// The feed is pumped from a separate task so that a client disconnect is
/// noticed even while the container is silent, and the engine subscription
/// is dropped with it.
pub async fn container_logs(
    State(state): State<AppState>,
    Path(id): Path<String>,
    query: std::result::Result<Query<LogsQuery>, QueryRejection>,
) -> Result<Response> {
    let Query(query) = query?;
    let id = ContainerId::from(id.as_str());
    let feed = state
        .runtime
        .logs(
            &id,
            LogRequest {
                tail: query.tail,
                follow: query.follow,
            },
        )
        .await?;

    let (tx, rx) = mpsc::channel(LOG_CHANNEL_CAPACITY);
    tokio::spawn(pump(id, feed, tx, state.runtime.request_token()));

    Response::builder()
        .header(header::CONTENT_TYPE, "text/plain; charset=utf-8")
        .body(Body::from_stream(ReceiverStream::new(rx)))
        .map_err(|e| ApiError::Engine(format!("failed to build log response: {e}")))
}

async fn pump(
    id: ContainerId,
    mut feed: LogFeed,
    tx: mpsc::Sender<std::io::Result<Bytes>>,
    shutdown: CancellationToken,
) {
    loop {
        tokio::select! {
            () = tx.closed() => {
                tracing::debug!(container_id = %id, "log client disconnected");
                break;
            }
            () = shutdown.cancelled() => break,
            chunk = feed.next() => match chunk {
                Some(Ok(bytes)) => {
                    if tx.send(Ok(bytes)).await.is_err() {
                        break;
                    }
                }
                Some(Err(e)) => {
                    tracing::warn!(container_id = %id, "log stream failed: {}", e);
                    let _ = tx.send(Err(std::io::Error::other(e.to_string()))).await;
                    break;
                }
                None => break,
            },
        }
    }
    tracing::debug!(container_id = %id, follow = feed.is_follow(), "log feed closed");
}
