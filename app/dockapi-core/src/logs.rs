//! Container log streaming.

use crate::error::CoreError;
use bytes::Bytes;
use dockapi_engine::{ContainerEngine, LogOptions, ManagedContainer};
use futures::stream::{BoxStream, Stream, StreamExt};
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

/// Log retrieval parameters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LogRequest {
    /// Only the last N lines.
    pub tail: Option<usize>,
    /// Keep streaming new output until the caller goes away or the
    /// container stops.
    pub follow: bool,
}

/// A stream of log chunks.
///
/// Finite when not following. Dropping the feed drops the engine
/// subscription with it.
pub struct LogFeed {
    inner: BoxStream<'static, Result<Bytes, CoreError>>,
    follow: bool,
}

impl LogFeed {
    /// Returns true if this feed follows live output.
    #[must_use]
    pub const fn is_follow(&self) -> bool {
        self.follow
    }
}

impl std::fmt::Debug for LogFeed {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LogFeed")
            .field("follow", &self.follow)
            .finish_non_exhaustive()
    }
}

impl Stream for LogFeed {
    type Item = Result<Bytes, CoreError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.inner.poll_next_unpin(cx)
    }
}

/// Opens log feeds through the engine.
#[derive(Clone)]
pub struct LogStreamer {
    engine: Arc<dyn ContainerEngine>,
}

impl LogStreamer {
    /// Creates a streamer over `engine`.
    #[must_use]
    pub fn new(engine: Arc<dyn ContainerEngine>) -> Self {
        Self { engine }
    }

    /// Opens a feed for an already resolved container.
    #[must_use]
    pub fn open(&self, container: &ManagedContainer, request: LogRequest) -> LogFeed {
        tracing::debug!(
            container_id = %container.id,
            tail = ?request.tail,
            follow = request.follow,
            "opening log feed"
        );

        let options = LogOptions {
            tail: request.tail,
            follow: request.follow,
        };
        let inner = self
            .engine
            .logs(&container.id, options)
            .map(|chunk| chunk.map_err(CoreError::from))
            .boxed();

        LogFeed {
            inner,
            follow: request.follow,
        }
    }
}
