//! Container engine contract.

use crate::error::Result;
use crate::labels::ManagedLabels;
use crate::state::{ContainerId, ContainerSnapshot, CreateSpec};
use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
use serde::Serialize;
use std::collections::BTreeMap;
use std::time::Duration;

/// Stream of raw log chunks.
pub type LogStream = BoxStream<'static, Result<Bytes>>;

/// Log retrieval options.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LogOptions {
    /// Only the last N lines.
    pub tail: Option<usize>,
    /// Keep the stream open and yield new output as it is produced.
    pub follow: bool,
}

/// A command to run inside a container.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecSpec {
    /// Argument vector; `argv[0]` is the program.
    pub argv: Vec<String>,
    /// Working directory inside the container.
    pub workdir: Option<String>,
    /// Environment overrides.
    pub env: BTreeMap<String, String>,
    /// Allocate a TTY (merges stderr into stdout).
    pub tty: bool,
}

/// Raw exec outcome.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecOutput {
    /// Exit code reported by the engine.
    pub exit_code: i64,
    /// Captured standard output.
    pub stdout: Vec<u8>,
    /// Captured standard error; `None` in TTY mode.
    pub stderr: Option<Vec<u8>>,
}

/// Local image summary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ImageSummary {
    /// Short image ID without the `sha256:` prefix.
    pub id: String,
    /// Repository tags.
    pub repo_tags: Vec<String>,
    /// Size in bytes.
    pub size: i64,
}

/// Primitive container lifecycle and introspection operations.
///
/// This trait abstracts the container engine, allowing different
/// implementations (Docker over its API socket, an in-memory fake for
/// testing). Every operation addresses containers by an opaque
/// [`ContainerId`]; names are accepted wherever the engine accepts them.
#[async_trait]
pub trait ContainerEngine: Send + Sync {
    /// Checks that the engine is reachable.
    async fn ping(&self) -> Result<()>;

    /// Creates (but does not start) a container.
    async fn create(&self, spec: &CreateSpec) -> Result<ContainerId>;

    /// Starts a container.
    async fn start(&self, id: &ContainerId) -> Result<()>;

    /// Stops a container, killing it after `timeout`.
    async fn stop(&self, id: &ContainerId, timeout: Duration) -> Result<()>;

    /// Removes a container.
    async fn remove(&self, id: &ContainerId, force: bool) -> Result<()>;

    /// Returns a fresh snapshot of a container.
    async fn inspect(&self, id: &ContainerId) -> Result<ContainerSnapshot>;

    /// Lists every container (running or not) carrying `label_filter`
    /// (`key=value`).
    async fn list_by_label(&self, label_filter: &str) -> Result<Vec<ContainerSnapshot>>;

    /// Lists every container carrying the managed marker label.
    async fn list_managed(&self) -> Result<Vec<ContainerSnapshot>> {
        self.list_by_label(&ManagedLabels::marker_filter()).await
    }

    /// Streams container logs.
    ///
    /// Dropping the returned stream must release the engine-side
    /// subscription.
    fn logs(&self, id: &ContainerId, options: LogOptions) -> LogStream;

    /// Runs a command inside a running container and collects its output.
    ///
    /// A command that runs and exits non-zero is a successful call; errors
    /// are reserved for failures of the exec mechanism itself.
    async fn exec(&self, id: &ContainerId, spec: &ExecSpec) -> Result<ExecOutput>;

    /// Lists local images.
    async fn list_images(&self) -> Result<Vec<ImageSummary>>;

    /// Pulls an image and returns its ID.
    async fn pull_image(&self, reference: &str) -> Result<String>;
}
