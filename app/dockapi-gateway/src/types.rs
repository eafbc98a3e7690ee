//! Request and response bodies.

use dockapi_core::runtime::DEFAULT_WAIT_TIMEOUT;
use dockapi_core::{CommandSpec, CoreError, ExecResult, RunSpec, Upstream};
use dockapi_engine::{ImageSummary, ManagedContainer, RestartPolicy};
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

/// Treats an explicit `null` like an absent field.
fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer).map(Option::unwrap_or_default)
}

// =============================================================================
// Containers
// =============================================================================

/// Body of `POST /containers/run`.
#[derive(Debug, Clone, Deserialize)]
pub struct RunContainerRequest {
    /// Image reference.
    pub image: String,
    /// Container port to publish.
    pub container_port: i64,
    /// Host port; absent or zero picks a free one.
    #[serde(default)]
    pub host_port: Option<i64>,
    /// Friendly name.
    #[serde(default)]
    pub name: Option<String>,
    /// Environment variables.
    #[serde(default, deserialize_with = "null_as_default")]
    pub env: BTreeMap<String, String>,
    /// Command override, string or array.
    #[serde(default)]
    pub command: Option<CommandSpec>,
    /// Remove the container when it exits.
    #[serde(default, deserialize_with = "null_as_default")]
    pub auto_remove: bool,
    /// Accepted for compatibility; containers always run detached.
    #[serde(default)]
    pub detach: Option<bool>,
    /// Restart policy.
    #[serde(default, deserialize_with = "null_as_default")]
    pub restart_policy: RestartPolicy,
    /// `host:container[:ro|rw]` bind mounts.
    #[serde(default, deserialize_with = "null_as_default")]
    pub volumes: Vec<String>,
    /// Network to attach to.
    #[serde(default)]
    pub network: Option<String>,
    /// Block until the health path answers 2xx.
    #[serde(default, deserialize_with = "null_as_default")]
    pub wait_ready: bool,
    /// Health path, `/` when absent.
    #[serde(default)]
    pub health_path: Option<String>,
    /// Readiness budget in seconds.
    #[serde(default)]
    pub wait_timeout: Option<f64>,
}

impl TryFrom<RunContainerRequest> for RunSpec {
    type Error = CoreError;

    fn try_from(req: RunContainerRequest) -> Result<Self, Self::Error> {
        let wait_timeout = match req.wait_timeout {
            None => DEFAULT_WAIT_TIMEOUT,
            Some(secs) => Duration::try_from_secs_f64(secs).map_err(|_| {
                CoreError::bad_request(format!("wait_timeout {secs} is not a valid duration"))
            })?,
        };

        Ok(Self {
            image: req.image,
            container_port: req.container_port,
            host_port: req.host_port,
            name: req.name,
            env: req.env,
            command: req.command,
            volumes: req.volumes,
            network: req.network,
            auto_remove: req.auto_remove,
            restart_policy: req.restart_policy,
            wait_ready: req.wait_ready,
            health_path: req.health_path,
            wait_timeout,
        })
    }
}

/// A managed container as reported to clients.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContainerInfo {
    /// Engine ID.
    pub id: String,
    /// Friendly name.
    pub name: Option<String>,
    /// Image reference.
    pub image: String,
    /// `created`, `running`, `stopped` or `removed`.
    pub status: String,
    /// Managed labels.
    pub labels: HashMap<String, String>,
    /// Loopback host port.
    pub host_port: u16,
    /// Published container port.
    pub container_port: u16,
}

impl From<ManagedContainer> for ContainerInfo {
    fn from(c: ManagedContainer) -> Self {
        Self {
            labels: c.labels.to_map(),
            id: c.id.to_string(),
            name: c.name,
            image: c.image,
            status: c.status.as_str().to_string(),
            host_port: c.host_port,
            container_port: c.container_port,
        }
    }
}

/// Response of start and stop.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusResponse {
    /// Engine ID.
    pub id: String,
    /// Resulting status.
    pub status: String,
}

/// Query of `DELETE /containers/:id`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RemoveQuery {
    /// Remove even if running.
    #[serde(default)]
    pub force: bool,
}

/// Response of remove.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoveResponse {
    /// Engine ID.
    pub id: String,
    /// Always true.
    pub removed: bool,
}

/// Query of `GET /containers/:id/logs`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct LogsQuery {
    /// Only the last N lines.
    #[serde(default)]
    pub tail: Option<usize>,
    /// Keep streaming.
    #[serde(default)]
    pub follow: bool,
}

// =============================================================================
// Exec
// =============================================================================

/// Body of `POST /containers/:id/exec`.
#[derive(Debug, Clone, Deserialize)]
pub struct ExecRequestBody {
    /// Command, string or array.
    pub command: CommandSpec,
    /// Working directory.
    #[serde(default)]
    pub workdir: Option<String>,
    /// Environment overrides.
    #[serde(default, deserialize_with = "null_as_default")]
    pub env: BTreeMap<String, String>,
    /// Allocate a TTY.
    #[serde(default, deserialize_with = "null_as_default")]
    pub tty: bool,
}

/// Result of a command.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecResponse {
    /// Container ID.
    pub id: String,
    /// Exit code.
    pub exit_code: i64,
    /// Standard output.
    pub stdout: String,
    /// Standard error; null in TTY mode.
    pub stderr: Option<String>,
}

impl ExecResponse {
    /// Attaches the container ID to an exec result.
    #[must_use]
    pub fn new(id: String, result: ExecResult) -> Self {
        Self {
            id,
            exit_code: result.exit_code,
            stdout: result.stdout,
            stderr: result.stderr,
        }
    }
}

// =============================================================================
// Proxy, images, system
// =============================================================================

/// Response of `GET /proxy/:id`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProxyInfo {
    /// Container ID.
    pub container_id: String,
    /// `http://127.0.0.1:<host_port>`.
    pub upstream: String,
}

impl From<&Upstream> for ProxyInfo {
    fn from(upstream: &Upstream) -> Self {
        Self {
            container_id: upstream.container.id.to_string(),
            upstream: upstream.base_url(),
        }
    }
}

/// A local image.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageInfo {
    /// Short ID.
    pub id: String,
    /// Repository tags.
    pub repo_tags: Vec<String>,
    /// Size in bytes.
    pub size: i64,
}

impl From<ImageSummary> for ImageInfo {
    fn from(image: ImageSummary) -> Self {
        Self {
            id: image.id,
            repo_tags: image.repo_tags,
            size: image.size,
        }
    }
}

/// Body of `POST /images/pull`.
#[derive(Debug, Clone, Deserialize)]
pub struct PullImageRequest {
    /// Image reference.
    pub image: String,
}

/// Response of a pull.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PullImageResponse {
    /// Pulled image ID.
    pub id: String,
}

/// Response of `GET /healthz`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    /// Engine reachable.
    pub ok: bool,
}
