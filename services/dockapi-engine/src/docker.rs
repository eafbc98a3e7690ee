//! Docker engine adapter over `bollard`.

use crate::engine::{ContainerEngine, ExecOutput, ExecSpec, ImageSummary, LogOptions, LogStream};
use crate::error::{EngineError, Result};
use crate::ports::parse_port_bindings;
use crate::state::{ContainerId, ContainerSnapshot, CreateSpec, RestartPolicy, VolumeMount};
use async_trait::async_trait;
use bollard::container::LogOutput;
use bollard::exec::{StartExecOptions, StartExecResults};
use bollard::models::{ContainerCreateBody, ExecConfig};
use bollard::query_parameters::{
    CreateContainerOptions, CreateImageOptions, InspectContainerOptions, ListContainersOptions,
    ListImagesOptions, LogsOptions, RemoveContainerOptions, StartContainerOptions,
    StopContainerOptions,
};
use bollard::Docker;
use futures::StreamExt;
use serde_json::Value;
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

// =============================================================================
// Error mapping
// =============================================================================

fn is_port_conflict(message: &str) -> bool {
    let message = message.to_ascii_lowercase();
    message.contains("port is already allocated") || message.contains("address already in use")
}

fn map_engine_error(e: bollard::errors::Error) -> EngineError {
    match e {
        bollard::errors::Error::DockerResponseServerError {
            status_code,
            message,
        } => match status_code {
            _ if is_port_conflict(&message) => EngineError::PortConflict(message),
            404 => EngineError::NotFound(message),
            409 => EngineError::Conflict(message),
            400 => EngineError::InvalidRequest(message),
            _ => EngineError::Engine(message),
        },
        // Anything that is not a daemon response failed on the way there.
        other => EngineError::Unavailable(other.to_string()),
    }
}

// =============================================================================
// Request/response translation
// =============================================================================

const fn restart_policy_name(policy: RestartPolicy) -> &'static str {
    match policy {
        RestartPolicy::No => "no",
        RestartPolicy::OnFailure => "on-failure",
        RestartPolicy::Always => "always",
        RestartPolicy::UnlessStopped => "unless-stopped",
    }
}

/// Builds the container-create document in Docker's wire format.
fn create_body(spec: &CreateSpec) -> Value {
    let port_key = spec.port.port_key();
    let env: Vec<String> = spec.env.iter().map(|(k, v)| format!("{k}={v}")).collect();
    let binds: Vec<String> = spec.volumes.iter().map(VolumeMount::to_bind).collect();

    let mut host_config = serde_json::json!({
        "PortBindings": {
            port_key.clone(): [{
                "HostIp": spec.host_ip,
                "HostPort": spec.port.host_port.to_string(),
            }]
        },
        "AutoRemove": spec.auto_remove,
        "RestartPolicy": { "Name": restart_policy_name(spec.restart_policy) },
    });
    if !binds.is_empty() {
        host_config["Binds"] = Value::from(binds);
    }
    if let Some(network) = &spec.network {
        host_config["NetworkMode"] = Value::from(network.as_str());
    }

    let mut body = serde_json::json!({
        "Image": spec.image,
        "Labels": spec.labels,
        "ExposedPorts": { port_key: {} },
        "HostConfig": host_config,
    });
    if !env.is_empty() {
        body["Env"] = Value::from(env);
    }
    if let Some(command) = &spec.command {
        body["Cmd"] = Value::from(command.clone());
    }
    body
}

fn string_list(value: &Value, pointer: &str) -> Option<Vec<String>> {
    value.pointer(pointer).and_then(Value::as_array).map(|items| {
        items
            .iter()
            .filter_map(Value::as_str)
            .map(str::to_owned)
            .collect()
    })
}

fn string_at(value: &Value, pointer: &str) -> Option<String> {
    value
        .pointer(pointer)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(str::to_owned)
}

/// Builds a snapshot from a container inspect document.
fn snapshot_from_inspect(inspect: &Value) -> ContainerSnapshot {
    let labels = inspect
        .pointer("/Config/Labels")
        .and_then(|v| serde_json::from_value::<HashMap<String, String>>(v.clone()).ok())
        .unwrap_or_default();

    ContainerSnapshot {
        id: string_at(inspect, "/Id").unwrap_or_default(),
        name: string_at(inspect, "/Name").map(|n| n.trim_start_matches('/').to_string()),
        image: string_at(inspect, "/Config/Image").unwrap_or_default(),
        state: string_at(inspect, "/State/Status").unwrap_or_default(),
        labels,
        command: string_list(inspect, "/Config/Cmd"),
        env: string_list(inspect, "/Config/Env").unwrap_or_default(),
        binds: string_list(inspect, "/HostConfig/Binds").unwrap_or_default(),
        network: string_at(inspect, "/HostConfig/NetworkMode"),
        ports: parse_port_bindings(inspect),
    }
}

// =============================================================================
// DockerEngine
// =============================================================================

/// Container engine backed by a Docker-compatible API socket.
#[derive(Clone)]
pub struct DockerEngine {
    client: Docker,
}

impl DockerEngine {
    /// Wraps an existing client.
    #[must_use]
    pub const fn new(client: Docker) -> Self {
        Self { client }
    }

    /// Connects to the engine, either at an explicit unix socket or using the
    /// platform defaults (`DOCKER_HOST`, then the standard socket).
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Unavailable`] if the client cannot be built.
    pub fn connect(socket: Option<&Path>, timeout: Duration) -> Result<Self> {
        let client = match socket {
            Some(path) => Docker::connect_with_unix(
                &path.to_string_lossy(),
                timeout.as_secs(),
                bollard::API_DEFAULT_VERSION,
            ),
            None => Docker::connect_with_local_defaults().map(|c| c.with_timeout(timeout)),
        }
        .map_err(|e| EngineError::Unavailable(format!("failed to connect to engine: {e}")))?;

        Ok(Self::new(client))
    }
}

#[async_trait]
impl ContainerEngine for DockerEngine {
    async fn ping(&self) -> Result<()> {
        self.client.ping().await.map_err(map_engine_error)?;
        Ok(())
    }

    async fn create(&self, spec: &CreateSpec) -> Result<ContainerId> {
        let body: ContainerCreateBody = serde_json::from_value(create_body(spec))
            .map_err(|e| EngineError::InvalidRequest(format!("invalid create request: {e}")))?;
        let opts = CreateContainerOptions {
            name: spec.name.clone(),
            ..Default::default()
        };

        let response = self
            .client
            .create_container(Some(opts), body)
            .await
            .map_err(map_engine_error)?;

        for warning in &response.warnings {
            tracing::warn!(container_id = %response.id, "engine warning: {}", warning);
        }
        Ok(ContainerId::from_string(response.id))
    }

    async fn start(&self, id: &ContainerId) -> Result<()> {
        self.client
            .start_container(id.as_str(), None::<StartContainerOptions>)
            .await
            .map_err(map_engine_error)
    }

    async fn stop(&self, id: &ContainerId, timeout: Duration) -> Result<()> {
        let opts = StopContainerOptions {
            t: Some(i32::try_from(timeout.as_secs()).unwrap_or(i32::MAX)),
            signal: None,
        };
        self.client
            .stop_container(id.as_str(), Some(opts))
            .await
            .map_err(map_engine_error)
    }

    async fn remove(&self, id: &ContainerId, force: bool) -> Result<()> {
        let opts = RemoveContainerOptions {
            force,
            ..Default::default()
        };
        self.client
            .remove_container(id.as_str(), Some(opts))
            .await
            .map_err(map_engine_error)
    }

    async fn inspect(&self, id: &ContainerId) -> Result<ContainerSnapshot> {
        let details = self
            .client
            .inspect_container(id.as_str(), None::<InspectContainerOptions>)
            .await
            .map_err(map_engine_error)?;
        let value = serde_json::to_value(&details)
            .map_err(|e| EngineError::Engine(format!("unreadable inspect response: {e}")))?;
        Ok(snapshot_from_inspect(&value))
    }

    async fn list_by_label(&self, label_filter: &str) -> Result<Vec<ContainerSnapshot>> {
        let mut filters: HashMap<String, Vec<String>> = HashMap::new();
        filters.insert("label".to_string(), vec![label_filter.to_string()]);
        let opts = ListContainersOptions {
            all: true,
            filters: Some(filters),
            ..Default::default()
        };

        let summaries = self
            .client
            .list_containers(Some(opts))
            .await
            .map_err(map_engine_error)?;

        let mut snapshots = Vec::with_capacity(summaries.len());
        for id in summaries.into_iter().filter_map(|s| s.id) {
            match self.inspect(&ContainerId::from_string(id)).await {
                Ok(snapshot) => snapshots.push(snapshot),
                // Removed between list and inspect.
                Err(EngineError::NotFound(_)) => {}
                Err(e) => return Err(e),
            }
        }
        Ok(snapshots)
    }

    fn logs(&self, id: &ContainerId, options: LogOptions) -> LogStream {
        let opts = LogsOptions {
            stdout: true,
            stderr: true,
            follow: options.follow,
            tail: options
                .tail
                .map_or_else(|| "all".to_string(), |n| n.to_string()),
            ..Default::default()
        };

        self.client
            .logs(id.as_str(), Some(opts))
            .map(|item| item.map(LogOutput::into_bytes).map_err(map_engine_error))
            .boxed()
    }

    async fn exec(&self, id: &ContainerId, spec: &ExecSpec) -> Result<ExecOutput> {
        let env: Vec<String> = spec.env.iter().map(|(k, v)| format!("{k}={v}")).collect();
        let config = ExecConfig {
            cmd: Some(spec.argv.clone()),
            env: if env.is_empty() { None } else { Some(env) },
            working_dir: spec.workdir.clone(),
            attach_stdout: Some(true),
            attach_stderr: Some(true),
            tty: Some(spec.tty),
            ..Default::default()
        };

        let created = self
            .client
            .create_exec(id.as_str(), config)
            .await
            .map_err(map_engine_error)?;

        let opts = StartExecOptions {
            detach: false,
            tty: spec.tty,
            ..Default::default()
        };
        let started = self
            .client
            .start_exec(&created.id, Some(opts))
            .await
            .map_err(map_engine_error)?;

        let mut stdout = Vec::new();
        let mut stderr = Vec::new();
        if let StartExecResults::Attached { mut output, .. } = started {
            while let Some(item) = output.next().await {
                match item.map_err(map_engine_error)? {
                    LogOutput::StdErr { message } => stderr.extend_from_slice(&message),
                    LogOutput::StdOut { message } | LogOutput::Console { message } => {
                        stdout.extend_from_slice(&message);
                    }
                    LogOutput::StdIn { .. } => {}
                }
            }
        }

        let inspected = self
            .client
            .inspect_exec(&created.id)
            .await
            .map_err(map_engine_error)?;
        let exit_code = inspected.exit_code.unwrap_or_else(|| {
            tracing::warn!(container_id = %id, exec_id = %created.id, "exec finished without exit code");
            -1
        });

        Ok(ExecOutput {
            exit_code,
            stdout,
            stderr: if spec.tty { None } else { Some(stderr) },
        })
    }

    async fn list_images(&self) -> Result<Vec<ImageSummary>> {
        let images = self
            .client
            .list_images(None::<ListImagesOptions>)
            .await
            .map_err(map_engine_error)?;

        Ok(images
            .into_iter()
            .map(|img| ImageSummary {
                id: img
                    .id
                    .trim_start_matches("sha256:")
                    .chars()
                    .take(12)
                    .collect(),
                repo_tags: img.repo_tags,
                size: img.size,
            })
            .collect())
    }

    async fn pull_image(&self, reference: &str) -> Result<String> {
        let opts = CreateImageOptions {
            from_image: Some(reference.to_string()),
            ..Default::default()
        };

        // Progress updates are not surfaced; drain until the pull settles.
        let mut progress = self.client.create_image(Some(opts), None, None);
        while let Some(item) = progress.next().await {
            item.map_err(map_engine_error)?;
        }

        let image = self
            .client
            .inspect_image(reference)
            .await
            .map_err(map_engine_error)?;
        Ok(image.id.unwrap_or_default())
    }
}
