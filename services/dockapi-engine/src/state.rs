//! Managed container state.

use crate::labels::ManagedLabels;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::collections::HashMap;
use thiserror::Error;

/// Container identifier as assigned by the engine.
///
/// Engine lookups also accept container names, so a `ContainerId` built from
/// user input may hold a name until it is resolved against the engine.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContainerId(String);

impl ContainerId {
    /// Creates a container ID from a string.
    #[must_use]
    pub fn from_string(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    /// Returns the ID as a string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns the first 12 characters, the way engines display IDs.
    #[must_use]
    pub fn short(&self) -> &str {
        self.0.get(..12).unwrap_or(&self.0)
    }
}

impl std::fmt::Display for ContainerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for ContainerId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Container status as reported by the engine.
///
/// Never cached beyond a single request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContainerStatus {
    /// Created but never started.
    Created,
    /// Running (or restarting under a restart policy).
    Running,
    /// Paused, exited or dead.
    Stopped,
    /// Being removed, or gone.
    Removed,
}

impl ContainerStatus {
    /// Maps an engine state string (`running`, `exited`, ...) to a status.
    #[must_use]
    pub fn from_engine_state(state: &str) -> Self {
        match state.to_ascii_lowercase().as_str() {
            "created" => Self::Created,
            "running" | "restarting" => Self::Running,
            "paused" | "exited" | "dead" => Self::Stopped,
            _ => Self::Removed,
        }
    }

    /// Returns the lowercase wire name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Running => "running",
            Self::Stopped => "stopped",
            Self::Removed => "removed",
        }
    }
}

impl std::fmt::Display for ContainerStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single published TCP port: `host_port` on the loopback address forwards
/// to `container_port` inside the container.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PortBinding {
    /// Host-side port.
    pub host_port: u16,
    /// Container-side port.
    pub container_port: u16,
}

impl PortBinding {
    /// Engine port key, e.g. `80/tcp`.
    #[must_use]
    pub fn port_key(&self) -> String {
        format!("{}/tcp", self.container_port)
    }
}

/// Volume access mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VolumeMode {
    /// Read-only.
    Ro,
    /// Read-write.
    #[default]
    Rw,
}

impl VolumeMode {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Ro => "ro",
            Self::Rw => "rw",
        }
    }
}

/// Error returned for a volume spec that cannot be parsed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("malformed volume spec {spec:?}: expected host_path:container_path[:ro|rw]")]
pub struct VolumeSpecError {
    /// The offending input.
    pub spec: String,
}

/// A bind mount from the host into the container.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolumeMount {
    /// Host path (may carry a Windows drive letter).
    pub host_path: String,
    /// Absolute path inside the container.
    pub container_path: String,
    /// Access mode.
    pub mode: VolumeMode,
}

impl VolumeMount {
    /// Parses `host_path:container_path[:ro|rw]`.
    ///
    /// Splitting happens from the right so `C:/data:/data:ro` keeps its drive
    /// letter on the host side.
    ///
    /// # Errors
    ///
    /// Returns [`VolumeSpecError`] when either side is missing or the
    /// container path is not absolute.
    pub fn parse(spec: &str) -> Result<Self, VolumeSpecError> {
        let malformed = || VolumeSpecError {
            spec: spec.to_string(),
        };

        let (rest, mode) = match spec.rsplit_once(':') {
            Some((rest, mode)) if mode.eq_ignore_ascii_case("ro") => (rest, VolumeMode::Ro),
            Some((rest, mode)) if mode.eq_ignore_ascii_case("rw") => (rest, VolumeMode::Rw),
            _ => (spec, VolumeMode::Rw),
        };
        let (host_path, container_path) = rest.rsplit_once(':').ok_or_else(malformed)?;

        if host_path.is_empty() || !container_path.starts_with('/') {
            return Err(malformed());
        }

        Ok(Self {
            host_path: host_path.to_string(),
            container_path: container_path.to_string(),
            mode,
        })
    }

    /// Engine bind string, `host:container:mode`.
    #[must_use]
    pub fn to_bind(&self) -> String {
        format!(
            "{}:{}:{}",
            self.host_path,
            self.container_path,
            self.mode.as_str()
        )
    }
}

/// Container restart policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RestartPolicy {
    /// Never restart.
    #[default]
    No,
    /// Restart on non-zero exit.
    OnFailure,
    /// Always restart.
    Always,
    /// Restart unless explicitly stopped.
    UnlessStopped,
}

/// Appends `:latest` to an image reference that carries neither a tag nor
/// a digest.
///
/// Only the last path segment is inspected, so a registry port
/// (`localhost:5000/app`) is not mistaken for a tag.
#[must_use]
pub fn normalize_image(reference: &str) -> String {
    let last = reference.rsplit('/').next().unwrap_or(reference);
    if last.contains(':') || last.contains('@') {
        reference.to_string()
    } else {
        format!("{reference}:latest")
    }
}

/// Creation-time configuration handed to [`ContainerEngine::create`](crate::ContainerEngine::create).
#[derive(Debug, Clone, Default)]
pub struct CreateSpec {
    /// Fully-qualified image reference.
    pub image: String,
    /// Optional container name.
    pub name: Option<String>,
    /// Command override, already tokenized.
    pub command: Option<Vec<String>>,
    /// Environment variables.
    pub env: BTreeMap<String, String>,
    /// Bind mounts.
    pub volumes: Vec<VolumeMount>,
    /// Network to attach to.
    pub network: Option<String>,
    /// The single published TCP port.
    pub port: PortBinding,
    /// Host address the port is bound on.
    pub host_ip: String,
    /// Raw labels (the managed schema, rendered).
    pub labels: HashMap<String, String>,
    /// Remove the container when it exits.
    pub auto_remove: bool,
    /// Restart policy.
    pub restart_policy: RestartPolicy,
}

/// Point-in-time view of a container as reported by the engine.
#[derive(Debug, Clone, Default)]
pub struct ContainerSnapshot {
    /// Full engine ID.
    pub id: String,
    /// Name without the leading slash.
    pub name: Option<String>,
    /// Image reference from the container config.
    pub image: String,
    /// Raw engine state string.
    pub state: String,
    /// Raw labels.
    pub labels: HashMap<String, String>,
    /// Configured command.
    pub command: Option<Vec<String>>,
    /// `KEY=VALUE` environment entries.
    pub env: Vec<String>,
    /// Bind strings.
    pub binds: Vec<String>,
    /// Network mode.
    pub network: Option<String>,
    /// TCP port mappings reported by the engine.
    pub ports: Vec<PortBinding>,
}

impl ContainerSnapshot {
    /// Engine-sourced status.
    #[must_use]
    pub fn status(&self) -> ContainerStatus {
        ContainerStatus::from_engine_state(&self.state)
    }

    /// Host port currently mapped to `container_port`, if any.
    #[must_use]
    pub fn host_port_for(&self, container_port: u16) -> Option<u16> {
        self.ports
            .iter()
            .find(|p| p.container_port == container_port)
            .map(|p| p.host_port)
    }
}

/// Reasons a snapshot cannot be adopted as a [`ManagedContainer`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AdoptError {
    /// The marker label is missing or the label schema is broken.
    #[error("container {0} is not managed by dockapi")]
    Unmanaged(String),

    /// The engine reports no host binding for the managed container port.
    #[error("container {id} publishes no host port for {container_port}/tcp")]
    NoHostPort {
        /// Container ID.
        id: String,
        /// The managed container port.
        container_port: u16,
    },
}

/// A container created and labeled by this service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManagedContainer {
    /// Engine-assigned ID.
    pub id: ContainerId,
    /// Optional human label.
    pub name: Option<String>,
    /// Image reference.
    pub image: String,
    /// Command override.
    pub command: Option<Vec<String>>,
    /// Environment.
    pub env: BTreeMap<String, String>,
    /// Bind mounts.
    pub volumes: Vec<VolumeMount>,
    /// Attached network.
    pub network: Option<String>,
    /// Published container port.
    pub container_port: u16,
    /// Loopback port bound to `container_port`; fixed for the container's lifetime.
    pub host_port: u16,
    /// Engine-sourced status.
    pub status: ContainerStatus,
    /// Managed label schema.
    pub labels: ManagedLabels,
}

impl ManagedContainer {
    /// Adopts an engine snapshot, reconstructing the host port binding from
    /// the engine's reported port mappings.
    ///
    /// # Errors
    ///
    /// Returns [`AdoptError`] if the container is not managed or has no host
    /// binding for its managed port.
    pub fn from_snapshot(snapshot: ContainerSnapshot) -> Result<Self, AdoptError> {
        let labels = ManagedLabels::from_map(&snapshot.labels)
            .ok_or_else(|| AdoptError::Unmanaged(snapshot.id.clone()))?;
        let host_port = snapshot
            .host_port_for(labels.container_port)
            .ok_or_else(|| AdoptError::NoHostPort {
                id: snapshot.id.clone(),
                container_port: labels.container_port,
            })?;

        let env = snapshot
            .env
            .iter()
            .filter_map(|entry| entry.split_once('='))
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        let volumes = snapshot
            .binds
            .iter()
            .filter_map(|bind| VolumeMount::parse(bind).ok())
            .collect();
        let status = snapshot.status();

        Ok(Self {
            id: ContainerId::from_string(snapshot.id),
            name: labels.name.clone().or(snapshot.name),
            image: snapshot.image,
            command: snapshot.command,
            env,
            volumes,
            network: snapshot.network,
            container_port: labels.container_port,
            host_port,
            status,
            labels,
        })
    }

    /// Returns the port binding owned by this container.
    #[must_use]
    pub const fn binding(&self) -> PortBinding {
        PortBinding {
            host_port: self.host_port,
            container_port: self.container_port,
        }
    }

    /// Returns whether the container is running.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.status == ContainerStatus::Running
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::labels::MANAGED_LABEL;

    #[test]
    fn volume_parse_keeps_windows_drive_letter() {
        let mount = VolumeMount::parse("C:/data:/data:ro").unwrap();
        assert_eq!(mount.host_path, "C:/data");
        assert_eq!(mount.container_path, "/data");
        assert_eq!(mount.mode, VolumeMode::Ro);

        let mount = VolumeMount::parse("C:/data:/data").unwrap();
        assert_eq!(mount.host_path, "C:/data");
        assert_eq!(mount.mode, VolumeMode::Rw);
    }

    #[test]
    fn create_spec_default_has_no_published_port() {
        let spec = CreateSpec::default();
        assert_eq!(spec.port, PortBinding::default());
        assert_eq!(spec.port.host_port, 0);
        assert_eq!(spec.port.port_key(), "0/tcp");
        assert_eq!(spec.restart_policy, RestartPolicy::No);
    }

    #[test]
    fn volume_parse_defaults_to_rw() {
        let mount = VolumeMount::parse("/host/logs:/container/logs").unwrap();
        assert_eq!(mount.to_bind(), "/host/logs:/container/logs:rw");
    }

    #[test]
    fn volume_parse_rejects_malformed() {
        assert!(VolumeMount::parse("/just-one-path").is_err());
        assert!(VolumeMount::parse(":/data").is_err());
        assert!(VolumeMount::parse("/host:relative").is_err());
        assert!(VolumeMount::parse("/host:/data:xx").is_err());
    }

    #[test]
    fn normalize_image_appends_latest() {
        assert_eq!(normalize_image("nginx"), "nginx:latest");
        assert_eq!(normalize_image("nginx:1.25"), "nginx:1.25");
        assert_eq!(
            normalize_image("localhost:5000/app"),
            "localhost:5000/app:latest"
        );
        assert_eq!(normalize_image("app@sha256:abcd"), "app@sha256:abcd");
    }

    #[test]
    fn status_from_engine_state() {
        assert_eq!(
            ContainerStatus::from_engine_state("running"),
            ContainerStatus::Running
        );
        assert_eq!(
            ContainerStatus::from_engine_state("exited"),
            ContainerStatus::Stopped
        );
        assert_eq!(
            ContainerStatus::from_engine_state("removing"),
            ContainerStatus::Removed
        );
    }

    #[test]
    fn adopt_rebuilds_binding_from_engine_ports() {
        let labels = ManagedLabels {
            name: Some("web".to_string()),
            container_port: 80,
        };
        let snapshot = ContainerSnapshot {
            id: "abc123".to_string(),
            image: "nginx:latest".to_string(),
            state: "running".to_string(),
            labels: labels.to_map(),
            env: vec!["A=1".to_string(), "B=x=y".to_string()],
            ports: vec![PortBinding {
                host_port: 49153,
                container_port: 80,
            }],
            ..Default::default()
        };

        let container = ManagedContainer::from_snapshot(snapshot).unwrap();
        assert_eq!(container.host_port, 49153);
        assert_eq!(container.name.as_deref(), Some("web"));
        assert_eq!(container.env.get("B").map(String::as_str), Some("x=y"));
        assert!(container.is_running());
    }

    #[test]
    fn adopt_rejects_unmanaged_and_unbound() {
        let snapshot = ContainerSnapshot {
            id: "abc".to_string(),
            ..Default::default()
        };
        assert_eq!(
            ManagedContainer::from_snapshot(snapshot),
            Err(AdoptError::Unmanaged("abc".to_string()))
        );

        let mut labels = HashMap::new();
        labels.insert(MANAGED_LABEL.to_string(), "true".to_string());
        labels.insert(crate::labels::PORT_LABEL.to_string(), "8080".to_string());
        let snapshot = ContainerSnapshot {
            id: "def".to_string(),
            labels,
            ..Default::default()
        };
        assert!(matches!(
            ManagedContainer::from_snapshot(snapshot),
            Err(AdoptError::NoHostPort {
                container_port: 8080,
                ..
            })
        ));
    }
}
