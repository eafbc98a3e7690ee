//! Runtime orchestration.
//!
//! [`Runtime`] is the explicit state handle shared by every request. It owns
//! the engine connection, the port registry and the components built on
//! them, and composes them into the container lifecycle operations.

use crate::config::Config;
use crate::error::{CoreError, Result};
use crate::exec::{CommandSpec, ExecInvoker, ExecRequest, ExecResult};
use crate::logs::{LogFeed, LogRequest, LogStreamer};
use crate::port::PortAllocator;
use crate::readiness::{ReadinessCheck, ReadinessProber};
use crate::registry::ContainerRegistry;
use crate::trace::current_trace_id;
use dockapi_engine::{
    normalize_image, ContainerEngine, ContainerId, ContainerSnapshot, ContainerStatus, CreateSpec,
    EngineError, ImageSummary, ManagedContainer, ManagedLabels, PortBinding, RestartPolicy,
    VolumeMount,
};
use std::collections::{BTreeMap, HashSet};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Default readiness budget.
pub const DEFAULT_WAIT_TIMEOUT: Duration = Duration::from_secs(30);

/// Parameters for launching a managed container.
#[derive(Debug, Clone)]
pub struct RunSpec {
    /// Image reference; `:latest` is appended when untagged.
    pub image: String,
    /// Container port to publish (TCP).
    pub container_port: i64,
    /// Host port to bind; absent or zero picks a free one.
    pub host_port: Option<i64>,
    /// Optional friendly name.
    pub name: Option<String>,
    /// Environment variables.
    pub env: BTreeMap<String, String>,
    /// Command override.
    pub command: Option<CommandSpec>,
    /// `host_path:container_path[:ro|rw]` bind strings.
    pub volumes: Vec<String>,
    /// Network to attach to.
    pub network: Option<String>,
    /// Remove the container when it exits.
    pub auto_remove: bool,
    /// Restart policy.
    pub restart_policy: RestartPolicy,
    /// Block until the health path answers 2xx.
    pub wait_ready: bool,
    /// Path probed when waiting; `/` when absent.
    pub health_path: Option<String>,
    /// Readiness budget.
    pub wait_timeout: Duration,
}

impl Default for RunSpec {
    fn default() -> Self {
        Self {
            image: String::new(),
            container_port: 0,
            host_port: None,
            name: None,
            env: BTreeMap::new(),
            command: None,
            volumes: Vec::new(),
            network: None,
            auto_remove: false,
            restart_policy: RestartPolicy::No,
            wait_ready: false,
            health_path: None,
            wait_timeout: DEFAULT_WAIT_TIMEOUT,
        }
    }
}

/// Where a managed container can be reached.
#[derive(Debug, Clone)]
pub struct Upstream {
    /// The resolved container.
    pub container: ManagedContainer,
    /// Host address of its published port.
    pub address: SocketAddr,
}

impl Upstream {
    /// `http://<address>` without a trailing slash.
    #[must_use]
    pub fn base_url(&self) -> String {
        format!("http://{}", self.address)
    }
}

/// Shared runtime state.
pub struct Runtime {
    config: Config,
    engine: Arc<dyn ContainerEngine>,
    registry: Arc<ContainerRegistry>,
    ports: PortAllocator,
    prober: ReadinessProber,
    exec: ExecInvoker,
    logs: LogStreamer,
    shutdown: CancellationToken,
}

impl Runtime {
    /// Creates a runtime over `engine`.
    ///
    /// # Errors
    ///
    /// Returns an error if the readiness HTTP client cannot be built.
    pub fn new(config: Config, engine: Arc<dyn ContainerEngine>) -> Result<Self> {
        let prober = ReadinessProber::new(&config.readiness)?;
        Ok(Self {
            ports: PortAllocator::new(config.ports.bind_address),
            registry: Arc::new(ContainerRegistry::new()),
            exec: ExecInvoker::new(Arc::clone(&engine)),
            logs: LogStreamer::new(Arc::clone(&engine)),
            prober,
            engine,
            config,
            shutdown: CancellationToken::new(),
        })
    }

    /// Returns the configuration.
    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Returns the engine.
    #[must_use]
    pub fn engine(&self) -> &Arc<dyn ContainerEngine> {
        &self.engine
    }

    /// Returns the port registry.
    #[must_use]
    pub fn registry(&self) -> &Arc<ContainerRegistry> {
        &self.registry
    }

    /// Token cancelled when the runtime shuts down.
    #[must_use]
    pub fn shutdown_token(&self) -> &CancellationToken {
        &self.shutdown
    }

    /// A fresh token for one request; cancelled on shutdown as well.
    #[must_use]
    pub fn request_token(&self) -> CancellationToken {
        self.shutdown.child_token()
    }

    /// Cancels every in-flight readiness wait, exec and log feed.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    /// Address a host port is reachable on from this process.
    fn upstream_address(&self, host_port: u16) -> SocketAddr {
        let ip = match self.ports.bind_address() {
            ip if ip.is_unspecified() => IpAddr::V4(Ipv4Addr::LOCALHOST),
            ip => ip,
        };
        SocketAddr::new(ip, host_port)
    }

    // =========================================================================
    // Engine passthroughs
    // =========================================================================

    /// Checks the engine connection.
    pub async fn ping(&self) -> Result<()> {
        self.engine.ping().await.map_err(CoreError::from)
    }

    /// Lists local images.
    pub async fn list_images(&self) -> Result<Vec<ImageSummary>> {
        Ok(self.engine.list_images().await?)
    }

    /// Pulls an image, appending `:latest` when untagged.
    pub async fn pull_image(&self, reference: &str) -> Result<String> {
        let reference = reference.trim();
        if reference.is_empty() {
            return Err(CoreError::bad_request("image must not be empty"));
        }
        let reference = normalize_image(reference);
        tracing::info!(image = %reference, "pulling image");
        Ok(self.engine.pull_image(&reference).await?)
    }

    // =========================================================================
    // Resolution
    // =========================================================================

    /// Turns an engine snapshot into a managed container, preferring the
    /// recorded host port and recording it when missing.
    fn adopt(&self, requested: &ContainerId, mut snapshot: ContainerSnapshot) -> Result<ManagedContainer> {
        let id = ContainerId::from_string(snapshot.id.clone());
        if snapshot.status() == ContainerStatus::Removed {
            self.registry.forget(&id);
            return Err(CoreError::not_found(format!(
                "container {requested} has been removed"
            )));
        }

        let labels = ManagedLabels::from_map(&snapshot.labels).ok_or_else(|| {
            CoreError::not_found(format!("container {requested} is not managed by dockapi"))
        })?;

        if let Some(recorded) = self.registry.binding(&id) {
            snapshot
                .ports
                .retain(|p| p.container_port != labels.container_port);
            snapshot.ports.push(recorded);
        }

        let container = ManagedContainer::from_snapshot(snapshot)
            .map_err(|e| CoreError::not_found(e.to_string()))?;
        if self.registry.binding(&container.id).is_none() {
            self.registry.record_container(&container);
        }
        Ok(container)
    }

    /// Resolves an ID or name to a managed container with fresh status.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::NotFound`] for unknown, unmanaged or removed
    /// containers.
    pub async fn resolve(&self, id: &ContainerId) -> Result<ManagedContainer> {
        let snapshot = match self.engine.inspect(id).await {
            Ok(snapshot) => snapshot,
            Err(EngineError::NotFound(_)) => {
                self.registry.forget(id);
                return Err(CoreError::not_found(format!("container {id} not found")));
            }
            Err(e) => return Err(e.into()),
        };
        self.adopt(id, snapshot)
    }

    /// Resolves a container and the address of its published port.
    pub async fn upstream(&self, id: &ContainerId) -> Result<Upstream> {
        let container = self.resolve(id).await?;
        Ok(Upstream {
            address: self.upstream_address(container.host_port),
            container,
        })
    }

    /// Rebuilds the registry from the engine's managed containers and their
    /// reported port mappings.
    ///
    /// Returns the number of containers adopted.
    pub async fn reconcile(&self) -> Result<usize> {
        let snapshots = self.engine.list_managed().await?;
        let mut adopted = Vec::with_capacity(snapshots.len());

        for snapshot in snapshots {
            if snapshot.status() == ContainerStatus::Removed {
                continue;
            }
            let id = snapshot.id.clone();
            match ManagedContainer::from_snapshot(snapshot) {
                Ok(container) => adopted.push((container.id.clone(), container.binding())),
                Err(e) => tracing::warn!(container_id = %id, "skipping container: {}", e),
            }
        }

        let count = adopted.len();
        self.registry.replace_all(adopted);
        tracing::info!(containers = count, "reconciled managed containers");
        Ok(count)
    }

    /// Releases bindings of containers the engine no longer knows about,
    /// e.g. auto-removed on exit or deleted outside the gateway.
    ///
    /// Returns the number of bindings released.
    pub async fn release_vanished(&self) -> Result<usize> {
        let recorded = self.registry.ids();
        if recorded.is_empty() {
            return Ok(0);
        }
        let live: HashSet<ContainerId> = self
            .engine
            .list_managed()
            .await?
            .into_iter()
            .filter(|s| s.status() != ContainerStatus::Removed)
            .map(|s| ContainerId::from_string(s.id))
            .collect();

        let released = self
            .registry
            .release_where(&recorded, |id| !live.contains(id));
        for (id, binding) in &released {
            tracing::debug!(
                container_id = %id,
                host_port = binding.host_port,
                "released binding of vanished container"
            );
        }
        Ok(released.len())
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Launches a managed container.
    ///
    /// Validates the request, allocates a host port, creates and starts the
    /// container, records its binding and optionally waits for readiness.
    /// A readiness failure leaves the container in place.
    ///
    /// # Errors
    ///
    /// - [`CoreError::BadRequest`] for invalid parameters.
    /// - [`CoreError::PortUnavailable`] for an out-of-range host port.
    /// - [`CoreError::Conflict`] if the host port or name is taken.
    /// - [`CoreError::ReadinessTimeout`] / [`CoreError::Cancelled`] from the
    ///   readiness wait.
    pub async fn run(&self, spec: RunSpec, cancel: &CancellationToken) -> Result<ManagedContainer> {
        let image = spec.image.trim();
        if image.is_empty() {
            return Err(CoreError::bad_request("image must not be empty"));
        }
        let image = normalize_image(image);

        let container_port = u16::try_from(spec.container_port)
            .ok()
            .filter(|p| *p != 0)
            .ok_or_else(|| {
                CoreError::bad_request(format!(
                    "container_port {} is outside 1-65535",
                    spec.container_port
                ))
            })?;

        let volumes = spec
            .volumes
            .iter()
            .map(|v| VolumeMount::parse(v))
            .collect::<std::result::Result<Vec<_>, _>>()?;

        if spec.auto_remove && spec.restart_policy != RestartPolicy::No {
            return Err(CoreError::bad_request(
                "auto_remove cannot be combined with a restart policy other than \"no\"",
            ));
        }
        if spec.wait_ready && spec.wait_timeout.is_zero() {
            return Err(CoreError::bad_request("wait_timeout must be positive"));
        }

        let command = spec.command.as_ref().map(CommandSpec::to_argv).transpose()?;
        let name = spec
            .name
            .map(|n| n.trim().to_string())
            .filter(|n| !n.is_empty());

        self.release_vanished().await?;
        if let Some(requested) = spec.host_port.and_then(|p| u16::try_from(p).ok()) {
            if let Some(owner) = self.registry.owner_of(requested) {
                return Err(CoreError::conflict(format!(
                    "host port {requested} is already bound to container {}",
                    owner.short()
                )));
            }
        }
        let host_port = self
            .ports
            .allocate_excluding(spec.host_port, |p| self.registry.is_host_port_taken(p))?;
        let binding = PortBinding {
            host_port,
            container_port,
        };

        let labels = ManagedLabels {
            name: name.clone(),
            container_port,
        };
        let create = CreateSpec {
            image,
            name,
            command,
            env: spec.env,
            volumes,
            network: spec.network.filter(|n| !n.is_empty()),
            port: binding,
            host_ip: self.ports.bind_address().to_string(),
            labels: labels.to_map(),
            auto_remove: spec.auto_remove,
            restart_policy: spec.restart_policy,
        };

        let trace_id = current_trace_id();
        let id = self.engine.create(&create).await?;
        tracing::debug!(container_id = %id, trace_id = %trace_id, "container created");

        if let Err(e) = self.engine.start(&id).await {
            tracing::warn!(
                container_id = %id,
                host_port,
                trace_id = %trace_id,
                "start failed, removing container: {}",
                e
            );
            if let Err(cleanup) = self.engine.remove(&id, true).await {
                tracing::warn!(container_id = %id, "cleanup after failed start: {}", cleanup);
            }
            return Err(match e {
                EngineError::PortConflict(msg) => {
                    CoreError::conflict(format!("host port {host_port} is unavailable: {msg}"))
                }
                other => other.into(),
            });
        }

        self.registry.record(id.clone(), binding);
        tracing::info!(
            container_id = %id,
            image = %create.image,
            host_port,
            container_port,
            trace_id = %trace_id,
            "container running"
        );

        if spec.wait_ready {
            let check = ReadinessCheck::new(
                format!("http://{}", self.upstream_address(host_port)),
                spec.health_path.as_deref(),
                spec.wait_timeout,
            );
            self.prober.wait(&check, cancel).await?;
        }

        self.resolve(&id).await
    }

    /// Starts a stopped managed container on its recorded host port.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Conflict`] if the engine binds a different host
    /// port or the recorded one is taken.
    pub async fn start(&self, id: &ContainerId) -> Result<ManagedContainer> {
        let container = self.resolve(id).await?;
        self.engine.start(&container.id).await.map_err(|e| match e {
            EngineError::PortConflict(msg) => CoreError::conflict(format!(
                "host port {} is unavailable: {msg}",
                container.host_port
            )),
            other => other.into(),
        })?;

        let snapshot = self.engine.inspect(&container.id).await?;
        if let Some(actual) = snapshot.host_port_for(container.container_port) {
            if actual != container.host_port {
                tracing::warn!(
                    container_id = %container.id,
                    recorded = container.host_port,
                    actual,
                    "container restarted on a different host port, stopping it"
                );
                if let Err(e) = self
                    .engine
                    .stop(&container.id, self.config.engine.stop_timeout())
                    .await
                {
                    tracing::warn!(container_id = %container.id, "stop after port mismatch: {}", e);
                }
                return Err(CoreError::conflict(format!(
                    "container {} came up on host port {actual}, expected {}",
                    container.id.short(),
                    container.host_port
                )));
            }
        }

        tracing::info!(container_id = %container.id, host_port = container.host_port, "container started");
        self.adopt(id, snapshot)
    }

    /// Stops a managed container.
    ///
    /// The host port is released if the engine removed the container on
    /// exit.
    pub async fn stop(&self, id: &ContainerId) -> Result<ContainerId> {
        let container = self.resolve(id).await?;
        self.engine
            .stop(&container.id, self.config.engine.stop_timeout())
            .await?;
        tracing::info!(container_id = %container.id, "container stopped");

        match self.engine.inspect(&container.id).await {
            Ok(snapshot) if snapshot.status() != ContainerStatus::Removed => {}
            Ok(_) | Err(EngineError::NotFound(_)) => {
                self.registry.forget(&container.id);
                tracing::info!(
                    container_id = %container.id,
                    host_port = container.host_port,
                    "container removed on exit"
                );
            }
            Err(e) => {
                tracing::debug!(container_id = %container.id, "inspect after stop: {}", e);
            }
        }
        Ok(container.id)
    }

    /// Removes a managed container and releases its host port.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Conflict`] for a running container unless
    /// `force` is set.
    pub async fn remove(&self, id: &ContainerId, force: bool) -> Result<ContainerId> {
        let container = self.resolve(id).await?;
        self.engine.remove(&container.id, force).await?;
        self.registry.forget(&container.id);
        tracing::info!(
            container_id = %container.id,
            host_port = container.host_port,
            "container removed"
        );
        Ok(container.id)
    }

    /// Inspects a managed container.
    pub async fn inspect(&self, id: &ContainerId) -> Result<ManagedContainer> {
        self.resolve(id).await
    }

    /// Lists managed containers.
    pub async fn list(&self) -> Result<Vec<ManagedContainer>> {
        let snapshots = self.engine.list_managed().await?;
        let mut containers = Vec::with_capacity(snapshots.len());
        for snapshot in snapshots {
            let id = ContainerId::from_string(snapshot.id.clone());
            match self.adopt(&id, snapshot) {
                Ok(container) => containers.push(container),
                Err(e) => tracing::debug!(container_id = %id, "not listed: {}", e),
            }
        }
        Ok(containers)
    }

    // =========================================================================
    // Exec and logs
    // =========================================================================

    /// Runs a command in a running managed container.
    ///
    /// # Errors
    ///
    /// - [`CoreError::NotFound`] for unknown or removed containers.
    /// - [`CoreError::Conflict`] if the container is not running.
    /// - [`CoreError::ExecFailed`] if the exec mechanism broke.
    /// - [`CoreError::Cancelled`] if `cancel` fires first.
    pub async fn exec(
        &self,
        id: &ContainerId,
        request: &ExecRequest,
        cancel: &CancellationToken,
    ) -> Result<ExecResult> {
        let container = self.resolve(id).await?;
        tokio::select! {
            biased;
            () = cancel.cancelled() => Err(CoreError::Cancelled(format!(
                "exec in container {} cancelled",
                container.id.short()
            ))),
            result = self.exec.exec(&container, request) => result,
        }
    }

    /// Opens a log feed for a managed container.
    pub async fn logs(&self, id: &ContainerId, request: LogRequest) -> Result<LogFeed> {
        let container = self.resolve(id).await?;
        Ok(self.logs.open(&container, request))
    }
}

impl std::fmt::Debug for Runtime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Runtime")
            .field("config", &self.config)
            .field("registered", &self.registry.len())
            .finish_non_exhaustive()
    }
}
