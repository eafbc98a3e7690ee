//! In-memory container engine for tests.
//!
//! Behaves like a small, well-mannered Docker: names are unique, host ports
//! conflict only between running containers, exec runs a handful of scripted
//! programs, and logs are per-container buffers with a live broadcast for
//! follow mode.

use crate::engine::{ContainerEngine, ExecOutput, ExecSpec, ImageSummary, LogOptions, LogStream};
use crate::error::{EngineError, Result};
use crate::state::{ContainerId, ContainerSnapshot, CreateSpec, VolumeMount};
use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::{self, StreamExt};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;

const LIVE_CAPACITY: usize = 256;

struct FakeContainer {
    snapshot: ContainerSnapshot,
    auto_remove: bool,
    logs: Vec<Bytes>,
    live: broadcast::Sender<Bytes>,
}

impl FakeContainer {
    fn is_running(&self) -> bool {
        self.snapshot.state == "running"
    }

    /// Ends every follow subscription, the way the engine closes log streams
    /// when a container exits.
    fn close_live(&mut self) {
        let (live, _) = broadcast::channel(LIVE_CAPACITY);
        self.live = live;
    }
}

#[derive(Default)]
struct FakeState {
    containers: HashMap<String, FakeContainer>,
    images: Vec<ImageSummary>,
    unknown_images: HashSet<String>,
    scripted: HashMap<String, ExecOutput>,
    exec_calls: Vec<Vec<String>>,
    next_start_error: Option<EngineError>,
}

impl FakeState {
    /// Resolves a full ID, a name, or a unique ID prefix.
    fn resolve(&self, id: &ContainerId) -> Result<String> {
        let key = id.as_str();
        if self.containers.contains_key(key) {
            return Ok(key.to_string());
        }
        if let Some((found, _)) = self
            .containers
            .iter()
            .find(|(_, c)| c.snapshot.name.as_deref() == Some(key))
        {
            return Ok(found.clone());
        }
        let mut prefixed = self.containers.keys().filter(|k| k.starts_with(key));
        match (prefixed.next(), prefixed.next()) {
            (Some(found), None) if !key.is_empty() => Ok(found.clone()),
            _ => Err(EngineError::not_found(format!("No such container: {key}"))),
        }
    }

    fn container_mut(&mut self, id: &ContainerId) -> Result<&mut FakeContainer> {
        let key = self.resolve(id)?;
        self.containers
            .get_mut(&key)
            .ok_or_else(|| EngineError::not_found(format!("No such container: {id}")))
    }
}

/// In-memory [`ContainerEngine`].
pub struct FakeEngine {
    state: Mutex<FakeState>,
    unavailable: AtomicBool,
}

impl Default for FakeEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeEngine {
    /// Creates an empty engine.
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Mutex::new(FakeState::default()),
            unavailable: AtomicBool::new(false),
        }
    }

    fn state(&self) -> Result<MutexGuard<'_, FakeState>> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(EngineError::Unavailable(
                "connection to engine refused".to_string(),
            ));
        }
        self.state
            .lock()
            .map_err(|_| EngineError::Engine("fake engine lock poisoned".to_string()))
    }

    /// Simulates the engine connection going away (or coming back).
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Makes pulls and creates of `reference` fail with not found.
    pub fn reject_image(&self, reference: &str) {
        if let Ok(mut state) = self.state() {
            state.unknown_images.insert(reference.to_string());
        }
    }

    /// Makes the next `start` call fail with `error`.
    pub fn fail_next_start(&self, error: EngineError) {
        if let Ok(mut state) = self.state() {
            state.next_start_error = Some(error);
        }
    }

    /// Scripts the outcome of running `program` via exec.
    pub fn script_exec(&self, program: &str, output: ExecOutput) {
        if let Ok(mut state) = self.state() {
            state.scripted.insert(program.to_string(), output);
        }
    }

    /// Seeds a container exactly as given, bypassing `create`.
    pub fn insert_snapshot(&self, snapshot: ContainerSnapshot) {
        if let Ok(mut state) = self.state() {
            let (live, _) = broadcast::channel(LIVE_CAPACITY);
            state.containers.insert(
                snapshot.id.clone(),
                FakeContainer {
                    snapshot,
                    auto_remove: false,
                    logs: Vec::new(),
                    live,
                },
            );
        }
    }

    /// Forces a container into an engine state, e.g. `exited` after a crash.
    pub fn set_state(&self, id: &ContainerId, engine_state: &str) {
        if let Ok(mut state) = self.state() {
            if let Ok(container) = state.container_mut(id) {
                container.snapshot.state = engine_state.to_string();
                if engine_state != "running" {
                    container.close_live();
                }
            }
        }
    }

    /// Appends a log line and publishes it to followers.
    pub fn push_log(&self, id: &ContainerId, line: impl Into<Bytes>) {
        if let Ok(mut state) = self.state() {
            if let Ok(container) = state.container_mut(id) {
                let line = line.into();
                container.logs.push(line.clone());
                let _ = container.live.send(line);
            }
        }
    }

    /// Number of live follow subscriptions on a container.
    pub fn log_subscribers(&self, id: &ContainerId) -> usize {
        self.state()
            .ok()
            .and_then(|mut state| state.container_mut(id).map(|c| c.live.receiver_count()).ok())
            .unwrap_or(0)
    }

    /// Every argv passed to exec, in call order.
    pub fn exec_calls(&self) -> Vec<Vec<String>> {
        self.state()
            .map(|state| state.exec_calls.clone())
            .unwrap_or_default()
    }

    /// Number of containers the engine knows about.
    pub fn container_count(&self) -> usize {
        self.state().map(|state| state.containers.len()).unwrap_or(0)
    }

    fn run_script(state: &FakeState, spec: &ExecSpec) -> (ExecOutput, Option<Duration>) {
        let program = spec.argv.first().map(String::as_str).unwrap_or_default();
        let args = spec.argv.get(1..).unwrap_or_default();

        if let Some(output) = state.scripted.get(program) {
            return (output.clone(), None);
        }

        let ok = |stdout: Vec<u8>| ExecOutput {
            exit_code: 0,
            stdout,
            stderr: Some(Vec::new()),
        };

        match program {
            "true" => (ok(Vec::new()), None),
            "false" => (
                ExecOutput {
                    exit_code: 1,
                    ..ok(Vec::new())
                },
                None,
            ),
            "echo" => (ok(format!("{}\n", args.join(" ")).into_bytes()), None),
            "env" => {
                let mut lines: Vec<String> =
                    spec.env.iter().map(|(k, v)| format!("{k}={v}\n")).collect();
                lines.sort();
                (ok(lines.concat().into_bytes()), None)
            }
            "pwd" => {
                let dir = spec.workdir.as_deref().unwrap_or("/");
                (ok(format!("{dir}\n").into_bytes()), None)
            }
            "sleep" => {
                let secs = args
                    .first()
                    .and_then(|s| s.parse::<f64>().ok())
                    .unwrap_or(0.0);
                (ok(Vec::new()), Some(Duration::from_secs_f64(secs.max(0.0))))
            }
            other => (
                ExecOutput {
                    exit_code: 127,
                    stdout: Vec::new(),
                    stderr: Some(
                        format!("exec: \"{other}\": executable file not found in $PATH\n")
                            .into_bytes(),
                    ),
                },
                None,
            ),
        }
    }
}

fn new_container_id() -> String {
    format!(
        "{}{}",
        uuid::Uuid::new_v4().simple(),
        uuid::Uuid::new_v4().simple()
    )
}

fn image_id(reference: &str) -> String {
    let mut hex: String = reference
        .bytes()
        .map(|b| format!("{b:02x}"))
        .collect::<String>();
    hex.truncate(12);
    format!("{hex:0<12}")
}

#[async_trait]
impl ContainerEngine for FakeEngine {
    async fn ping(&self) -> Result<()> {
        self.state().map(|_| ())
    }

    async fn create(&self, spec: &CreateSpec) -> Result<ContainerId> {
        let mut state = self.state()?;

        if state.unknown_images.contains(&spec.image) {
            return Err(EngineError::not_found(format!(
                "No such image: {}",
                spec.image
            )));
        }
        if let Some(name) = &spec.name {
            if state
                .containers
                .values()
                .any(|c| c.snapshot.name.as_deref() == Some(name))
            {
                return Err(EngineError::Conflict(format!(
                    "Conflict. The container name \"/{name}\" is already in use"
                )));
            }
        }

        let id = new_container_id();
        let snapshot = ContainerSnapshot {
            id: id.clone(),
            name: spec.name.clone(),
            image: spec.image.clone(),
            state: "created".to_string(),
            labels: spec.labels.clone(),
            command: spec.command.clone(),
            env: spec.env.iter().map(|(k, v)| format!("{k}={v}")).collect(),
            binds: spec.volumes.iter().map(VolumeMount::to_bind).collect(),
            network: spec.network.clone(),
            ports: vec![spec.port],
        };
        let (live, _) = broadcast::channel(LIVE_CAPACITY);
        state.containers.insert(
            id.clone(),
            FakeContainer {
                snapshot,
                auto_remove: spec.auto_remove,
                logs: Vec::new(),
                live,
            },
        );

        Ok(ContainerId::from_string(id))
    }

    async fn start(&self, id: &ContainerId) -> Result<()> {
        let mut state = self.state()?;
        let key = state.resolve(id)?;

        if let Some(error) = state.next_start_error.take() {
            return Err(error);
        }

        let ports = state.containers[&key].snapshot.ports.clone();
        let taken = state.containers.iter().any(|(other, c)| {
            *other != key
                && c.is_running()
                && c.snapshot
                    .ports
                    .iter()
                    .any(|p| ports.iter().any(|q| q.host_port == p.host_port))
        });
        if taken {
            return Err(EngineError::PortConflict(format!(
                "Bind for 127.0.0.1:{} failed: port is already allocated",
                ports.first().map_or(0, |p| p.host_port)
            )));
        }

        if let Some(container) = state.containers.get_mut(&key) {
            container.snapshot.state = "running".to_string();
        }
        Ok(())
    }

    async fn stop(&self, id: &ContainerId, _timeout: Duration) -> Result<()> {
        let mut state = self.state()?;
        let key = state.resolve(id)?;
        let auto_remove = match state.containers.get_mut(&key) {
            Some(container) => {
                container.snapshot.state = "exited".to_string();
                container.close_live();
                container.auto_remove
            }
            None => false,
        };
        if auto_remove {
            state.containers.remove(&key);
        }
        Ok(())
    }

    async fn remove(&self, id: &ContainerId, force: bool) -> Result<()> {
        let mut state = self.state()?;
        let key = state.resolve(id)?;
        if !force && state.containers[&key].is_running() {
            return Err(EngineError::Conflict(format!(
                "You cannot remove a running container {key}. Stop the container before attempting removal or force remove"
            )));
        }
        state.containers.remove(&key);
        Ok(())
    }

    async fn inspect(&self, id: &ContainerId) -> Result<ContainerSnapshot> {
        let state = self.state()?;
        let key = state.resolve(id)?;
        Ok(state.containers[&key].snapshot.clone())
    }

    async fn list_by_label(&self, label_filter: &str) -> Result<Vec<ContainerSnapshot>> {
        let state = self.state()?;
        let (key, value) = label_filter
            .split_once('=')
            .map_or((label_filter, None), |(k, v)| (k, Some(v)));

        let mut matches: Vec<ContainerSnapshot> = state
            .containers
            .values()
            .filter(|c| match (c.snapshot.labels.get(key), value) {
                (Some(found), Some(wanted)) => found == wanted,
                (Some(_), None) => true,
                (None, _) => false,
            })
            .map(|c| c.snapshot.clone())
            .collect();
        matches.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(matches)
    }

    fn logs(&self, id: &ContainerId, options: LogOptions) -> LogStream {
        let subscribed = self.state().and_then(|mut state| {
            let container = state.container_mut(id)?;
            let skip = options
                .tail
                .map_or(0, |n| container.logs.len().saturating_sub(n));
            let backlog: Vec<Bytes> = container.logs[skip..].to_vec();
            let live = (options.follow && container.is_running())
                .then(|| container.live.subscribe());
            Ok((backlog, live))
        });

        match subscribed {
            Err(e) => stream::once(async move { Err(e) }).boxed(),
            Ok((backlog, None)) => stream::iter(backlog.into_iter().map(Ok)).boxed(),
            Ok((backlog, Some(rx))) => {
                let live = BroadcastStream::new(rx)
                    .filter_map(|item| async move { item.ok().map(Ok) });
                stream::iter(backlog.into_iter().map(Ok)).chain(live).boxed()
            }
        }
    }

    async fn exec(&self, id: &ContainerId, spec: &ExecSpec) -> Result<ExecOutput> {
        let (mut output, delay) = {
            let mut state = self.state()?;
            let key = state.resolve(id)?;
            if !state.containers[&key].is_running() {
                return Err(EngineError::Conflict(format!(
                    "Container {key} is not running"
                )));
            }
            state.exec_calls.push(spec.argv.clone());
            Self::run_script(&state, spec)
        };

        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        if spec.tty {
            if let Some(stderr) = output.stderr.take() {
                output.stdout.extend_from_slice(&stderr);
            }
        }
        Ok(output)
    }

    async fn list_images(&self) -> Result<Vec<ImageSummary>> {
        Ok(self.state()?.images.clone())
    }

    async fn pull_image(&self, reference: &str) -> Result<String> {
        let mut state = self.state()?;
        if state.unknown_images.contains(reference) {
            return Err(EngineError::not_found(format!(
                "pull access denied for {reference}, repository does not exist"
            )));
        }

        let id = image_id(reference);
        if !state.images.iter().any(|img| img.id == id) {
            state.images.push(ImageSummary {
                id: id.clone(),
                repo_tags: vec![reference.to_string()],
                size: 0,
            });
        }
        Ok(format!("sha256:{id}"))
    }
}
