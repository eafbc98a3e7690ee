//! Command execution inside managed containers.

use crate::error::{CoreError, Result};
use dockapi_engine::{ContainerEngine, EngineError, ExecSpec, ManagedContainer};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

/// A command as supplied by a caller: one shell-style string or an explicit
/// argument vector.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CommandSpec {
    /// `"ls -la /"`, tokenized with POSIX shell word-splitting rules.
    Line(String),
    /// `["ls", "-la", "/"]`, used as-is.
    Argv(Vec<String>),
}

impl CommandSpec {
    /// Normalizes to an argument vector.
    ///
    /// Both forms of the same command yield the same vector. No shell runs:
    /// quotes and backslashes are interpreted here and the tokens go to the
    /// engine verbatim.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::BadRequest`] on unbalanced quotes or an empty
    /// command.
    pub fn to_argv(&self) -> Result<Vec<String>> {
        let argv = match self {
            Self::Line(line) => shell_words::split(line)
                .map_err(|e| CoreError::bad_request(format!("cannot parse command {line:?}: {e}")))?,
            Self::Argv(argv) => argv.clone(),
        };
        if argv.first().map_or(true, String::is_empty) {
            return Err(CoreError::bad_request("command must not be empty"));
        }
        Ok(argv)
    }
}

impl From<&str> for CommandSpec {
    fn from(line: &str) -> Self {
        Self::Line(line.to_string())
    }
}

impl From<Vec<String>> for CommandSpec {
    fn from(argv: Vec<String>) -> Self {
        Self::Argv(argv)
    }
}

/// A normalized exec request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecRequest {
    /// Argument vector; never empty.
    pub argv: Vec<String>,
    /// Working directory inside the container.
    pub workdir: Option<String>,
    /// Environment overrides.
    pub env: BTreeMap<String, String>,
    /// Allocate a TTY; stderr is then merged into stdout.
    pub tty: bool,
}

impl ExecRequest {
    /// Builds a request, normalizing the command.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::BadRequest`] if the command cannot be tokenized.
    pub fn new(
        command: &CommandSpec,
        workdir: Option<String>,
        env: BTreeMap<String, String>,
        tty: bool,
    ) -> Result<Self> {
        Ok(Self {
            argv: command.to_argv()?,
            workdir: workdir.filter(|w| !w.is_empty()),
            env,
            tty,
        })
    }
}

/// Outcome of a command that ran.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExecResult {
    /// Exit code; non-zero is still a successful invocation.
    pub exit_code: i64,
    /// Standard output, decoded as lossy UTF-8.
    pub stdout: String,
    /// Standard error; absent in TTY mode.
    pub stderr: Option<String>,
}

/// Runs commands through the engine and shapes the result.
#[derive(Clone)]
pub struct ExecInvoker {
    engine: Arc<dyn ContainerEngine>,
}

impl ExecInvoker {
    /// Creates an invoker over `engine`.
    #[must_use]
    pub fn new(engine: Arc<dyn ContainerEngine>) -> Self {
        Self { engine }
    }

    /// Runs `request` in `container`.
    ///
    /// # Errors
    ///
    /// - [`CoreError::Conflict`] if the container is not running.
    /// - [`CoreError::NotFound`] if the container disappeared.
    /// - [`CoreError::ExecFailed`] if the exec mechanism itself broke.
    pub async fn exec(
        &self,
        container: &ManagedContainer,
        request: &ExecRequest,
    ) -> Result<ExecResult> {
        if !container.is_running() {
            return Err(CoreError::conflict(format!(
                "container {} is {}, not running",
                container.id.short(),
                container.status
            )));
        }

        let spec = ExecSpec {
            argv: request.argv.clone(),
            workdir: request.workdir.clone(),
            env: request.env.clone(),
            tty: request.tty,
        };

        tracing::debug!(
            container_id = %container.id,
            argv = ?request.argv,
            tty = request.tty,
            "exec"
        );

        let output = self
            .engine
            .exec(&container.id, &spec)
            .await
            .map_err(|e| match e {
                EngineError::NotFound(msg) => CoreError::NotFound(msg),
                EngineError::Conflict(msg) => CoreError::Conflict(msg),
                other => CoreError::ExecFailed(other.to_string()),
            })?;

        tracing::info!(
            container_id = %container.id,
            exit_code = output.exit_code,
            "exec finished"
        );

        Ok(ExecResult {
            exit_code: output.exit_code,
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: if request.tty {
                None
            } else {
                Some(String::from_utf8_lossy(&output.stderr.unwrap_or_default()).into_owned())
            },
        })
    }
}
