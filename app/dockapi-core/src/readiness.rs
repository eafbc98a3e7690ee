//! Readiness probing.
//!
//! A container is ready once `GET <base_url><health_path>` answers with any
//! 2xx status. Probing is split in two:
//!
//! - [`ProbeMachine`]: the pure state machine. It never sleeps or performs
//!   I/O; callers feed it the current [`Instant`] and attempt outcomes, and
//!   it answers with the next [`ProbeStep`].
//! - [`ReadinessProber`]: the async driver. It performs HTTP attempts with
//!   `reqwest`, sleeps on the timer, and races both against a
//!   [`CancellationToken`].
//!
//! Backoff is a fixed interval without jitter. Every wait is clipped to the
//! deadline, so a timeout is reported no later than one interval after the
//! budget runs out.

use crate::config::ReadinessConfig;
use crate::error::{CoreError, Result};
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

/// A single readiness check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadinessCheck {
    /// Base URL without a trailing slash, e.g. `http://127.0.0.1:49153`.
    pub base_url: String,
    /// Path probed on the base URL; always starts with `/`.
    pub health_path: String,
    /// Overall budget.
    pub timeout: Duration,
}

impl ReadinessCheck {
    /// Creates a check. A missing or empty health path probes `/`.
    #[must_use]
    pub fn new(base_url: impl Into<String>, health_path: Option<&str>, timeout: Duration) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        let health_path = match health_path.map(str::trim) {
            None | Some("") => "/".to_string(),
            Some(path) if path.starts_with('/') => path.to_string(),
            Some(path) => format!("/{path}"),
        };
        Self {
            base_url,
            health_path,
            timeout,
        }
    }

    /// Full probe URL.
    #[must_use]
    pub fn url(&self) -> String {
        format!("{}{}", self.base_url, self.health_path)
    }
}

/// Prober state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeState {
    /// Not started.
    Idle,
    /// Attempting or waiting between attempts.
    Polling,
    /// A 2xx response was observed.
    Ready,
    /// The budget ran out.
    TimedOut,
    /// The caller gave up.
    Cancelled,
}

impl ProbeState {
    /// Returns true for `Ready`, `TimedOut` and `Cancelled`.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Ready | Self::TimedOut | Self::Cancelled)
    }
}

/// Result of one probe attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttemptOutcome {
    /// Got a 2xx response.
    Success(u16),
    /// Non-2xx response, connection failure or attempt timeout.
    Failure(String),
}

/// What the driver must do next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeStep {
    /// Issue one attempt bounded by `timeout`.
    Attempt {
        /// Per-attempt timeout, already clipped to the deadline.
        timeout: Duration,
    },
    /// Wait before the next attempt.
    Sleep(Duration),
    /// Stop; the state is terminal.
    Done(ProbeState),
}

/// Summary of a finished probe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeReport {
    /// Terminal state.
    pub state: ProbeState,
    /// Attempts issued.
    pub attempts: u32,
    /// Time from start to the terminal state.
    pub elapsed: Duration,
    /// Outcome of the final failed attempt, if any.
    pub last_error: Option<String>,
}

/// Clock-driven readiness state machine.
#[derive(Debug, Clone)]
pub struct ProbeMachine {
    state: ProbeState,
    timeout: Duration,
    interval: Duration,
    attempt_timeout: Duration,
    started: Option<Instant>,
    finished: Option<Instant>,
    attempts: u32,
    last_error: Option<String>,
}

impl ProbeMachine {
    /// Creates an idle machine.
    #[must_use]
    pub const fn new(timeout: Duration, interval: Duration, attempt_timeout: Duration) -> Self {
        Self {
            state: ProbeState::Idle,
            timeout,
            interval,
            attempt_timeout,
            started: None,
            finished: None,
            attempts: 0,
            last_error: None,
        }
    }

    /// Current state.
    #[must_use]
    pub const fn state(&self) -> ProbeState {
        self.state
    }

    /// Attempts issued so far.
    #[must_use]
    pub const fn attempts(&self) -> u32 {
        self.attempts
    }

    fn remaining(&self, now: Instant) -> Duration {
        self.started
            .map_or(self.timeout, |started| {
                self.timeout.saturating_sub(now.saturating_duration_since(started))
            })
    }

    fn finish(&mut self, state: ProbeState, now: Instant) -> ProbeStep {
        self.state = state;
        self.finished = Some(now);
        ProbeStep::Done(state)
    }

    fn next_attempt(&mut self, now: Instant) -> ProbeStep {
        let remaining = self.remaining(now);
        if remaining.is_zero() {
            return self.finish(ProbeState::TimedOut, now);
        }
        self.attempts += 1;
        ProbeStep::Attempt {
            timeout: self.attempt_timeout.min(remaining),
        }
    }

    /// Idle → Polling; returns the first attempt.
    pub fn start(&mut self, now: Instant) -> ProbeStep {
        if self.state != ProbeState::Idle {
            return self.current_step(now);
        }
        self.state = ProbeState::Polling;
        self.started = Some(now);
        self.next_attempt(now)
    }

    /// Feeds the outcome of the attempt the machine asked for.
    pub fn on_attempt(&mut self, outcome: AttemptOutcome, now: Instant) -> ProbeStep {
        if self.state != ProbeState::Polling {
            return self.current_step(now);
        }
        match outcome {
            AttemptOutcome::Success(_) => self.finish(ProbeState::Ready, now),
            AttemptOutcome::Failure(reason) => {
                self.last_error = Some(reason);
                let remaining = self.remaining(now);
                if remaining.is_zero() {
                    self.finish(ProbeState::TimedOut, now)
                } else {
                    ProbeStep::Sleep(self.interval.min(remaining))
                }
            }
        }
    }

    /// Called when the requested sleep has elapsed.
    pub fn on_wake(&mut self, now: Instant) -> ProbeStep {
        if self.state != ProbeState::Polling {
            return self.current_step(now);
        }
        self.next_attempt(now)
    }

    /// Polling → Cancelled. Terminal states are left untouched.
    pub fn cancel(&mut self, now: Instant) -> ProbeStep {
        if self.state.is_terminal() {
            return ProbeStep::Done(self.state);
        }
        self.finish(ProbeState::Cancelled, now)
    }

    fn current_step(&mut self, now: Instant) -> ProbeStep {
        match self.state {
            ProbeState::Idle => self.start(now),
            ProbeState::Polling => self.next_attempt(now),
            terminal => ProbeStep::Done(terminal),
        }
    }

    /// Summary as of `now` (or as of the terminal transition).
    #[must_use]
    pub fn report(&self, now: Instant) -> ProbeReport {
        let end = self.finished.unwrap_or(now);
        ProbeReport {
            state: self.state,
            attempts: self.attempts,
            elapsed: self
                .started
                .map_or(Duration::ZERO, |s| end.saturating_duration_since(s)),
            last_error: self.last_error.clone(),
        }
    }
}

/// Drives [`ProbeMachine`] over HTTP.
#[derive(Debug, Clone)]
pub struct ReadinessProber {
    client: reqwest::Client,
    interval: Duration,
    attempt_timeout: Duration,
}

impl ReadinessProber {
    /// Creates a prober from configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(config: &ReadinessConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .user_agent(concat!("dockapi/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| CoreError::Engine(format!("failed to create HTTP client: {e}")))?;

        Ok(Self {
            client,
            interval: config.interval(),
            attempt_timeout: config.attempt_timeout(),
        })
    }

    /// Polls until ready, timed out, or cancelled.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::ReadinessTimeout`] when the budget runs out and
    /// [`CoreError::Cancelled`] when `cancel` fires; no attempt outlives the
    /// call in either case.
    pub async fn wait(
        &self,
        check: &ReadinessCheck,
        cancel: &CancellationToken,
    ) -> Result<ProbeReport> {
        let url = check.url();
        let mut machine = ProbeMachine::new(check.timeout, self.interval, self.attempt_timeout);
        let mut step = machine.start(Instant::now());

        loop {
            step = match step {
                ProbeStep::Attempt { timeout } => {
                    let outcome = tokio::select! {
                        biased;
                        () = cancel.cancelled() => {
                            machine.cancel(Instant::now());
                            break;
                        }
                        outcome = self.attempt(&url, timeout) => outcome,
                    };
                    tracing::debug!(
                        url = %url,
                        attempt = machine.attempts(),
                        outcome = ?outcome,
                        "readiness attempt"
                    );
                    machine.on_attempt(outcome, Instant::now())
                }
                ProbeStep::Sleep(delay) => {
                    tokio::select! {
                        biased;
                        () = cancel.cancelled() => {
                            machine.cancel(Instant::now());
                            break;
                        }
                        () = tokio::time::sleep(delay) => {}
                    }
                    machine.on_wake(Instant::now())
                }
                ProbeStep::Done(_) => break,
            };
        }

        let report = machine.report(Instant::now());
        match report.state {
            ProbeState::Ready => {
                tracing::info!(
                    url = %url,
                    attempts = report.attempts,
                    elapsed = ?report.elapsed,
                    "container ready"
                );
                Ok(report)
            }
            ProbeState::Cancelled => Err(CoreError::Cancelled(format!(
                "readiness probe of {url} cancelled after {} attempts",
                report.attempts
            ))),
            _ => {
                tracing::warn!(
                    url = %url,
                    attempts = report.attempts,
                    last_error = ?report.last_error,
                    "readiness timed out"
                );
                Err(CoreError::ReadinessTimeout {
                    url,
                    timeout: check.timeout,
                    attempts: report.attempts,
                    last_error: report.last_error,
                })
            }
        }
    }

    async fn attempt(&self, url: &str, timeout: Duration) -> AttemptOutcome {
        match self.client.get(url).timeout(timeout).send().await {
            Ok(response) if response.status().is_success() => {
                AttemptOutcome::Success(response.status().as_u16())
            }
            Ok(response) => AttemptOutcome::Failure(format!("status {}", response.status())),
            Err(e) => AttemptOutcome::Failure(e.to_string()),
        }
    }
}
