//! # dockapi-core
//!
//! Core orchestration for dockapi.
//!
//! This crate composes the container engine adapter into the lifecycle of
//! managed containers:
//!
//! - **Port allocation**: best-effort free host ports on the loopback address
//! - **Readiness**: a clock-driven probe state machine with an async driver
//! - **Exec**: command normalization and structured results
//! - **Logs**: finite or following log feeds
//! - **Runtime**: the shared state handle tying them together

#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions)]
// Documentation and style lints.
#![allow(clippy::doc_markdown)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::missing_const_for_fn)]
#![allow(clippy::option_if_let_else)]
#![allow(clippy::unnecessary_map_or)]
#![allow(clippy::significant_drop_tightening)]

pub mod config;
pub mod error;
pub mod exec;
pub mod logs;
pub mod port;
pub mod readiness;
pub mod registry;
pub mod runtime;
pub mod trace;

pub use config::Config;
pub use error::{CoreError, Result};
pub use exec::{CommandSpec, ExecInvoker, ExecRequest, ExecResult};
pub use logs::{LogFeed, LogRequest, LogStreamer};
pub use port::PortAllocator;
pub use readiness::{ProbeMachine, ProbeReport, ProbeState, ReadinessCheck, ReadinessProber};
pub use registry::ContainerRegistry;
pub use runtime::{RunSpec, Runtime, Upstream};
