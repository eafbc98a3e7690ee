//! # dockapi-engine
//!
//! Container engine adapter for dockapi.
//!
//! This crate provides the managed-container domain types, the label schema
//! that marks containers as managed, and the [`ContainerEngine`] contract with
//! a Docker implementation. An in-memory engine is available behind the
//! `fake` feature for tests.

#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions)]
// Documentation and style lints.
#![allow(clippy::doc_markdown)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::option_if_let_else)]
#![allow(clippy::missing_const_for_fn)]
#![allow(clippy::significant_drop_tightening)]

pub mod docker;
pub mod engine;
pub mod error;
#[cfg(any(test, feature = "fake"))]
pub mod fake;
pub mod labels;
pub mod ports;
pub mod state;

pub use docker::DockerEngine;
pub use engine::{ContainerEngine, ExecOutput, ExecSpec, ImageSummary, LogOptions, LogStream};
pub use error::{EngineError, Result};
#[cfg(any(test, feature = "fake"))]
pub use fake::FakeEngine;
pub use labels::ManagedLabels;
pub use state::{
    normalize_image, AdoptError, ContainerId, ContainerSnapshot, ContainerStatus, CreateSpec,
    ManagedContainer, PortBinding, RestartPolicy, VolumeMode, VolumeMount, VolumeSpecError,
};
