//! # dockapi-gateway
//!
//! HTTP surface for dockapi.
//!
//! Exposes container lifecycle, exec and log streaming as a JSON API, and
//! reverse-proxies `/proxy/{id}/...` to each managed container's published
//! loopback port.
//!
//! ## Endpoints
//!
//! | Method | Path |
//! |--------|------|
//! | GET | `/healthz` |
//! | GET | `/images` |
//! | POST | `/images/pull` |
//! | GET | `/containers` |
//! | POST | `/containers/run` |
//! | GET, DELETE | `/containers/{id}` |
//! | POST | `/containers/{id}/start`, `/containers/{id}/stop` |
//! | GET | `/containers/{id}/logs` |
//! | POST | `/containers/{id}/exec` |
//! | GET | `/proxy/{id}` |
//! | ANY | `/proxy/{id}/{path}` |

#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::doc_markdown)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::missing_const_for_fn)]

pub mod api;
pub mod error;
pub mod handlers;
pub mod proxy;
pub mod server;
pub mod trace;
pub mod types;

pub use api::{create_router, AppState};
pub use error::{ApiError, Result};
pub use proxy::Forwarder;
pub use server::ApiServer;
