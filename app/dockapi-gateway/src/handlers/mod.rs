//! Request handlers.
//!
//! Container lifecycle, exec and logs go through the shared runtime. Proxy
//! requests are resolved to an upstream and handed to the forwarder.

mod container;
mod exec;
mod image;
mod logs;
mod proxy;
mod system;

pub use container::{
    inspect_container, list_containers, remove_container, run_container, start_container,
    stop_container,
};
pub use exec::exec_container;
pub use image::{list_images, pull_image};
pub use logs::container_logs;
pub use proxy::{proxy_info, proxy_request};
pub use system::healthz;
