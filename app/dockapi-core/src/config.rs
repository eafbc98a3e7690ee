//! Configuration management.
//!
//! dockapi configuration is loaded from multiple sources with the following priority:
//!
//! 1. Command-line flags (applied by the daemon)
//! 2. Environment variables (DOCKAPI_*, nested keys separated by `__`)
//! 3. User configuration file (~/.config/dockapi/config.toml)
//! 4. System configuration file (/etc/dockapi/config.toml)
//! 5. Default values
//!
//! ## Example Configuration File
//!
//! ```toml
//! [server]
//! listen = "127.0.0.1:8000"
//!
//! [engine]
//! socket = "/var/run/docker.sock"
//! timeout_secs = 120
//! stop_timeout_secs = 10
//!
//! [ports]
//! bind_address = "127.0.0.1"
//!
//! [readiness]
//! interval_ms = 500
//! attempt_timeout_ms = 2000
//!
//! [proxy]
//! connect_timeout_ms = 5000
//!
//! [logging]
//! level = "info"
//! ```

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// dockapi configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// HTTP server configuration.
    pub server: ServerConfig,
    /// Container engine connection.
    pub engine: EngineConfig,
    /// Host port publishing.
    pub ports: PortsConfig,
    /// Readiness probing.
    pub readiness: ReadinessConfig,
    /// Reverse proxy.
    pub proxy: ProxyConfig,
    /// Logging configuration.
    pub logging: LoggingConfig,
}

impl Config {
    /// Loads configuration from the system and user files and environment.
    ///
    /// # Errors
    ///
    /// Returns an error if configuration cannot be loaded.
    pub fn load() -> Result<Self, figment::Error> {
        Self::figment(&[system_config_path(), user_config_path()]).extract()
    }

    /// Loads configuration from a specific file instead of the default
    /// locations.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self, figment::Error> {
        Self::figment(&[path.as_ref().to_path_buf()]).extract()
    }

    fn figment(files: &[PathBuf]) -> Figment {
        let mut figment = Figment::new().merge(Serialized::defaults(Self::default()));
        for file in files {
            figment = figment.merge(Toml::file(file));
        }
        figment.merge(Env::prefixed("DOCKAPI_").split("__"))
    }
}

/// HTTP server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Listen address.
    pub listen: SocketAddr,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 8000),
        }
    }
}

/// Container engine connection.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Unix socket path; platform defaults (`DOCKER_HOST`) when unset.
    pub socket: Option<PathBuf>,
    /// Engine API request timeout in seconds.
    pub timeout_secs: u64,
    /// Grace period before a stopped container is killed.
    pub stop_timeout_secs: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            socket: None,
            timeout_secs: 120,
            stop_timeout_secs: 10,
        }
    }
}

impl EngineConfig {
    /// Engine request timeout.
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Stop grace period.
    #[must_use]
    pub const fn stop_timeout(&self) -> Duration {
        Duration::from_secs(self.stop_timeout_secs)
    }
}

/// Host port publishing.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PortsConfig {
    /// Address host ports are probed and published on.
    pub bind_address: IpAddr,
}

impl Default for PortsConfig {
    fn default() -> Self {
        Self {
            bind_address: IpAddr::V4(Ipv4Addr::LOCALHOST),
        }
    }
}

/// Readiness probing.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReadinessConfig {
    /// Fixed delay between attempts.
    pub interval_ms: u64,
    /// Upper bound on a single attempt.
    pub attempt_timeout_ms: u64,
}

impl Default for ReadinessConfig {
    fn default() -> Self {
        Self {
            interval_ms: 500,
            attempt_timeout_ms: 2000,
        }
    }
}

impl ReadinessConfig {
    /// Retry interval.
    #[must_use]
    pub const fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    /// Per-attempt timeout.
    #[must_use]
    pub const fn attempt_timeout(&self) -> Duration {
        Duration::from_millis(self.attempt_timeout_ms)
    }
}

/// Reverse proxy.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProxyConfig {
    /// Upstream connect timeout in milliseconds.
    pub connect_timeout_ms: u64,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            connect_timeout_ms: 5000,
        }
    }
}

impl ProxyConfig {
    /// Upstream connect timeout.
    #[must_use]
    pub const fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error) or a full filter directive.
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

fn user_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("~/.config"))
        .join("dockapi")
        .join("config.toml")
}

fn system_config_path() -> PathBuf {
    PathBuf::from("/etc/dockapi/config.toml")
}
