use anyhow::{bail, Context, Result};
use clap::Parser;
use dockapi_core::{Config, Runtime};
use dockapi_engine::DockerEngine;
use dockapi_gateway::ApiServer;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Parser)]
#[command(name = "dockapi")]
#[command(author, version, about, long_about = None)]
pub struct DaemonArgs {
    /// Configuration file (replaces /etc/dockapi and ~/.config/dockapi).
    #[arg(long, env = "DOCKAPI_CONFIG")]
    pub config: Option<PathBuf>,

    /// HTTP listen address.
    #[arg(long)]
    pub listen: Option<SocketAddr>,

    /// Container engine unix socket.
    #[arg(long)]
    pub engine_socket: Option<PathBuf>,

    /// Log level or filter directive; RUST_LOG takes precedence.
    #[arg(long)]
    pub log_level: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = DaemonArgs::parse();
    let config = load_config(&args)?;

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter(&config.logging.level).into()),
        )
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    run(config).await
}

fn load_config(args: &DaemonArgs) -> Result<Config> {
    let mut config = match &args.config {
        Some(path) => {
            if !path.is_file() {
                bail!("Config file {} does not exist", path.display());
            }
            Config::load_from(path)
                .with_context(|| format!("Failed to load config from {}", path.display()))?
        }
        None => Config::load().context("Failed to load config")?,
    };

    if let Some(listen) = args.listen {
        config.server.listen = listen;
    }
    if let Some(socket) = &args.engine_socket {
        config.engine.socket = Some(socket.clone());
    }
    if let Some(level) = &args.log_level {
        config.logging.level.clone_from(level);
    }
    Ok(config)
}

/// Expands a bare level to the dockapi crates; passes full directives through.
fn default_filter(level: &str) -> String {
    if level.contains('=') || level.contains(',') {
        return level.to_string();
    }
    ["dockapi", "dockapi_core", "dockapi_gateway", "dockapi_engine"]
        .iter()
        .map(|target| format!("{target}={level}"))
        .collect::<Vec<_>>()
        .join(",")
}

async fn run(config: Config) -> Result<()> {
    info!("Starting dockapi...");

    let engine = DockerEngine::connect(config.engine.socket.as_deref(), config.engine.timeout())
        .context("Failed to connect to container engine")?;

    let listen = config.server.listen;
    let runtime = Arc::new(
        Runtime::new(config, Arc::new(engine)).context("Failed to create runtime")?,
    );

    runtime
        .ping()
        .await
        .context("Container engine is not reachable")?;

    match runtime.reconcile().await {
        Ok(count) => info!(containers = count, "Runtime initialized"),
        Err(e) => warn!("Failed to reconcile managed containers: {}", e),
    }

    let server = ApiServer::bind(listen, Arc::clone(&runtime))
        .await
        .with_context(|| format!("Failed to bind {listen}"))?;
    let local = server.local_addr().context("Failed to read listen address")?;

    let shutdown = runtime.shutdown_token().clone();
    let server_handle = tokio::spawn(server.run(shutdown));

    println!("dockapi started");
    println!("  API: http://{local}");
    println!("Press Ctrl+C to stop.");

    shutdown_signal().await;
    info!("Shutdown signal received");

    runtime.shutdown();
    match server_handle.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => warn!("Server stopped with error: {}", e),
        Err(e) => warn!("Server task failed: {}", e),
    }

    info!("dockapi stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::ffi::OsStr;

    #[test]
    fn bare_level_expands_to_crates() {
        assert_eq!(
            default_filter("debug"),
            "dockapi=debug,dockapi_core=debug,dockapi_gateway=debug,dockapi_engine=debug"
        );
        assert_eq!(default_filter("warn,hyper=info"), "warn,hyper=info");
    }

    #[test]
    fn flags_override_config() {
        let args = DaemonArgs::parse_from([
            "dockapi",
            "--listen",
            "0.0.0.0:9000",
            "--engine-socket",
            "/run/docker.sock",
            "--log-level",
            "trace",
        ]);
        let config = load_config(&args).unwrap();
        assert_eq!(config.server.listen, "0.0.0.0:9000".parse().unwrap());
        assert_eq!(
            config.engine.socket.as_deref(),
            Some(std::path::Path::new("/run/docker.sock"))
        );
        assert_eq!(config.logging.level, "trace");
    }

    #[test]
    fn named_config_file_must_exist() {
        let args = DaemonArgs::parse_from(["dockapi", "--config", "/nonexistent/dockapi.toml"]);
        let err = load_config(&args).unwrap_err();
        assert!(err.to_string().contains("/nonexistent/dockapi.toml"), "{err}");
    }

    #[test]
    fn named_config_file_is_read() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dockapi.toml");
        std::fs::write(&path, "[server]\nlisten = \"127.0.0.1:9100\"\n").unwrap();

        let args = DaemonArgs::parse_from([
            OsStr::new("dockapi"),
            OsStr::new("--config"),
            path.as_os_str(),
        ]);
        let config = load_config(&args).unwrap();
        assert_eq!(config.server.listen, "127.0.0.1:9100".parse().unwrap());
    }
}
