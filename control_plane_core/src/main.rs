//! Control plane daemon.
//!
//! Loads settings, connects to the key-value store, re-materialises the env
//! mirror and serves the REST API until interrupted.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{error, info, warn};

use config_store_interface::{ConfigStore, ConsulConfig, ConsulKvStore, InMemoryKvStore, KvStore};
use control_plane_core::api::{self, ApiState};
use control_plane_core::{ControlPlane, ControlPlaneConfig, Settings};
use observability::{init_tracing, install_prometheus_exporter, TracingConfig};
use provisioner::CliActionRunner;

#[derive(Parser, Debug)]
#[command(name = "control_plane_daemon")]
#[command(about = "Server control plane: configuration reconciliation and server lifecycle")]
#[command(version)]
struct Args {
    /// TOML settings file
    #[arg(short, long, env = "CONTROL_PLANE_CONFIG")]
    config: Option<PathBuf>,

    /// Address to listen on
    #[arg(long)]
    listen: Option<SocketAddr>,

    /// Consul agent address
    #[arg(long)]
    consul_addr: Option<String>,

    /// Env file mirrored from the configuration namespace
    #[arg(long)]
    env_file: Option<PathBuf>,

    /// Keep configuration in process memory instead of Consul
    #[arg(long)]
    in_memory: bool,
}

impl Args {
    fn apply(&self, settings: &mut Settings) {
        if let Some(listen) = self.listen {
            settings.listen_addr = listen;
        }
        if let Some(addr) = &self.consul_addr {
            settings.consul_addr = addr.clone();
        }
        if let Some(path) = &self.env_file {
            settings.env_file = path.clone();
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut settings = Settings::load(args.config.as_deref()).context("Failed to load settings")?;
    args.apply(&mut settings);

    init_tracing(&TracingConfig {
        format: settings.log_format,
        ..TracingConfig::default()
    })?;

    info!(
        listen = %settings.listen_addr,
        consul = %settings.consul_addr,
        env_file = %settings.env_file.display(),
        "Starting control plane daemon"
    );

    if let Some(addr) = settings.metrics_addr {
        install_prometheus_exporter(addr)?;
        info!(%addr, "Prometheus exporter listening");
    }

    let kv: Arc<dyn KvStore> = if args.in_memory {
        warn!("Using in-memory configuration store; nothing survives a restart");
        Arc::new(InMemoryKvStore::new())
    } else {
        Arc::new(ConsulKvStore::new(ConsulConfig {
            address: settings.consul_addr.clone(),
            token: settings.consul_token.clone(),
            ..ConsulConfig::default()
        })?)
    };
    let store = ConfigStore::with_prefixes(kv, &settings.config_prefix, &settings.servers_prefix);
    let runner = Arc::new(CliActionRunner::new(settings.runner_config()));

    let control_plane = ControlPlane::new(
        store,
        runner,
        ControlPlaneConfig {
            env_file: settings.env_file.clone(),
            health_timeout: settings.health_timeout(),
            consul_url: settings.consul_addr.clone(),
        },
    );

    // A previous run may have stored configuration without mirroring it.
    if let Err(e) = control_plane.reconcile_mirror().await {
        warn!(error = %e, "Env mirror not reconciled at startup; it will be rewritten on the next save");
    }

    let app = api::router(ApiState::new(control_plane));
    let listener = tokio::net::TcpListener::bind(settings.listen_addr)
        .await
        .with_context(|| format!("Failed to bind {}", settings.listen_addr))?;
    info!(addr = %settings.listen_addr, "REST API listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("API server failed")?;

    info!("Control plane daemon stopped");
    Ok(())
}

async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("Received Ctrl+C, shutting down"),
        Err(e) => error!(error = %e, "Failed to listen for shutdown signal"),
    }
}
