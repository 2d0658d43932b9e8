//! nkv -- eventually-consistent in-memory key-value mesh node.
//!
//! Without a mesh network URL the node serves its store alone.  With one,
//! it gossips membership with its siblings and replicates mutations.
//! SIGTERM/SIGINT stop accepting connections and drain in-flight requests
//! for at most `server.shutdown_timeout` seconds.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use nkv::config::Config;
use nkv::mesh::events::{MeshObserver, MetricsObserver};
use nkv::mesh::node::MeshNode;
use nkv::mesh::rpc::RpcClient;
use nkv::mesh::{FatalReceiver, MeshService};
use nkv::storage::backend::KvStore;
use nkv::storage::memory::MemoryStore;

/// Command-line arguments for the nkv server.
#[derive(Parser, Debug)]
#[command(name = "nkv", version, about = "In-memory key-value mesh node")]
struct Cli {
    /// Path to the YAML configuration file.
    #[arg(short, long)]
    config: Option<String>,

    /// Override the bind address (host:port).
    #[arg(short, long)]
    bind: Option<String>,

    /// Listening port, also advertised to the mesh.
    #[arg(short, long, env = "PORT")]
    port: Option<u16>,

    /// Host name other nodes use to reach this one.
    #[arg(long, env = "HOSTNAME")]
    hostname: Option<String>,

    /// Bootstrap URL used to discover siblings.  Enables the mesh.
    #[arg(long, env = "MESH_NETWORK_URL")]
    mesh_network_url: Option<String>,
}

impl Cli {
    fn load(&self) -> anyhow::Result<Config> {
        let mut config = match &self.config {
            Some(path) => nkv::config::load_config(path)
                .with_context(|| format!("loading configuration from {path}"))?,
            None => Config::default(),
        };
        if let Some(port) = self.port {
            config.server.port = port;
        }
        if let Some(hostname) = &self.hostname {
            config.server.hostname = hostname.clone();
        }
        if let Some(url) = &self.mesh_network_url {
            config.mesh.network_url = Some(url.clone());
        }
        Ok(config)
    }
}

fn init_tracing(config: &Config) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.logging.level));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if config.logging.format == "json" {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = cli.load()?;
    init_tracing(&config);

    if let Some(path) = &cli.config {
        info!("Loaded configuration from {}", path);
    }

    let bind_addr = cli
        .bind
        .clone()
        .unwrap_or_else(|| format!("{}:{}", config.server.host, config.server.port));

    if config.observability.metrics {
        nkv::metrics::init_metrics()?;
        nkv::metrics::describe_metrics();
        info!("Prometheus metrics initialized");
    }

    let store: Arc<dyn KvStore> = Arc::new(MemoryStore::new());

    let mut fatal: Option<FatalReceiver> = None;
    let mut gossip: Option<JoinHandle<()>> = None;
    let mesh = match config.mesh.bootstrap_url() {
        Some(bootstrap) => {
            let transport = Arc::new(RpcClient::new(config.mesh.request_timeout())?);
            let local = MeshNode::new(config.server.hostname.clone(), config.server.port);
            let mut observers: Vec<Arc<dyn MeshObserver>> = Vec::new();
            if config.observability.metrics {
                observers.push(Arc::new(MetricsObserver));
            }
            let (service, fatal_rx) =
                MeshService::new(local, bootstrap, &config.mesh, transport, observers);
            info!(
                "Mesh enabled: advertising {}:{} via {}",
                config.server.hostname, config.server.port, bootstrap
            );
            let service = Arc::new(service);
            gossip = Some(service.start());
            fatal = Some(fatal_rx);
            Some(service)
        }
        None => {
            info!("No mesh network URL configured, running as a single node");
            None
        }
    };

    let shutdown_timeout = Duration::from_secs(config.server.shutdown_timeout);
    let state = Arc::new(nkv::AppState {
        config,
        store,
        mesh,
    });
    let app = nkv::server::app(state);

    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("binding {bind_addr}"))?;
    info!("nkv listening on {}", bind_addr);

    let serve = axum::serve(listener, app).with_graceful_shutdown(shutdown_signal(shutdown_timeout));

    tokio::select! {
        // An observer failure also ends the gossip task; report the cause.
        biased;
        err = wait_fatal(fatal) => {
            return Err(anyhow::Error::new(err).context("mesh stopped"));
        }
        err = wait_gossip(gossip) => return Err(err),
        result = serve => result?,
    }

    info!("nkv shut down");
    Ok(())
}

/// Resolve with the first fatal mesh error; never resolves without a mesh.
async fn wait_fatal(fatal: Option<FatalReceiver>) -> nkv::mesh::events::MeshError {
    if let Some(mut rx) = fatal {
        if let Some(err) = rx.recv().await {
            return err;
        }
    }
    std::future::pending().await
}

/// Resolve when the gossip scheduler ends; never resolves without a mesh.
async fn wait_gossip(task: Option<JoinHandle<()>>) -> anyhow::Error {
    match task {
        Some(task) => match task.await {
            Err(err) => anyhow::anyhow!("gossip scheduler failed: {err}"),
            Ok(()) => anyhow::anyhow!("gossip scheduler stopped"),
        },
        None => std::future::pending().await,
    }
}

/// Wait for SIGTERM or SIGINT (Ctrl+C), then return to trigger graceful shutdown.
///
/// Arms a watchdog that exits the process if draining outlives `timeout`.
async fn shutdown_signal(timeout: Duration) {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received SIGINT, shutting down");
        },
        _ = terminate => {
            tracing::info!("Received SIGTERM, shutting down");
        },
    }

    tokio::spawn(async move {
        tokio::time::sleep(timeout).await;
        warn!("Shutdown timed out after {:?}, exiting", timeout);
        std::process::exit(1);
    });
}
