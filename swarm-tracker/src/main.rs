// Swarm tracker daemon.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use swarm_tracker::{config, run_tracker, Registry, TrackerStore};
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "swarm-tracker", version, about = "Swarm tracker daemon")]
struct Args {
    /// Listen host.
    #[arg(long)]
    host: Option<String>,
    /// Listen port.
    #[arg(long)]
    port: Option<u16>,
    /// Directory for the node registry, file registry and metadata.
    #[arg(long)]
    data_dir: Option<PathBuf>,
    /// Config file; overrides the default search path.
    #[arg(long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let mut cfg = config::load(args.config.as_deref())?;
    if let Some(host) = args.host {
        cfg.host = host;
    }
    if let Some(port) = args.port {
        cfg.port = port;
    }
    if let Some(dir) = args.data_dir {
        cfg.data_dir = dir;
    }

    let store = TrackerStore::open(&cfg.data_dir)
        .await
        .with_context(|| format!("open tracker store at {}", cfg.data_dir.display()))?;
    tracing::info!(data_dir = %store.root().display(), "tracker store opened");
    let registry = Registry::new(Arc::new(store));
    let listener = TcpListener::bind((cfg.host.as_str(), cfg.port))
        .await
        .with_context(|| format!("bind {}:{}", cfg.host, cfg.port))?;

    run_tracker(listener, registry, async {
        if let Err(e) = shutdown_signal().await {
            tracing::error!(error = %e, "signal handler failed");
        }
    })
    .await?;
    tracing::info!("tracker stopped");
    Ok(())
}

/// Wait for Ctrl+C or SIGTERM (Unix).
async fn shutdown_signal() -> std::io::Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = signal(SignalKind::terminate())?;
        tokio::select! {
            r = tokio::signal::ctrl_c() => r?,
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await?;
    }
    Ok(())
}
