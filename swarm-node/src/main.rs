// Swarm node: serve pieces to peers and take upload/download commands on stdin.

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use swarm_node::commands::{self, Command, HELP};
use swarm_node::{config, Node};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::task::JoinSet;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "swarm-node", version, about = "Swarm peer node")]
struct Args {
    /// Tracker host.
    #[arg(long)]
    tracker_host: Option<String>,
    /// Tracker port.
    #[arg(long)]
    tracker_port: Option<u16>,
    /// Address to listen on and advertise to the tracker.
    #[arg(long)]
    listen_ip: Option<String>,
    /// Peer listen port (0 for ephemeral).
    #[arg(long)]
    listen_port: Option<u16>,
    /// Root directory of the piece store.
    #[arg(long)]
    store_dir: Option<PathBuf>,
    /// Directory downloaded files are written to.
    #[arg(long)]
    download_dir: Option<PathBuf>,
    /// Piece size in bytes for uploads.
    #[arg(long)]
    piece_size: Option<usize>,
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
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let mut cfg = config::load(args.config.as_deref())?;
    if let Some(v) = args.tracker_host {
        cfg.tracker_host = v;
    }
    if let Some(v) = args.tracker_port {
        cfg.tracker_port = v;
    }
    if let Some(v) = args.listen_ip {
        cfg.listen_ip = v;
    }
    if let Some(v) = args.listen_port {
        cfg.listen_port = v;
    }
    if let Some(v) = args.store_dir {
        cfg.store_dir = v;
    }
    if let Some(v) = args.download_dir {
        cfg.download_dir = v;
    }
    if let Some(v) = args.piece_size {
        cfg.piece_size = v;
    }

    let node = Arc::new(Node::start(&cfg).await?);
    println!("node {} listening on {}", node.id(), node.addr());
    println!("{HELP}");

    let mut transfers = JoinSet::new();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            Some(done) = transfers.join_next(), if !transfers.is_empty() => {
                if let Err(e) = done {
                    tracing::error!(error = %e, "transfer task panicked");
                }
            }
            line = lines.next_line() => {
                let line = match line {
                    Ok(Some(line)) => line,
                    Ok(None) => break,
                    Err(e) => {
                        tracing::error!(error = %e, "read stdin failed");
                        break;
                    }
                };
                match commands::parse(&line) {
                    Ok(None) => {}
                    Ok(Some(Command::Exit)) => break,
                    Ok(Some(Command::Help)) => println!("{HELP}"),
                    Ok(Some(Command::Nodes)) => match node.active_nodes().await {
                        Ok(nodes) => {
                            for (id, addr) in nodes {
                                println!("  {id}: {addr}");
                            }
                        }
                        Err(e) => println!("nodes failed: {e}"),
                    },
                    Ok(Some(Command::Upload { path, file_name })) => {
                        let node = node.clone();
                        transfers.spawn(async move {
                            match node.upload(&path, &file_name).await {
                                Ok(report) => println!("{report}"),
                                Err(e) => println!("upload {file_name} failed: {e}"),
                            }
                        });
                    }
                    Ok(Some(Command::Download { file_name })) => {
                        let node = node.clone();
                        transfers.spawn(async move {
                            match node.download(&file_name).await {
                                Ok(report) => println!("{report}"),
                                Err(e) => println!("download {file_name} failed: {e}"),
                            }
                        });
                    }
                    Err(e) => println!("{e}"),
                }
            }
        }
    }

    if !transfers.is_empty() {
        tracing::info!(in_flight = transfers.len(), "abandoning transfers");
        transfers.shutdown().await;
    }
    node.disconnect().await?;
    Ok(())
}
