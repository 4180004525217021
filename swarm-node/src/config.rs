//! Load node config from file and environment.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use swarm_core::chunk::MAX_PIECE_SIZE;
use swarm_core::{NodeAddress, DEFAULT_PIECE_SIZE};

/// Node configuration. File: ~/.config/swarm/node.toml or /etc/swarm/node.toml.
/// Env overrides: SWARM_NODE_TRACKER_HOST, SWARM_NODE_TRACKER_PORT, SWARM_NODE_LISTEN_IP,
/// SWARM_NODE_LISTEN_PORT, SWARM_NODE_STORE_DIR, SWARM_NODE_DOWNLOAD_DIR,
/// SWARM_NODE_PIECE_SIZE, SWARM_NODE_REQUEST_TIMEOUT_SECS.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Tracker host (default 127.0.0.1).
    #[serde(default = "default_tracker_host")]
    pub tracker_host: String,
    /// Tracker port (default 2901).
    #[serde(default = "default_tracker_port")]
    pub tracker_port: u16,
    /// Address this node listens on and advertises to the tracker.
    #[serde(default = "default_listen_ip")]
    pub listen_ip: String,
    /// Peer listen port; 0 picks an ephemeral port.
    #[serde(default)]
    pub listen_port: u16,
    /// Root of the piece store; each registration gets `node_<id>` beneath it.
    #[serde(default = "default_store_dir")]
    pub store_dir: PathBuf,
    /// Where downloaded files are written.
    #[serde(default = "default_download_dir")]
    pub download_dir: PathBuf,
    /// Piece size in bytes for uploads.
    #[serde(default = "default_piece_size")]
    pub piece_size: usize,
    /// Per-request deadline for tracker and peer exchanges. Absent waits forever.
    #[serde(default)]
    pub request_timeout_secs: Option<u64>,
}

fn default_tracker_host() -> String {
    "127.0.0.1".to_string()
}
fn default_tracker_port() -> u16 {
    2901
}
fn default_listen_ip() -> String {
    "127.0.0.1".to_string()
}
fn default_store_dir() -> PathBuf {
    PathBuf::from("node-data")
}
fn default_download_dir() -> PathBuf {
    PathBuf::from("downloads")
}
fn default_piece_size() -> usize {
    DEFAULT_PIECE_SIZE
}

impl Default for Config {
    fn default() -> Self {
        Self {
            tracker_host: default_tracker_host(),
            tracker_port: default_tracker_port(),
            listen_ip: default_listen_ip(),
            listen_port: 0,
            store_dir: default_store_dir(),
            download_dir: default_download_dir(),
            piece_size: default_piece_size(),
            request_timeout_secs: None,
        }
    }
}

impl Config {
    pub fn tracker(&self) -> NodeAddress {
        NodeAddress::new(self.tracker_host.clone(), self.tracker_port)
    }

    pub fn request_timeout(&self) -> Option<Duration> {
        self.request_timeout_secs.map(Duration::from_secs)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.piece_size == 0 || self.piece_size > MAX_PIECE_SIZE {
            return Err(ConfigError::PieceSize(self.piece_size));
        }
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("read {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },
    #[error("parse {path}: {source}")]
    Parse {
        path: String,
        source: toml::de::Error,
    },
    #[error("piece_size {0} out of range (1..={max})", max = MAX_PIECE_SIZE)]
    PieceSize(usize),
}

/// Load config: defaults, then config file, then env vars. An explicit `path` must load;
/// discovered files that fail to parse are logged and skipped.
pub fn load(path: Option<&Path>) -> Result<Config, ConfigError> {
    let mut c = match path {
        Some(p) => load_file(p)?,
        None => discover_file().unwrap_or_default(),
    };
    apply_env(&mut c, |key| std::env::var(key).ok());
    Ok(c)
}

fn apply_env(c: &mut Config, var: impl Fn(&str) -> Option<String>) {
    if let Some(s) = var("SWARM_NODE_TRACKER_HOST") {
        c.tracker_host = s;
    }
    if let Some(s) = var("SWARM_NODE_TRACKER_PORT") {
        match s.parse() {
            Ok(p) => c.tracker_port = p,
            Err(_) => tracing::warn!(value = %s, "ignoring invalid SWARM_NODE_TRACKER_PORT"),
        }
    }
    if let Some(s) = var("SWARM_NODE_LISTEN_IP") {
        c.listen_ip = s;
    }
    if let Some(s) = var("SWARM_NODE_LISTEN_PORT") {
        match s.parse() {
            Ok(p) => c.listen_port = p,
            Err(_) => tracing::warn!(value = %s, "ignoring invalid SWARM_NODE_LISTEN_PORT"),
        }
    }
    if let Some(s) = var("SWARM_NODE_STORE_DIR") {
        c.store_dir = PathBuf::from(s);
    }
    if let Some(s) = var("SWARM_NODE_DOWNLOAD_DIR") {
        c.download_dir = PathBuf::from(s);
    }
    if let Some(s) = var("SWARM_NODE_PIECE_SIZE") {
        match s.parse() {
            Ok(n) => c.piece_size = n,
            Err(_) => tracing::warn!(value = %s, "ignoring invalid SWARM_NODE_PIECE_SIZE"),
        }
    }
    if let Some(s) = var("SWARM_NODE_REQUEST_TIMEOUT_SECS") {
        match s.parse() {
            Ok(n) => c.request_timeout_secs = Some(n),
            Err(_) => {
                tracing::warn!(value = %s, "ignoring invalid SWARM_NODE_REQUEST_TIMEOUT_SECS")
            }
        }
    }
}

fn config_paths() -> Vec<PathBuf> {
    let home = std::env::var_os("HOME").map(PathBuf::from);
    let mut out = Vec::new();
    if let Some(h) = home {
        out.push(h.join(".config/swarm/node.toml"));
    }
    out.push(PathBuf::from("/etc/swarm/node.toml"));
    out
}

fn discover_file() -> Option<Config> {
    let p = config_paths().into_iter().find(|p| p.exists())?;
    match load_file(&p) {
        Ok(c) => Some(c),
        Err(e) => {
            tracing::warn!(error = %e, "ignoring config file");
            None
        }
    }
}

fn load_file(p: &Path) -> Result<Config, ConfigError> {
    let path = p.display().to_string();
    let s = std::fs::read_to_string(p).map_err(|source| ConfigError::Read {
        path: path.clone(),
        source,
    })?;
    toml::from_str(&s).map_err(|source| ConfigError::Parse { path, source })
}
