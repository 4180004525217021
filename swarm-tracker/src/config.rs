//! Load tracker config from file and environment.

use std::path::{Path, PathBuf};

use serde::Deserialize;

/// Tracker configuration. File: ~/.config/swarm/tracker.toml or /etc/swarm/tracker.toml.
/// Env overrides: SWARM_TRACKER_HOST, SWARM_TRACKER_PORT, SWARM_TRACKER_DATA_DIR.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Listen host (default 127.0.0.1).
    #[serde(default = "default_host")]
    pub host: String,
    /// Listen port (default 2901).
    #[serde(default = "default_port")]
    pub port: u16,
    /// Directory holding the node registry, file registry and per-hash metadata.
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}
fn default_port() -> u16 {
    2901
}
fn default_data_dir() -> PathBuf {
    PathBuf::from("tracker-data")
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            data_dir: default_data_dir(),
        }
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
    if let Some(s) = var("SWARM_TRACKER_HOST") {
        c.host = s;
    }
    if let Some(s) = var("SWARM_TRACKER_PORT") {
        match s.parse::<u16>() {
            Ok(p) => c.port = p,
            Err(_) => tracing::warn!(value = %s, "ignoring invalid SWARM_TRACKER_PORT"),
        }
    }
    if let Some(s) = var("SWARM_TRACKER_DATA_DIR") {
        c.data_dir = PathBuf::from(s);
    }
}

fn config_paths() -> Vec<PathBuf> {
    let home = std::env::var_os("HOME").map(PathBuf::from);
    let mut out = Vec::new();
    if let Some(h) = home {
        out.push(h.join(".config/swarm/tracker.toml"));
    }
    out.push(PathBuf::from("/etc/swarm/tracker.toml"));
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
