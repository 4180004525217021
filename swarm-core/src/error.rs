//! Error taxonomy shared by the tracker and nodes.

use std::io;
use std::path::PathBuf;

use crate::identity::{FileHash, NodeId, PieceIndex};

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("node {0} is not registered with the tracker")]
    UnknownNode(NodeId),
    #[error("file '{0}' not found")]
    FileNotFound(String),
    #[error("metadata for file '{file_name}' ({file_hash}) is missing")]
    MetadataMissing {
        file_name: String,
        file_hash: FileHash,
    },
    #[error("no active nodes to place pieces on")]
    NoActiveNodes,
    #[error("piece {0} is unavailable on every replica")]
    PieceUnavailable(PieceIndex),
    #[error("connection failure: {0}")]
    ConnectionFailure(String),
    #[error("{}: {source}", .path.display())]
    LocalIoFailure {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    /// Error reply relayed from the tracker or a peer.
    #[error("{0}")]
    Remote(String),
    #[error("node is not registered")]
    NotRegistered,
}

impl Error {
    pub fn local_io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Error::LocalIoFailure {
            path: path.into(),
            source,
        }
    }

    pub fn connection(context: impl std::fmt::Display) -> Self {
        Error::ConnectionFailure(context.to_string())
    }

    /// Rebuild a typed error from a relayed error reply. Messages that do not match a known
    /// rendering stay [`Error::Remote`].
    pub fn from_remote(message: String) -> Self {
        if let Some(name) = message
            .strip_prefix("file '")
            .and_then(|rest| rest.strip_suffix("' not found"))
        {
            return Error::FileNotFound(name.to_string());
        }
        if let Some(id) = message
            .strip_prefix("node ")
            .and_then(|rest| rest.strip_suffix(" is not registered with the tracker"))
            .and_then(|id| id.parse().ok())
        {
            return Error::UnknownNode(id);
        }
        Error::Remote(message)
    }
}
