//! Placement metadata the tracker keeps per uploaded file.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::Error;
use crate::identity::{FileHash, NodeAddress, NodeId, PieceIndex};
use crate::placement::REPLICATION_FACTOR;
use crate::protocol::keyed;

/// Piece index -> replica node ids, primary first.
pub type PieceDistribution = BTreeMap<PieceIndex, Vec<NodeId>>;

/// Snapshot of the tracker's node registry, ordered by node id.
pub type ActiveNodes = BTreeMap<NodeId, NodeAddress>;

/// Everything a downloader needs to locate a file's pieces.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilePlacement {
    pub file_hash: FileHash,
    pub total_pieces: u32,
    #[serde(with = "keyed")]
    pub piece_distribution: PieceDistribution,
}

impl FilePlacement {
    /// Every index in `0..total_pieces` present exactly once, each naming
    /// `REPLICATION_FACTOR` nodes, and nothing else.
    pub fn validate(&self) -> Result<(), Error> {
        if self.total_pieces == 0 {
            return Err(Error::InvalidRequest("total_pieces must be at least 1".into()));
        }
        if self.piece_distribution.len() != self.total_pieces as usize {
            return Err(Error::InvalidRequest(format!(
                "piece_distribution has {} entries for {} pieces",
                self.piece_distribution.len(),
                self.total_pieces
            )));
        }
        for index in 0..self.total_pieces {
            match self.piece_distribution.get(&index) {
                Some(replicas) if replicas.len() == REPLICATION_FACTOR => {}
                Some(replicas) => {
                    return Err(Error::InvalidRequest(format!(
                        "piece {index} lists {} replicas, expected {REPLICATION_FACTOR}",
                        replicas.len()
                    )))
                }
                None => {
                    return Err(Error::InvalidRequest(format!(
                        "piece {index} missing from piece_distribution"
                    )))
                }
            }
        }
        Ok(())
    }

    pub fn replicas(&self, index: PieceIndex) -> &[NodeId] {
        self.piece_distribution
            .get(&index)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }
}

/// Persisted record of one upload, keyed by `file_hash`. Immutable once written.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileMetadata {
    pub file_name: String,
    pub owning_node_id: NodeId,
    #[serde(flatten)]
    pub placement: FilePlacement,
}
