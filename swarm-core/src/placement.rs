//! Placement policy: which nodes hold each piece of an upload.
//!
//! Round-robin over the active-node snapshot taken once per upload. Piece `i` goes to
//! `nodes[i mod N]` (primary) and `nodes[(i + 1) mod N]` (secondary). With one active node
//! both slots name the same node.

use crate::chunk::ChunkedFile;
use crate::error::Error;
use crate::identity::{NodeId, PieceIndex};
use crate::metadata::{ActiveNodes, PieceDistribution};
use crate::transport::PeerTransport;

/// Replica slots recorded per piece.
pub const REPLICATION_FACTOR: usize = 2;

/// Replica list for one piece, primary first. `nodes` must be non-empty.
fn replicas_for(index: PieceIndex, nodes: &[NodeId]) -> Vec<NodeId> {
    let n = nodes.len();
    (0..REPLICATION_FACTOR)
        .map(|slot| nodes[(index as usize + slot) % n])
        .collect()
}

/// Assign replicas to every piece in `0..total_pieces`.
pub fn assign_replicas(total_pieces: u32, nodes: &[NodeId]) -> Result<PieceDistribution, Error> {
    if nodes.is_empty() {
        return Err(Error::NoActiveNodes);
    }
    Ok((0..total_pieces)
        .map(|index| (index, replicas_for(index, nodes)))
        .collect())
}

/// Distinct nodes that should receive a push, in slot order.
pub fn push_targets(replicas: &[NodeId]) -> Vec<NodeId> {
    let mut out: Vec<NodeId> = Vec::with_capacity(replicas.len());
    for &id in replicas {
        if !out.contains(&id) {
            out.push(id);
        }
    }
    out
}

/// Outcome of placing an upload's pieces.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlacementReport {
    pub distribution: PieceDistribution,
    /// (piece, node) pushes that failed. Placement is best effort; these pieces are
    /// under-replicated.
    pub failed_pushes: Vec<(PieceIndex, NodeId)>,
}

/// Push every piece of `file` to its replicas and return the resulting distribution.
///
/// A failed push is logged and recorded, never retried, and never aborts the upload.
pub async fn distribute<T: PeerTransport>(
    transport: &T,
    uploader: NodeId,
    file: &ChunkedFile,
    active: &ActiveNodes,
) -> Result<PlacementReport, Error> {
    let nodes: Vec<NodeId> = active.keys().copied().collect();
    let distribution = assign_replicas(file.total_pieces(), &nodes)?;
    let mut failed_pushes = Vec::new();
    for (index, data) in file.pieces() {
        for node_id in push_targets(&distribution[&index]) {
            let Some(addr) = active.get(&node_id) else {
                continue;
            };
            match transport
                .push_piece(addr, uploader, file.hash(), index, data)
                .await
            {
                Ok(()) => {
                    tracing::debug!(piece_index = index, node_id, %addr, "piece placed");
                }
                Err(e) => {
                    tracing::warn!(piece_index = index, node_id, %addr, error = %e, "piece push failed");
                    failed_pushes.push((index, node_id));
                }
            }
        }
    }
    Ok(PlacementReport {
        distribution,
        failed_pushes,
    })
}
