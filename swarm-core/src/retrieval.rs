//! Retrieval engine: rebuild a file from its replicas, one piece at a time, in order.
//!
//! For each piece the replicas are tried in the order recorded at upload time, skipping
//! nodes missing from the current active-node snapshot. The first successful reply wins.
//! If no replica delivers, the whole download fails; callers never see partial content.

use crate::chunk::Reassembly;
use crate::error::Error;
use crate::identity::{NodeAddress, NodeId, PieceIndex};
use crate::metadata::{ActiveNodes, FilePlacement};
use crate::transport::PeerTransport;

/// Reachable replicas for one piece, in recorded order. A slot repeating the node just
/// before it is dropped.
pub fn replica_candidates<'a>(
    placement: &FilePlacement,
    index: PieceIndex,
    active: &'a ActiveNodes,
) -> Vec<(NodeId, &'a NodeAddress)> {
    let mut out: Vec<(NodeId, &NodeAddress)> = Vec::new();
    let mut previous = None;
    for &node_id in placement.replicas(index) {
        if previous == Some(node_id) {
            continue;
        }
        previous = Some(node_id);
        if let Some(addr) = active.get(&node_id) {
            out.push((node_id, addr));
        }
    }
    out
}

/// Fetch one piece, falling back through its replicas.
pub async fn fetch_with_fallback<T: PeerTransport>(
    transport: &T,
    placement: &FilePlacement,
    index: PieceIndex,
    active: &ActiveNodes,
) -> Result<Vec<u8>, Error> {
    let candidates = replica_candidates(placement, index, active);
    if candidates.is_empty() {
        tracing::warn!(piece_index = index, "no replica of piece is active");
    }
    for (node_id, addr) in candidates {
        match transport
            .fetch_piece(addr, &placement.file_hash, index)
            .await
        {
            Ok(bytes) => {
                tracing::debug!(piece_index = index, node_id, %addr, "piece fetched");
                return Ok(bytes);
            }
            Err(e) => {
                tracing::warn!(piece_index = index, node_id, %addr, error = %e, "replica failed, trying next");
            }
        }
    }
    Err(Error::PieceUnavailable(index))
}

/// Fetch every piece in index order and concatenate them.
pub async fn retrieve<T: PeerTransport>(
    transport: &T,
    placement: &FilePlacement,
    active: &ActiveNodes,
) -> Result<Vec<u8>, Error> {
    let mut reassembly = Reassembly::new(placement.total_pieces);
    for index in 0..placement.total_pieces {
        let bytes = fetch_with_fallback(transport, placement, index, active).await?;
        reassembly.mark_received(index, bytes);
    }
    reassembly.into_bytes().ok_or_else(|| {
        Error::InvalidRequest(format!(
            "placement for {} lists no pieces",
            placement.file_hash
        ))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk::ChunkedFile;
    use crate::placement::tests::{active, FakePeers};
    use crate::placement::{assign_replicas, distribute};

    async fn uploaded(peers: &FakePeers, data: &[u8], nodes: &[NodeId]) -> FilePlacement {
        let file = ChunkedFile::new(data.to_vec(), 16);
        let report = distribute(peers, nodes[0], &file, &active(nodes))
            .await
            .unwrap();
        FilePlacement {
            file_hash: file.hash().clone(),
            total_pieces: file.total_pieces(),
            piece_distribution: report.distribution,
        }
    }

    #[tokio::test]
    async fn retrieves_identical_bytes() {
        let peers = FakePeers::default();
        let data: Vec<u8> = (0..100u8).collect();
        let placement = uploaded(&peers, &data, &[1, 2]).await;
        let out = retrieve(&peers, &placement, &active(&[1, 2])).await.unwrap();
        assert_eq!(out, data);
    }

    #[tokio::test]
    async fn falls_back_to_secondary_when_primary_left() {
        let peers = FakePeers::default();
        let data: Vec<u8> = (0..100u8).rev().collect();
        let placement = uploaded(&peers, &data, &[1, 2]).await;
        // Node 1 disconnected after the upload.
        let out = retrieve(&peers, &placement, &active(&[2])).await.unwrap();
        assert_eq!(out, data);
        assert!(peers.fetches.lock().unwrap().iter().all(|&p| p == 1002));
    }

    #[tokio::test]
    async fn falls_back_when_primary_unreachable() {
        let mut peers = FakePeers::default();
        let data = vec![9u8; 40];
        let placement = uploaded(&peers, &data, &[1, 2]).await;
        peers.down.insert(1001);
        let out = retrieve(&peers, &placement, &active(&[1, 2])).await.unwrap();
        assert_eq!(out, data);
    }

    #[tokio::test]
    async fn all_replicas_gone_aborts() {
        let peers = FakePeers::default();
        let data = vec![3u8; 40];
        let placement = uploaded(&peers, &data, &[1, 2]).await;
        let result = retrieve(&peers, &placement, &active(&[7])).await;
        assert!(matches!(result, Err(Error::PieceUnavailable(0))));
    }

    #[tokio::test]
    async fn missing_piece_on_every_replica_aborts() {
        let peers = FakePeers::default();
        let file = ChunkedFile::new(vec![5u8; 40], 16);
        // Pieces were never pushed anywhere.
        let placement = FilePlacement {
            file_hash: file.hash().clone(),
            total_pieces: file.total_pieces(),
            piece_distribution: assign_replicas(file.total_pieces(), &[1, 2]).unwrap(),
        };
        let result = retrieve(&peers, &placement, &active(&[1, 2])).await;
        assert!(matches!(result, Err(Error::PieceUnavailable(0))));
        assert_eq!(*peers.fetches.lock().unwrap(), vec![1001, 1002]);
    }

    #[test]
    fn degenerate_replica_pair_is_tried_once() {
        let placement = FilePlacement {
            file_hash: crate::identity::FileHash::of_bytes(b"x"),
            total_pieces: 1,
            piece_distribution: assign_replicas(1, &[4]).unwrap(),
        };
        let nodes = active(&[4]);
        let candidates = replica_candidates(&placement, 0, &nodes);
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].0, 4);
    }
}
