//! Peer side of a node: the listener serving piece requests and the TCP client used for
//! placement and retrieval.

use std::future::Future;
use std::net::SocketAddr;
use std::time::Duration;

use swarm_core::transport::{read_to_close, request, write_and_close};
use swarm_core::{
    wire, Error, FileHash, NodeAddress, NodeId, PeerRequest, PeerResponse, PeerTransport,
    PieceData, PieceIndex,
};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinSet;

use crate::store::{PieceStore, PieceStoreError};

/// Serve peer requests until `shutdown` resolves, then wait for in-flight handlers.
pub async fn run_peer_listener(
    listener: TcpListener,
    store: PieceStore,
    shutdown: impl Future<Output = ()>,
) {
    let mut handlers = JoinSet::new();
    tokio::pin!(shutdown);
    loop {
        tokio::select! {
            _ = &mut shutdown => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    let store = store.clone();
                    handlers.spawn(async move { handle_connection(stream, peer, store).await });
                }
                Err(e) => tracing::warn!(error = %e, "accept failed"),
            },
            Some(joined) = handlers.join_next(), if !handlers.is_empty() => {
                if let Err(e) = joined {
                    tracing::error!(error = %e, "peer handler panicked");
                }
            }
        }
    }
    drop(listener);
    while let Some(joined) = handlers.join_next().await {
        if let Err(e) = joined {
            tracing::error!(error = %e, "peer handler panicked");
        }
    }
    tracing::debug!("peer listener stopped");
}

async fn handle_connection(mut stream: TcpStream, peer: SocketAddr, store: PieceStore) {
    let bytes = match read_to_close(&mut stream).await {
        Ok(b) => b,
        Err(e) => {
            tracing::warn!(%peer, error = %e, "read failed");
            return;
        }
    };
    let response = match wire::decode_request::<PeerRequest>(&bytes) {
        Ok(req) => dispatch(&store, req).await,
        Err(e) if e.is_replyable() => {
            tracing::warn!(%peer, error = %e, "bad peer request");
            PeerResponse::error(e.to_string())
        }
        Err(e) => {
            tracing::warn!(%peer, error = %e, "dropping unparseable payload");
            return;
        }
    };
    let payload = match wire::encode(&response) {
        Ok(p) => p,
        Err(e) => {
            tracing::error!(%peer, error = %e, "encode reply failed");
            return;
        }
    };
    if let Err(e) = write_and_close(&mut stream, &payload).await {
        tracing::warn!(%peer, error = %e, "write reply failed");
    }
}

/// Answer one peer request from the local piece store.
pub async fn dispatch(store: &PieceStore, req: PeerRequest) -> PeerResponse {
    match req {
        PeerRequest::UploadPiece {
            node_id,
            file_hash,
            piece_index,
            piece_data,
        } => {
            let data = piece_data.into_inner();
            match store.put(&file_hash, piece_index, &data).await {
                Ok(fresh) => {
                    tracing::debug!(from = node_id, %file_hash, piece_index, bytes = data.len(), fresh, "piece stored");
                    PeerResponse::ok()
                }
                Err(e) => {
                    tracing::error!(%file_hash, piece_index, error = %e, "store piece failed");
                    PeerResponse::error(e.to_string())
                }
            }
        }
        PeerRequest::DownloadPiece {
            file_hash,
            piece_index,
        } => match store.get(&file_hash, piece_index).await {
            Ok(data) => PeerResponse::Success {
                piece_data: Some(PieceData(data)),
            },
            Err(PieceStoreError::NotFound) => PeerResponse::error("piece not found"),
            Err(e) => {
                tracing::error!(%file_hash, piece_index, error = %e, "read piece failed");
                PeerResponse::error(e.to_string())
            }
        },
    }
}

/// [`PeerTransport`] over one TCP connection per exchange.
#[derive(Debug, Clone, Default)]
pub struct TcpPeers {
    timeout: Option<Duration>,
}

impl TcpPeers {
    pub fn new(timeout: Option<Duration>) -> Self {
        Self { timeout }
    }
}

impl PeerTransport for TcpPeers {
    async fn push_piece(
        &self,
        to: &NodeAddress,
        uploader: NodeId,
        file_hash: &FileHash,
        piece_index: PieceIndex,
        data: &[u8],
    ) -> Result<(), Error> {
        let req = PeerRequest::UploadPiece {
            node_id: uploader,
            file_hash: file_hash.clone(),
            piece_index,
            piece_data: PieceData(data.to_vec()),
        };
        match request(to, &req, self.timeout).await? {
            PeerResponse::Success { .. } => Ok(()),
            PeerResponse::Error { message } => Err(Error::Remote(message)),
        }
    }

    async fn fetch_piece(
        &self,
        from: &NodeAddress,
        file_hash: &FileHash,
        piece_index: PieceIndex,
    ) -> Result<Vec<u8>, Error> {
        let req = PeerRequest::DownloadPiece {
            file_hash: file_hash.clone(),
            piece_index,
        };
        match request(from, &req, self.timeout).await? {
            PeerResponse::Success {
                piece_data: Some(data),
            } => Ok(data.into_inner()),
            PeerResponse::Success { piece_data: None } => Err(Error::connection(format!(
                "{from} replied without piece data"
            ))),
            PeerResponse::Error { message } => Err(Error::Remote(message)),
        }
    }
}
