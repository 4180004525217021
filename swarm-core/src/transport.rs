//! Request/response over a fresh TCP connection per exchange.
//!
//! The client writes one request and half-closes; the server reads to EOF, writes one
//! response and closes. No keep-alive, no pipelining.

use std::future::Future;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;

use crate::error::Error;
use crate::identity::{FileHash, NodeAddress, NodeId, PieceIndex};
use crate::wire::{self, MAX_MESSAGE_LEN};

/// Read everything the peer sends until it closes its write side. Stops one byte past the
/// size limit so oversized payloads are detected without buffering them whole.
pub async fn read_to_close<R: AsyncRead + Unpin>(reader: &mut R) -> std::io::Result<Vec<u8>> {
    let mut buf = Vec::new();
    reader
        .take(MAX_MESSAGE_LEN as u64 + 1)
        .read_to_end(&mut buf)
        .await?;
    Ok(buf)
}

/// Write one payload and close our write side.
pub async fn write_and_close<W: AsyncWrite + Unpin>(
    writer: &mut W,
    payload: &[u8],
) -> std::io::Result<()> {
    writer.write_all(payload).await?;
    writer.flush().await?;
    writer.shutdown().await
}

/// Run `fut` under an optional deadline. `None` waits forever.
pub async fn with_timeout<F, T>(timeout: Option<Duration>, fut: F) -> Result<T, Error>
where
    F: Future<Output = Result<T, Error>>,
{
    match timeout {
        Some(limit) => tokio::time::timeout(limit, fut)
            .await
            .map_err(|_| Error::connection(format!("timed out after {limit:?}")))?,
        None => fut.await,
    }
}

/// One request/response exchange with `addr`.
pub async fn request<Req, Resp>(
    addr: &NodeAddress,
    req: &Req,
    timeout: Option<Duration>,
) -> Result<Resp, Error>
where
    Req: Serialize,
    Resp: DeserializeOwned,
{
    let payload = wire::encode(req).map_err(|e| Error::InvalidRequest(e.to_string()))?;
    with_timeout(timeout, async {
        let mut stream = TcpStream::connect((addr.ip_address.as_str(), addr.port))
            .await
            .map_err(|e| Error::connection(format!("connect to {addr}: {e}")))?;
        write_and_close(&mut stream, &payload)
            .await
            .map_err(|e| Error::connection(format!("send to {addr}: {e}")))?;
        let reply = read_to_close(&mut stream)
            .await
            .map_err(|e| Error::connection(format!("receive from {addr}: {e}")))?;
        wire::decode(&reply).map_err(|e| Error::connection(format!("reply from {addr}: {e}")))
    })
    .await
}

/// Point-to-point piece exchange between nodes. The TCP implementation lives in the node
/// daemon; placement and retrieval only see this seam.
pub trait PeerTransport: Send + Sync {
    /// Store a copy of a piece on `to`.
    fn push_piece(
        &self,
        to: &NodeAddress,
        uploader: NodeId,
        file_hash: &FileHash,
        piece_index: PieceIndex,
        data: &[u8],
    ) -> impl Future<Output = Result<(), Error>> + Send;

    /// Fetch a piece held by `from`.
    fn fetch_piece(
        &self,
        from: &NodeAddress,
        file_hash: &FileHash,
        piece_index: PieceIndex,
    ) -> impl Future<Output = Result<Vec<u8>, Error>> + Send;
}
