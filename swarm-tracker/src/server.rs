//! Tracker listener: accept connections, one task per connection, one request per task.

use std::future::Future;
use std::net::SocketAddr;

use swarm_core::transport::{read_to_close, write_and_close};
use swarm_core::wire;
use swarm_core::{TrackerRequest, TrackerResponse};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinSet;

use crate::registry::Registry;

/// Run the accept loop until `shutdown` resolves, then wait for in-flight handlers.
pub async fn run_tracker(
    listener: TcpListener,
    registry: Registry,
    shutdown: impl Future<Output = ()>,
) -> std::io::Result<()> {
    tracing::info!(addr = %listener.local_addr()?, "tracker listening");
    let mut handlers = JoinSet::new();
    tokio::pin!(shutdown);
    loop {
        tokio::select! {
            _ = &mut shutdown => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    let registry = registry.clone();
                    handlers.spawn(async move { handle_connection(stream, peer, registry).await });
                }
                Err(e) => tracing::warn!(error = %e, "accept failed"),
            },
            Some(joined) = handlers.join_next(), if !handlers.is_empty() => {
                if let Err(e) = joined {
                    tracing::error!(error = %e, "connection handler panicked");
                }
            }
        }
    }
    drop(listener);
    tracing::info!(in_flight = handlers.len(), "tracker stopping");
    while let Some(joined) = handlers.join_next().await {
        if let Err(e) = joined {
            tracing::error!(error = %e, "connection handler panicked");
        }
    }
    Ok(())
}

async fn handle_connection(mut stream: TcpStream, peer: SocketAddr, registry: Registry) {
    let bytes = match read_to_close(&mut stream).await {
        Ok(b) => b,
        Err(e) => {
            tracing::warn!(%peer, error = %e, "read failed");
            return;
        }
    };
    let response = match wire::decode_request::<TrackerRequest>(&bytes) {
        Ok(request) => {
            tracing::debug!(%peer, ?request, "tracker request");
            registry.handle(request).await
        }
        Err(e) if e.is_replyable() => {
            tracing::warn!(%peer, error = %e, "bad tracker request");
            TrackerResponse::error(e.to_string())
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
            match wire::encode(&TrackerResponse::error("internal error")) {
                Ok(p) => p,
                Err(_) => return,
            }
        }
    };
    if let Err(e) = write_and_close(&mut stream, &payload).await {
        tracing::warn!(%peer, error = %e, "write reply failed");
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use swarm_core::transport::request;
    use swarm_core::{NodeAddress, TrackerPayload};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::sync::oneshot;

    use super::*;
    use crate::store::TrackerStore;

    struct Running {
        addr: NodeAddress,
        stop: oneshot::Sender<()>,
        task: tokio::task::JoinHandle<std::io::Result<()>>,
        _dir: tempfile::TempDir,
    }

    async fn start() -> Running {
        let dir = tempfile::tempdir().unwrap();
        let store = TrackerStore::open(dir.path()).await.unwrap();
        let registry = Registry::new(Arc::new(store));
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = NodeAddress::new("127.0.0.1", listener.local_addr().unwrap().port());
        let (stop, stopped) = oneshot::channel();
        let task = tokio::spawn(run_tracker(listener, registry, async move {
            let _ = stopped.await;
        }));
        Running {
            addr,
            stop,
            task,
            _dir: dir,
        }
    }

    async fn raw_exchange(addr: &NodeAddress, payload: &[u8]) -> Vec<u8> {
        let mut stream = TcpStream::connect((addr.ip_address.as_str(), addr.port))
            .await
            .unwrap();
        stream.write_all(payload).await.unwrap();
        stream.shutdown().await.unwrap();
        let mut out = Vec::new();
        stream.read_to_end(&mut out).await.unwrap();
        out
    }

    #[tokio::test]
    async fn serves_register_and_get_nodes() {
        let tracker = start().await;
        let reply: TrackerResponse = request(
            &tracker.addr,
            &TrackerRequest::Register {
                ip_address: "127.0.0.1".into(),
                port: 5555,
            },
            None,
        )
        .await
        .unwrap();
        assert_eq!(reply, TrackerResponse::Registered { node_id: 1 });

        let reply: TrackerResponse = request(&tracker.addr, &TrackerRequest::GetNodes, None)
            .await
            .unwrap();
        match reply {
            TrackerResponse::Success(TrackerPayload::Nodes { nodes }) => {
                assert_eq!(nodes[&1], NodeAddress::new("127.0.0.1", 5555));
            }
            other => panic!("expected node list, got {other:?}"),
        }
        tracker.stop.send(()).unwrap();
        tracker.task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn garbage_closes_connection_and_listener_survives() {
        let tracker = start().await;
        assert!(raw_exchange(&tracker.addr, b"\x00\x01 not json").await.is_empty());
        assert!(raw_exchange(&tracker.addr, b"").await.is_empty());

        let reply = raw_exchange(&tracker.addr, br#"{"command":"explode"}"#).await;
        let reply: TrackerResponse = wire::decode(&reply).unwrap();
        assert_eq!(reply, TrackerResponse::error("unknown command"));

        let reply = raw_exchange(&tracker.addr, br#"{"command":"disconnect"}"#).await;
        let reply: TrackerResponse = wire::decode(&reply).unwrap();
        assert!(matches!(reply, TrackerResponse::Error { message } if message.starts_with("malformed request")));

        let reply: TrackerResponse = request(
            &tracker.addr,
            &TrackerRequest::Disconnect { node_id: 3 },
            None,
        )
        .await
        .unwrap();
        assert_eq!(reply, TrackerResponse::Disconnected);
    }
}
