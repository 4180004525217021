//! Tracker registry: node membership and file placement lookups over the persisted store.

use std::sync::Arc;

use swarm_core::{
    ActiveNodes, Error, FileHash, FileMetadata, FilePlacement, NodeAddress, NodeId,
    TrackerPayload, TrackerRequest, TrackerResponse,
};

use crate::store::TrackerStore;

/// The tracker's single source of truth for who is alive and where each file lives.
#[derive(Clone)]
pub struct Registry {
    store: Arc<TrackerStore>,
}

impl Registry {
    pub fn new(store: Arc<TrackerStore>) -> Self {
        Self { store }
    }

    /// Assign the next node id and record the node's address.
    pub async fn register(&self, ip_address: String, port: u16) -> Result<NodeId, Error> {
        let addr = NodeAddress::new(ip_address, port);
        let node_id = self.store.insert_node(addr.clone()).await?;
        tracing::info!(node_id, %addr, "node registered");
        Ok(node_id)
    }

    /// Every node currently in the registry. Not health checked.
    pub async fn active_nodes(&self) -> ActiveNodes {
        self.store.active_nodes().await
    }

    /// Remove a node. Unknown ids are a no-op.
    pub async fn disconnect(&self, node_id: NodeId) -> Result<(), Error> {
        if self.store.remove_node(node_id).await? {
            tracing::info!(node_id, "node disconnected");
        } else {
            tracing::debug!(node_id, "disconnect for unknown node ignored");
        }
        Ok(())
    }

    /// Record a completed upload: metadata keyed by hash, then the name -> hash entry.
    pub async fn upload(
        &self,
        node_id: NodeId,
        file_name: String,
        placement: FilePlacement,
    ) -> Result<(), Error> {
        if !self.store.contains_node(node_id).await {
            return Err(Error::UnknownNode(node_id));
        }
        if file_name.is_empty() {
            return Err(Error::InvalidRequest("file_name must not be empty".into()));
        }
        placement.validate()?;
        let file_hash = placement.file_hash.clone();
        let total_pieces = placement.total_pieces;
        let meta = FileMetadata {
            file_name: file_name.clone(),
            owning_node_id: node_id,
            placement,
        };
        if !self.store.put_metadata(&meta).await? {
            tracing::debug!(node_id, file_name = %file_name, %file_hash, "content already recorded; keeping existing metadata");
        }
        self.store.set_file(&file_name, file_hash.clone()).await?;
        tracing::info!(node_id, file_name = %file_name, %file_hash, total_pieces, "file uploaded");
        Ok(())
    }

    /// Resolve a file name to the placement of its latest upload.
    pub async fn download(
        &self,
        file_name: &str,
        requester_id: NodeId,
    ) -> Result<FileMetadata, Error> {
        let file_hash: FileHash = self
            .store
            .file_hash(file_name)
            .await
            .ok_or_else(|| Error::FileNotFound(file_name.to_string()))?;
        let meta = self
            .store
            .metadata(&file_hash)
            .await?
            .ok_or_else(|| Error::MetadataMissing {
                file_name: file_name.to_string(),
                file_hash: file_hash.clone(),
            })?;
        tracing::info!(requester_id, file_name, %file_hash, "file resolved");
        Ok(meta)
    }

    /// Run one request and build its reply. Failures become `error` replies.
    pub async fn handle(&self, request: TrackerRequest) -> TrackerResponse {
        let result = match request {
            TrackerRequest::Register { ip_address, port } => self
                .register(ip_address, port)
                .await
                .map(|node_id| TrackerResponse::Registered { node_id }),
            TrackerRequest::Upload {
                node_id,
                file_name,
                file_hash,
                total_pieces,
                piece_distribution,
            } => {
                let placement = FilePlacement {
                    file_hash,
                    total_pieces,
                    piece_distribution,
                };
                self.upload(node_id, file_name, placement)
                    .await
                    .map(|()| TrackerResponse::Uploaded)
            }
            TrackerRequest::Download {
                file_name,
                requester_id,
            } => self
                .download(&file_name, requester_id)
                .await
                .map(|meta| TrackerResponse::Success(TrackerPayload::File(meta.placement))),
            TrackerRequest::GetNodes => Ok(TrackerResponse::Success(TrackerPayload::Nodes {
                nodes: self.active_nodes().await,
            })),
            TrackerRequest::Disconnect { node_id } => self
                .disconnect(node_id)
                .await
                .map(|()| TrackerResponse::Disconnected),
        };
        result.unwrap_or_else(|e| {
            tracing::warn!(error = %e, "request failed");
            TrackerResponse::error(e.to_string())
        })
    }
}
