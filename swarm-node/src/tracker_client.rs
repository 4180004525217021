//! Node -> tracker requests. Error replies are mapped back through [`Error::from_remote`];
//! a reply of the wrong shape is a connection failure.

use std::time::Duration;

use swarm_core::transport::request;
use swarm_core::{
    ActiveNodes, Error, FilePlacement, NodeAddress, NodeId, TrackerPayload, TrackerRequest,
    TrackerResponse,
};

#[derive(Debug, Clone)]
pub struct TrackerClient {
    addr: NodeAddress,
    timeout: Option<Duration>,
}

impl TrackerClient {
    pub fn new(addr: NodeAddress, timeout: Option<Duration>) -> Self {
        Self { addr, timeout }
    }

    pub fn addr(&self) -> &NodeAddress {
        &self.addr
    }

    async fn call(&self, req: &TrackerRequest) -> Result<TrackerResponse, Error> {
        match request(&self.addr, req, self.timeout).await? {
            TrackerResponse::Error { message } => Err(Error::from_remote(message)),
            reply => Ok(reply),
        }
    }

    fn unexpected(&self, reply: TrackerResponse) -> Error {
        Error::connection(format!("unexpected reply from tracker {}: {reply:?}", self.addr))
    }

    pub async fn register(&self, me: &NodeAddress) -> Result<NodeId, Error> {
        let req = TrackerRequest::Register {
            ip_address: me.ip_address.clone(),
            port: me.port,
        };
        match self.call(&req).await? {
            TrackerResponse::Registered { node_id } => Ok(node_id),
            other => Err(self.unexpected(other)),
        }
    }

    pub async fn get_nodes(&self) -> Result<ActiveNodes, Error> {
        match self.call(&TrackerRequest::GetNodes).await? {
            TrackerResponse::Success(TrackerPayload::Nodes { nodes }) => Ok(nodes),
            other => Err(self.unexpected(other)),
        }
    }

    pub async fn upload(
        &self,
        node_id: NodeId,
        file_name: &str,
        placement: &FilePlacement,
    ) -> Result<(), Error> {
        let req = TrackerRequest::Upload {
            node_id,
            file_name: file_name.to_string(),
            file_hash: placement.file_hash.clone(),
            total_pieces: placement.total_pieces,
            piece_distribution: placement.piece_distribution.clone(),
        };
        match self.call(&req).await? {
            TrackerResponse::Uploaded => Ok(()),
            other => Err(self.unexpected(other)),
        }
    }

    pub async fn download(
        &self,
        file_name: &str,
        requester_id: NodeId,
    ) -> Result<FilePlacement, Error> {
        let req = TrackerRequest::Download {
            file_name: file_name.to_string(),
            requester_id,
        };
        match self.call(&req).await? {
            TrackerResponse::Success(TrackerPayload::File(placement)) => Ok(placement),
            other => Err(self.unexpected(other)),
        }
    }

    pub async fn disconnect(&self, node_id: NodeId) -> Result<(), Error> {
        match self.call(&TrackerRequest::Disconnect { node_id }).await? {
            TrackerResponse::Disconnected => Ok(()),
            other => Err(self.unexpected(other)),
        }
    }
}
