//! Swarm protocol reference implementation.
//! Chunking, wire types and codec, placement and retrieval. The tracker and node daemons
//! supply sockets, storage and persistence.

pub mod chunk;
pub mod error;
pub mod identity;
pub mod metadata;
pub mod placement;
pub mod protocol;
pub mod retrieval;
pub mod transport;
pub mod wire;

pub use chunk::{ChunkedFile, DEFAULT_PIECE_SIZE};
pub use error::Error;
pub use identity::{magnet_link, FileHash, NodeAddress, NodeId, PieceIndex};
pub use metadata::{ActiveNodes, FileMetadata, FilePlacement, PieceDistribution};
pub use protocol::{PeerRequest, PeerResponse, PieceData, TrackerPayload, TrackerRequest, TrackerResponse};
pub use transport::PeerTransport;
