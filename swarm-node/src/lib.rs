//! Swarm node: piece store, peer listener, tracker client and the node lifecycle.

pub mod agent;
pub mod commands;
pub mod config;
pub mod peer;
pub mod store;
pub mod tracker_client;

pub use agent::{DownloadReport, Node, UploadReport};
pub use config::Config;
pub use peer::TcpPeers;
pub use store::PieceStore;
pub use tracker_client::TrackerClient;
