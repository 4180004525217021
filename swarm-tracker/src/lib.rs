//! Swarm tracker: node membership and file placement registry over a persisted store.

pub mod config;
pub mod registry;
pub mod server;
pub mod store;

pub use config::Config;
pub use registry::Registry;
pub use server::run_tracker;
pub use store::TrackerStore;
