//! Raft replication of engine commands.
//!
//! Built on [openraft](https://docs.rs/openraft):
//! - **types**: Raft type configuration and node addresses.
//! - **store**: in-memory log store and the state machine over the [`Engine`](spacevec_core::Engine).
//! - **network**: HTTP transport between peers.
//! - **api**: peer RPC routes and the cluster management endpoints.

pub mod api;
pub mod network;
pub mod store;
pub mod types;

pub use types::{ClusterNode, CommandResponse, NodeId, Raft, TypeConfig};
