//! spacevec-server: HTTP API and Raft cluster for spacevec.
//!
//! The engine itself lives in `spacevec-core`.

/// REST API layer: Axum router, handlers, models, auth, metrics.
pub mod api;
/// Raft consensus clustering.
pub mod cluster;
/// Ordering of mutating commands through the WAL or Raft.
pub mod coordinator;
