//! # spacevec-core
//!
//! Embeddable multi-space vector store engine: HNSW approximate nearest
//! neighbor search per space and index, BM25 rerank, versioned vector sets,
//! per-space key-value entries, token-scoped access control, and snapshots.
//!
//! This is the core library crate with zero async dependencies. The HTTP
//! server and Raft cluster live in `spacevec-server`.

/// BM25 scoring over per-vector token lists.
pub mod bm25;
/// Replicated state-machine commands and their outcomes.
pub mod command;
/// Global configuration constants: limits, defaults, and tuning parameters.
pub mod config;
/// Engine: applies commands and serves reads.
pub mod engine;
/// Error type and stable error kinds.
pub mod error;
/// HNSW approximate nearest neighbor index: graph structure, search, insertion, and distance metrics.
pub mod hnsw;
/// Scalar quantization: f32 → u8 compression with per-vector min/scale calibration.
pub mod quantization;
/// Token-based access control.
pub mod rbac;
/// Vector records and metadata values.
pub mod record;
/// Space and index configuration, create and update payloads.
pub mod schema;
/// Search primitives: hits, metadata filter expressions, and rerank fusion.
pub mod search;
/// Point-in-time snapshots.
pub mod snapshot;
/// Storage layer: spaces, versions, indexes, write-ahead log, artifacts.
pub mod storage;

pub use command::{Command, Outcome};
pub use engine::{Engine, EngineImage, Page};
pub use error::{Error, ErrorKind, Result};
