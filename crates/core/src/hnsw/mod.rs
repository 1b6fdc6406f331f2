//! Hierarchical Navigable Small World (HNSW) approximate nearest neighbor index.
//!
//! Raw f32 vectors are always stored, so every reported distance is exact. With
//! int8 quantization enabled, the graph is walked with asymmetric f32-vs-u8
//! distances and the final candidates are re-scored against the raw vectors.
//!
//! The graph uses a Struct-of-Arrays (SoA) layout: vector components live in
//! contiguous arenas, with separate arrays for quantization parameters,
//! neighbor lists, layer assignments, and tombstones.

/// Distance metrics: L2, cosine, and dot product.
pub mod distance;
/// HNSW graph structure, configuration, and data storage.
pub mod graph;
/// HNSW insertion with bidirectional links and heuristic pruning.
pub mod insert;
/// HNSW search: single-layer search, multi-layer KNN, filtered search, exact fallback.
pub mod search;
/// Generation-based visited set for graph traversal.
pub mod visited;

pub use distance::DistanceMetric;
pub use graph::{HnswConfig, HnswIndex};
pub use search::{exact_scan, knn_search, knn_search_filtered};
