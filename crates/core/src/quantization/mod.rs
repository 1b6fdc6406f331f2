//! Vector quantization for the HNSW index.
//!
//! Only scalar int8 quantization is supported: each vector is mapped to u8 codes
//! with a per-vector `min` and `scale`. Graph traversal compares the f32 query
//! against the codes (asymmetric distance); final scores use the raw f32 vectors.

/// Scalar quantization and the distance kernels that operate on it.
pub mod scalar;

pub use scalar::{QuantizedVector, VectorRef};
