//! Query-side logic shared by all indexes: filter expressions, rerank fusion, and result types.

/// Filter expression parser and evaluator.
pub mod filter;
/// Vector + BM25 rerank fusion.
pub mod rerank;
/// Search and rerank result types.
pub mod types;

pub use filter::FilterExpr;
pub use rerank::{fuse, pool_size};
pub use types::{RerankHit, SearchHit};
