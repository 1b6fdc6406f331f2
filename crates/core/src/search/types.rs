//! Result types returned by search and rerank.

use serde::{Deserialize, Serialize};

/// One vector search result. Lower distance means more similar.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    pub id: u64,
    pub distance: f32,
}

/// One rerank result: the vector distance plus the lexical score used to reorder it.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RerankHit {
    pub id: u64,
    pub distance: f32,
    pub bm25_score: f32,
}
