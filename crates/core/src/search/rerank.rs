//! Rerank fusion: combines vector distances with BM25 scores.
//!
//! Both signals are normalized over the candidate pool:
//! - distances by min-max, inverted so that the closest candidate gets 1
//!   (every candidate gets 1 when all distances are equal);
//! - BM25 scores by dividing by the pool maximum (all 0 when the maximum is 0).
//!
//! `combined = w * vnorm + (1 - w) * lnorm` with `w = RERANK_VECTOR_WEIGHT`.

use crate::config;
use crate::search::types::{RerankHit, SearchHit};

/// Fuse a vector candidate pool with per-candidate BM25 scores and keep the best `top_k`.
///
/// `bm25` must be aligned with `pool`. Ordering is combined score descending,
/// then distance ascending, then id ascending, using total ordering on floats.
pub fn fuse(pool: &[SearchHit], bm25: &[f32], top_k: usize) -> Vec<RerankHit> {
    debug_assert_eq!(pool.len(), bm25.len());
    if pool.is_empty() || top_k == 0 {
        return Vec::new();
    }

    let (d_min, d_max) = pool.iter().fold((f32::MAX, f32::MIN), |(lo, hi), h| {
        (lo.min(h.distance), hi.max(h.distance))
    });
    let d_range = d_max - d_min;
    let s_max = bm25.iter().copied().fold(0.0f32, f32::max);
    let w = config::RERANK_VECTOR_WEIGHT;

    let mut scored: Vec<(f32, RerankHit)> = pool
        .iter()
        .zip(bm25)
        .map(|(hit, &s)| {
            let vnorm = if d_range > 0.0 {
                (d_max - hit.distance) / d_range
            } else {
                1.0
            };
            let lnorm = if s_max > 0.0 { s / s_max } else { 0.0 };
            (
                w * vnorm + (1.0 - w) * lnorm,
                RerankHit {
                    id: hit.id,
                    distance: hit.distance,
                    bm25_score: s,
                },
            )
        })
        .collect();

    scored.sort_by(|(ca, a), (cb, b)| {
        cb.total_cmp(ca)
            .then_with(|| a.distance.total_cmp(&b.distance))
            .then_with(|| a.id.cmp(&b.id))
    });
    scored.truncate(top_k);
    scored.into_iter().map(|(_, hit)| hit).collect()
}

/// Size of the vector candidate pool for a rerank of `top_k` results.
pub fn pool_size(top_k: usize) -> usize {
    top_k.saturating_mul(config::RERANK_OVERFETCH).max(top_k)
}
