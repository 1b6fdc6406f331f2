//! BM25 Okapi scoring engine.
//!
//! Scores a fixed candidate set against a query using the BM25 formula with
//! `k1` and `b` from [`crate::config`].

use crate::bm25::inverted_index::InvertedIndex;
use crate::config;
use std::collections::HashMap;

/// BM25 score for each entry of `candidates`, in the same order.
///
/// Candidates without indexed tokens score 0. Every query token contributes,
/// so a repeated query token counts once per occurrence.
pub fn score_candidates(
    index: &InvertedIndex,
    query_tokens: &[String],
    candidates: &[u32],
) -> Vec<f32> {
    if query_tokens.is_empty() || index.doc_count == 0 || candidates.is_empty() {
        return vec![0.0; candidates.len()];
    }

    let avgdl = index.average_doc_length();
    let n = index.doc_count as f32;
    let k1 = config::BM25_K1;
    let b = config::BM25_B;

    let mut scores: HashMap<u32, f32> = candidates.iter().map(|&id| (id, 0.0)).collect();

    for token in query_tokens {
        let Some(postings) = index.index.get(token) else {
            continue;
        };
        let df = postings.len() as f32;
        // IDF: ln((N - df + 0.5) / (df + 0.5) + 1)
        let idf = ((n - df + 0.5) / (df + 0.5) + 1.0).ln();

        for posting in postings {
            let Some(score) = scores.get_mut(&posting.doc_id) else {
                continue;
            };
            let dl = index
                .doc_lengths
                .get(posting.doc_id as usize)
                .copied()
                .unwrap_or(0) as f32;
            let tf = posting.term_frequency as f32;
            let tf_norm = (tf * (k1 + 1.0)) / (tf + k1 * (1.0 - b + b * dl / avgdl));
            *score += idf * tf_norm;
        }
    }

    candidates
        .iter()
        .map(|id| scores.get(id).copied().unwrap_or(0.0))
        .collect()
}
