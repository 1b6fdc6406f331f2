//! Okapi BM25 lexical scoring over caller-supplied token lists.
//!
//! Tokens are matched exactly; no stemming, case folding or stop words are
//! applied on this side.

pub mod inverted_index;
pub mod scorer;

pub use inverted_index::InvertedIndex;
pub use scorer::score_candidates;
