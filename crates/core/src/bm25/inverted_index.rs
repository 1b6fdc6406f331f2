//! Inverted index for BM25 scoring.
//!
//! Maps terms to postings lists (document ID + term frequency). Documents are
//! identified by internal u32 IDs, matching the HNSW node ids of the same index.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A single entry in a term's postings list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Posting {
    /// Internal u32 document ID.
    pub doc_id: u32,
    /// Number of times the term appears in this document.
    pub term_frequency: u32,
}

/// Inverted index mapping terms to postings lists.
///
/// Supports incremental document addition and removal. Document lengths
/// are tracked for BM25 length normalization.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InvertedIndex {
    /// term → list of postings
    pub index: HashMap<String, Vec<Posting>>,
    /// internal_id → document length (number of tokens). Indexed by u32 internal ID.
    pub doc_lengths: Vec<u32>,
    /// Documents currently indexed (those with at least one token).
    pub doc_count: u32,
    /// Sum of all document lengths (for average calculation)
    pub total_doc_length: u64,
}

impl InvertedIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Index a document's tokens under its internal u32 ID. Empty token lists are ignored.
    pub fn add_document(&mut self, internal_id: u32, tokens: &[String]) {
        if tokens.is_empty() {
            return;
        }
        let doc_len = tokens.len() as u32;

        let idx = internal_id as usize;
        if idx >= self.doc_lengths.len() {
            self.doc_lengths.resize(idx + 1, 0);
        }
        self.doc_lengths[idx] = doc_len;
        self.doc_count += 1;
        self.total_doc_length += doc_len as u64;

        let mut tf_map: HashMap<&str, u32> = HashMap::new();
        for token in tokens {
            *tf_map.entry(token.as_str()).or_insert(0) += 1;
        }

        for (term, tf) in tf_map {
            self.index
                .entry(term.to_string())
                .or_default()
                .push(Posting {
                    doc_id: internal_id,
                    term_frequency: tf,
                });
        }
    }

    /// Remove a document. `tokens` must be the list it was added with.
    pub fn remove_document(&mut self, internal_id: u32, tokens: &[String]) {
        let idx = internal_id as usize;
        if idx >= self.doc_lengths.len() || self.doc_lengths[idx] == 0 {
            return;
        }
        let doc_len = self.doc_lengths[idx];
        self.doc_lengths[idx] = 0;
        self.doc_count -= 1;
        self.total_doc_length -= doc_len as u64;

        for token in tokens {
            if let Some(postings) = self.index.get_mut(token) {
                postings.retain(|p| p.doc_id != internal_id);
                if postings.is_empty() {
                    self.index.remove(token);
                }
            }
        }
    }

    /// Returns the average document length across all indexed documents.
    pub fn average_doc_length(&self) -> f32 {
        if self.doc_count == 0 {
            return 0.0;
        }
        self.total_doc_length as f32 / self.doc_count as f32
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn toks(s: &str) -> Vec<String> {
        s.split_whitespace().map(String::from).collect()
    }

    #[test]
    fn test_add_document_updates_index() {
        let mut idx = InvertedIndex::new();
        idx.add_document(0, &toks("the quick brown fox"));
        assert_eq!(idx.doc_count, 1);
        for term in ["the", "quick", "brown", "fox"] {
            assert!(idx.index.contains_key(term));
        }
    }

    #[test]
    fn test_tokens_match_exactly() {
        let mut idx = InvertedIndex::new();
        idx.add_document(0, &toks("Rust"));
        assert!(idx.index.contains_key("Rust"));
        assert!(!idx.index.contains_key("rust"));
    }

    #[test]
    fn test_term_frequency() {
        let mut idx = InvertedIndex::new();
        idx.add_document(0, &toks("hello hello hello world"));
        let postings = idx.index.get("hello").unwrap();
        assert_eq!(postings.len(), 1);
        assert_eq!(postings[0].term_frequency, 3);
        assert_eq!(idx.doc_lengths[0], 4);
    }

    #[test]
    fn test_empty_tokens_not_counted() {
        let mut idx = InvertedIndex::new();
        idx.add_document(0, &[]);
        assert_eq!(idx.doc_count, 0);
        assert_eq!(idx.average_doc_length(), 0.0);
    }

    #[test]
    fn test_remove_document() {
        let mut idx = InvertedIndex::new();
        let a = toks("hello world");
        idx.add_document(0, &a);
        idx.add_document(1, &toks("hello rust"));
        idx.remove_document(0, &a);
        assert_eq!(idx.doc_count, 1);
        assert!(!idx.index.contains_key("world"));
        let postings = idx.index.get("hello").unwrap();
        assert_eq!(postings.len(), 1);
        assert_eq!(postings[0].doc_id, 1);
    }

    #[test]
    fn test_remove_nonexistent_doc() {
        let mut idx = InvertedIndex::new();
        idx.add_document(0, &toks("hello world"));
        idx.remove_document(99, &toks("hello"));
        assert_eq!(idx.doc_count, 1);
    }

    #[test]
    fn test_average_doc_length() {
        let mut idx = InvertedIndex::new();
        idx.add_document(0, &toks("one two three"));
        idx.add_document(1, &toks("four five six seven eight"));
        assert!((idx.average_doc_length() - 4.0).abs() < 1e-6);
    }
}
