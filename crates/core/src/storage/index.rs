//! One dense index inside one version: records, HNSW graph, and BM25 postings.
//!
//! Records are keyed by their caller-assigned `u64` id. Graph and postings use
//! dense internal `u32` ids; an upsert of an existing id tombstones the old node
//! and appends a new one. When tombstones outnumber live nodes the index is
//! compacted by rebuilding from the live records.

use crate::bm25::{score_candidates, InvertedIndex};
use crate::error::{Error, Result};
use crate::hnsw::{knn_search_filtered, HnswIndex};
use crate::record::VectorRecord;
use crate::schema::IndexConfig;
use crate::search::filter::FilterExpr;
use crate::search::rerank::{fuse, pool_size};
use crate::search::types::{RerankHit, SearchHit};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

/// Records and indexes for one (version, index) pair.
///
/// Cloning is cheap for records (shared `Arc`s) but copies the graph arenas;
/// versions are forked with `Arc::make_mut`, so a clone only happens when a
/// sealed snapshot still shares the data.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VectorIndex {
    pub config: IndexConfig,
    pub records: BTreeMap<u64, Arc<VectorRecord>>,
    pub hnsw: HnswIndex,
    pub lexical: InvertedIndex,
    /// Caller id → internal u32 id of its live node.
    pub id_to_internal: HashMap<u64, u32>,
    /// Internal u32 id → caller id. Indexed by internal id, tombstones included.
    pub internal_to_id: Vec<u64>,
}

/// One page of records.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VectorPage {
    pub vectors: Vec<VectorRecord>,
    pub total_count: usize,
}

impl VectorIndex {
    pub fn new(config: IndexConfig) -> Self {
        let hnsw = HnswIndex::new(config.dimension, config.hnsw());
        Self {
            config,
            records: BTreeMap::new(),
            hnsw,
            lexical: InvertedIndex::new(),
            id_to_internal: HashMap::new(),
            internal_to_id: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn get(&self, id: u64) -> Option<&Arc<VectorRecord>> {
        self.records.get(&id)
    }

    /// Validate internal invariants after deserialization.
    pub fn validate(&self) -> std::result::Result<(), String> {
        let nc = self.hnsw.node_count as usize;

        if self.hnsw.dimension != self.config.dimension {
            return Err(format!(
                "HNSW dimension {} != index dimension {}",
                self.hnsw.dimension, self.config.dimension
            ));
        }
        if self.hnsw.config.metric != self.config.metric {
            return Err(format!(
                "HNSW metric {} != index metric {}",
                self.hnsw.config.metric, self.config.metric
            ));
        }
        self.hnsw.validate()?;

        if self.internal_to_id.len() != nc {
            return Err(format!(
                "internal_to_id length {} != node_count {}",
                self.internal_to_id.len(),
                nc
            ));
        }
        if self.id_to_internal.len() != self.records.len() {
            return Err(format!(
                "id_to_internal({}) != records({})",
                self.id_to_internal.len(),
                self.records.len()
            ));
        }
        if self.records.len() != self.hnsw.len() {
            return Err(format!(
                "records({}) != live HNSW nodes({})",
                self.records.len(),
                self.hnsw.len()
            ));
        }
        for (&id, &internal) in &self.id_to_internal {
            if !self.records.contains_key(&id) {
                return Err(format!("mapped id {id} has no record"));
            }
            match self.internal_to_id.get(internal as usize) {
                Some(&back) if back == id && !self.hnsw.is_deleted(internal) => {}
                _ => return Err(format!("id {id} maps to invalid internal id {internal}")),
            }
        }
        Ok(())
    }

    /// Validate a batch against this index without mutating anything.
    pub fn check_batch(&self, records: &[VectorRecord]) -> Result<()> {
        for r in records {
            r.validate(self.config.dimension)?;
        }
        Ok(())
    }

    /// Insert or overwrite records. The batch must have passed [`check_batch`](Self::check_batch).
    pub fn upsert(&mut self, records: Vec<VectorRecord>) {
        for record in records {
            self.remove_live(record.id);
            let internal_id = self.internal_to_id.len() as u32;
            self.internal_to_id.push(record.id);
            self.id_to_internal.insert(record.id, internal_id);
            self.lexical.add_document(internal_id, record.tokens());
            self.hnsw.insert(internal_id, &record.data);
            self.records.insert(record.id, Arc::new(record));
        }
        self.maybe_compact();
    }

    /// Remove a record. Returns `false` if the id was not present.
    pub fn delete(&mut self, id: u64) -> bool {
        let existed = self.remove_live(id);
        if existed {
            self.maybe_compact();
        }
        existed
    }

    fn remove_live(&mut self, id: u64) -> bool {
        let Some(old) = self.records.remove(&id) else {
            return false;
        };
        if let Some(internal_id) = self.id_to_internal.remove(&id) {
            self.hnsw.mark_deleted(internal_id);
            self.lexical.remove_document(internal_id, old.tokens());
        }
        true
    }

    fn maybe_compact(&mut self) {
        let deleted = self.hnsw.deleted_count();
        if deleted > 0 && deleted > self.hnsw.len() {
            tracing::debug!(
                deleted,
                live = self.hnsw.len(),
                "Compacting index after deletes"
            );
            self.rebuild(self.config.clone());
        }
    }

    /// Rebuild graph and postings from the live records under `config`.
    ///
    /// The caller guarantees `config` has the same dimension as the stored records.
    pub fn rebuild(&mut self, config: IndexConfig) {
        let mut fresh = VectorIndex::new(config);
        for record in self.records.values() {
            let internal_id = fresh.internal_to_id.len() as u32;
            fresh.internal_to_id.push(record.id);
            fresh.id_to_internal.insert(record.id, internal_id);
            fresh.lexical.add_document(internal_id, record.tokens());
            fresh.hnsw.insert(internal_id, &record.data);
            fresh.records.insert(record.id, Arc::clone(record));
        }
        *self = fresh;
    }

    fn check_query(&self, query: &[f32]) -> Result<()> {
        crate::record::validate_vector(query, self.config.dimension)
            .map_err(|e| Error::Validation(format!("query {e}")))
    }

    /// Top-k nearest records, ascending by distance then id.
    pub fn search(
        &self,
        query: &[f32],
        top_k: usize,
        filter: Option<&FilterExpr>,
    ) -> Result<Vec<SearchHit>> {
        self.check_query(query)?;
        let raw = match filter {
            None => knn_search_filtered(&self.hnsw, query, top_k, &|_: u32| true),
            Some(expr) => {
                let filter_fn = |internal_id: u32| -> bool {
                    self.internal_to_id
                        .get(internal_id as usize)
                        .and_then(|id| self.records.get(id))
                        .is_some_and(|r| expr.matches(&r.metadata))
                };
                knn_search_filtered(&self.hnsw, query, top_k, &filter_fn)
            }
        };
        let mut hits: Vec<SearchHit> = raw
            .into_iter()
            .filter_map(|(distance, internal_id)| {
                let id = *self.internal_to_id.get(internal_id as usize)?;
                Some(SearchHit { id, distance })
            })
            .collect();
        hits.sort_by(|a, b| a.distance.total_cmp(&b.distance).then(a.id.cmp(&b.id)));
        Ok(hits)
    }

    /// Vector search over an overfetched pool, reordered by combined vector + BM25 score.
    pub fn rerank(
        &self,
        query: &[f32],
        query_tokens: &[String],
        top_k: usize,
    ) -> Result<Vec<RerankHit>> {
        let pool = self.search(query, pool_size(top_k), None)?;
        let internal: Vec<u32> = pool
            .iter()
            .filter_map(|h| self.id_to_internal.get(&h.id).copied())
            .collect();
        let scores = score_candidates(&self.lexical, query_tokens, &internal);
        Ok(fuse(&pool, &scores, top_k))
    }

    /// Records in ascending id order, optionally filtered, offset-paginated.
    pub fn page(&self, start: usize, limit: usize, filter: Option<&FilterExpr>) -> VectorPage {
        match filter {
            None => VectorPage {
                vectors: self
                    .records
                    .values()
                    .skip(start)
                    .take(limit)
                    .map(|r| (**r).clone())
                    .collect(),
                total_count: self.records.len(),
            },
            Some(expr) => {
                let matching: Vec<&Arc<VectorRecord>> = self
                    .records
                    .values()
                    .filter(|r| expr.matches(&r.metadata))
                    .collect();
                VectorPage {
                    total_count: matching.len(),
                    vectors: matching
                        .into_iter()
                        .skip(start)
                        .take(limit)
                        .map(|r| (**r).clone())
                        .collect(),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::hnsw::DistanceMetric;
    use crate::record::MetadataValue;

    fn l2_index(dim: usize) -> VectorIndex {
        VectorIndex::new(IndexConfig::new(dim, DistanceMetric::L2))
    }

    fn sample() -> VectorIndex {
        let mut idx = l2_index(4);
        idx.upsert(vec![
            VectorRecord::new(1, vec![0.1, 0.2, 0.3, 0.4]),
            VectorRecord::new(2, vec![0.5, 0.6, 0.7, 0.8]),
            VectorRecord::new(3, vec![0.2, 0.3, 0.4, 0.5]),
            VectorRecord::new(4, vec![0.9, 0.8, 0.7, 0.6]),
            VectorRecord::new(5, vec![0.2, 0.3, 0.4, 0.3]),
        ]);
        idx
    }

    // ── Upsert / delete ────────────────────────────────────────────────

    #[test]
    fn test_check_batch_rejects_wrong_dimension() {
        let idx = l2_index(4);
        let err = idx
            .check_batch(&[VectorRecord::new(1, vec![1.0, 2.0])])
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
    }

    #[test]
    fn test_upsert_same_id_keeps_one_record() {
        let mut idx = l2_index(2);
        idx.upsert(vec![VectorRecord::new(7, vec![0.0, 0.0])]);
        idx.upsert(vec![VectorRecord::new(7, vec![1.0, 1.0])]);
        assert_eq!(idx.len(), 1);
        assert_eq!(idx.get(7).unwrap().data, vec![1.0, 1.0]);
        let hits = idx.search(&[1.0, 1.0], 5, None).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, 7);
        assert_eq!(hits[0].distance, 0.0);
        assert!(idx.validate().is_ok());
    }

    #[test]
    fn test_delete_and_compaction() {
        let mut idx = l2_index(2);
        let recs: Vec<VectorRecord> = (0..10)
            .map(|i| VectorRecord::new(i, vec![i as f32, 0.0]))
            .collect();
        idx.upsert(recs);
        for i in 0..8 {
            assert!(idx.delete(i));
        }
        assert!(!idx.delete(0));
        assert_eq!(idx.len(), 2);
        // Compaction dropped tombstones once they outnumbered live nodes
        assert!(idx.hnsw.deleted_count() <= idx.hnsw.len());
        assert!(idx.validate().is_ok());
        let ids: Vec<u64> = idx
            .search(&[0.0, 0.0], 10, None)
            .unwrap()
            .iter()
            .map(|h| h.id)
            .collect();
        assert_eq!(ids, vec![8, 9]);
    }

    // ── Search ─────────────────────────────────────────────────────────

    #[test]
    fn test_search_end_to_end_order() {
        let idx = sample();
        let hits = idx.search(&[0.2, 0.3, 0.4, 0.3], 3, None).unwrap();
        assert_eq!(hits.len(), 3);
        assert_eq!(hits[0].id, 5);
        assert_eq!(hits[0].distance, 0.0);
        // 1 and 3 are both at 0.04 up to f32 rounding
        let mut rest: Vec<u64> = hits[1..].iter().map(|h| h.id).collect();
        rest.sort_unstable();
        assert_eq!(rest, vec![1, 3]);
        assert!((hits[1].distance - 0.04).abs() < 1e-6);
    }

    #[test]
    fn test_search_rejects_bad_query() {
        let idx = sample();
        let err = idx.search(&[0.0; 3], 3, None).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
    }

    #[test]
    fn test_filtered_search_returns_all_matches() {
        let mut idx = l2_index(2);
        let recs: Vec<VectorRecord> = (0..50)
            .map(|i| {
                let tag = if i % 10 == 0 { "first" } else { "other" };
                VectorRecord::new(i, vec![i as f32, 1.0])
                    .with_meta("meta", MetadataValue::String(tag.into()))
            })
            .collect();
        idx.upsert(recs);
        let f = FilterExpr::parse("meta == 'first'").unwrap();
        let hits = idx.search(&[0.0, 1.0], 10, Some(&f)).unwrap();
        let ids: Vec<u64> = hits.iter().map(|h| h.id).collect();
        assert_eq!(ids, vec![0, 10, 20, 30, 40]);
    }

    // ── Rerank ─────────────────────────────────────────────────────────

    #[test]
    fn test_rerank_promotes_lexical_match() {
        let mut idx = l2_index(2);
        idx.upsert(vec![
            VectorRecord::new(1, vec![0.0, 0.0]).with_tokens(["alpha"]),
            VectorRecord::new(2, vec![0.1, 0.0]).with_tokens(["beta"]),
            VectorRecord::new(3, vec![1.0, 0.0]).with_tokens(["gamma", "target"]),
        ]);
        let hits = idx
            .rerank(&[0.0, 0.0], &["target".to_string()], 3)
            .unwrap();
        assert_eq!(hits.len(), 3);
        // id 1: 0.5 + 0 ; id 3: 0 + 0.5 ; tie broken by distance
        assert_eq!(hits[0].id, 1);
        assert_eq!(hits[1].id, 3);
        assert!(hits[1].bm25_score > 0.0);
        assert_eq!(hits[2].bm25_score, 0.0);
    }

    #[test]
    fn test_rerank_is_deterministic() {
        let mut idx = sample();
        idx.upsert(vec![VectorRecord::new(6, vec![0.2, 0.3, 0.4, 0.31]).with_tokens(["x", "y"])]);
        let q = [0.2, 0.3, 0.4, 0.3];
        let toks = vec!["y".to_string()];
        assert_eq!(idx.rerank(&q, &toks, 4).unwrap(), idx.rerank(&q, &toks, 4).unwrap());
    }

    // ── Paging / rebuild ───────────────────────────────────────────────

    #[test]
    fn test_page_ascending_ids() {
        let idx = sample();
        let page = idx.page(1, 2, None);
        assert_eq!(page.total_count, 5);
        let ids: Vec<u64> = page.vectors.iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![2, 3]);
        assert_eq!(idx.page(1, 2, None), page);
    }

    #[test]
    fn test_rebuild_with_quantization_preserves_results() {
        let mut idx = sample();
        let before = idx.search(&[0.2, 0.3, 0.4, 0.3], 3, None).unwrap();
        let mut cfg = idx.config.clone();
        cfg.quantization_config = Some(crate::schema::QuantizationConfig {
            scalar: Some(crate::schema::ScalarQuantization { kind: "int8".into() }),
        });
        idx.rebuild(cfg);
        assert!(idx.hnsw.config.quantized);
        assert!(idx.validate().is_ok());
        let after = idx.search(&[0.2, 0.3, 0.4, 0.3], 3, None).unwrap();
        assert_eq!(before, after);
    }

    #[test]
    fn test_validate_detects_corruption() {
        let mut idx = sample();
        idx.internal_to_id.pop();
        assert!(idx.validate().is_err());
    }
}
