//! HNSW graph structure and configuration.
//!
//! [`HnswConfig`] defines tuning parameters (M, ef_construction, ef_search, metric, quantization).
//! [`HnswIndex`] stores the graph using Struct-of-Arrays layout for cache efficiency.

use crate::config;
use crate::hnsw::distance::DistanceMetric;
use crate::quantization::{QuantizedVector, VectorRef};
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

/// Configuration parameters for an HNSW index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HnswConfig {
    /// Number of bidirectional links per node (except layer 0, which uses `m_max0`).
    pub m: usize,
    /// Maximum links per node at layer 0 (`2 * m`).
    pub m_max0: usize,
    /// Candidate list size during index construction.
    pub ef_construction: usize,
    /// Candidate list size during search (raised to `top_k` when smaller).
    pub ef_search: usize,
    /// Maximum number of layers in the graph.
    pub max_layers: usize,
    /// Distance function for similarity computation.
    pub metric: DistanceMetric,
    /// Store int8 codes and traverse the graph with asymmetric distances.
    pub quantized: bool,
}

impl HnswConfig {
    /// Builds a config from the user-facing parameters, filling in the rest with defaults.
    pub fn new(metric: DistanceMetric, m: usize, ef_construction: usize, quantized: bool) -> Self {
        Self {
            m,
            m_max0: m * 2,
            ef_construction,
            ef_search: config::HNSW_DEFAULT_EF_SEARCH,
            max_layers: config::HNSW_DEFAULT_MAX_LAYERS,
            metric,
            quantized,
        }
    }
}

impl Default for HnswConfig {
    fn default() -> Self {
        Self::new(
            DistanceMetric::L2,
            config::HNSW_DEFAULT_M,
            config::HNSW_DEFAULT_EF_CONSTRUCTION,
            false,
        )
    }
}

/// HNSW index in Struct-of-Arrays layout.
///
/// Raw f32 vectors are always kept so that reported distances are exact. When
/// `config.quantized` is set the u8 arena is populated as well and used for traversal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HnswIndex {
    pub config: HnswConfig,
    pub raw_vectors: Vec<f32>,
    // SoA: quantized vector arena (empty unless config.quantized)
    pub vector_data: Vec<u8>,
    pub vector_min: Vec<f32>,
    pub vector_scale: Vec<f32>,
    // SoA: graph structure
    pub neighbors: Vec<Vec<Vec<u32>>>, // [node_id][layer][neighbor_ids]
    pub layers: Vec<u8>,
    pub deleted: Vec<bool>,
    pub entry_point: Option<u32>,
    pub max_layer: usize,
    pub dimension: usize,
    pub node_count: u32,
    pub live_count: u32,
}

impl HnswIndex {
    /// Creates a new empty HNSW index with the given dimension and configuration.
    pub fn new(dimension: usize, config: HnswConfig) -> Self {
        Self {
            config,
            raw_vectors: Vec::new(),
            vector_data: Vec::new(),
            vector_min: Vec::new(),
            vector_scale: Vec::new(),
            neighbors: Vec::new(),
            layers: Vec::new(),
            deleted: Vec::new(),
            entry_point: None,
            max_layer: 0,
            dimension,
            node_count: 0,
            live_count: 0,
        }
    }

    /// Returns the number of non-deleted nodes in the index.
    pub fn len(&self) -> usize {
        self.live_count as usize
    }

    /// Returns `true` if the index contains no non-deleted nodes.
    pub fn is_empty(&self) -> bool {
        self.live_count == 0
    }

    /// Number of soft-deleted nodes still occupying arena slots.
    pub fn deleted_count(&self) -> usize {
        (self.node_count - self.live_count) as usize
    }

    /// Draw the layer for `internal_id` from an exponential distribution.
    ///
    /// The RNG is seeded from the node id, so replaying the same inserts on
    /// another replica yields the same graph.
    pub fn level_for(&self, internal_id: u32) -> usize {
        let seed = config::HNSW_LEVEL_SEED ^ (internal_id as u64).wrapping_mul(0x9E37_79B9_7F4A_7C15);
        let mut rng = rand::rngs::StdRng::seed_from_u64(seed);
        let r: f64 = 1.0 - rng.gen::<f64>(); // (0, 1]
        let ml = 1.0 / (self.config.m.max(2) as f64).ln();
        let level = (-r.ln() * ml).floor() as usize;
        level.min(self.config.max_layers - 1)
    }

    /// Raw f32 vector slice for the given node.
    #[inline]
    pub fn get_raw_vector(&self, id: u32) -> &[f32] {
        let start = id as usize * self.dimension;
        &self.raw_vectors[start..start + self.dimension]
    }

    /// Quantized view of the given node. Only valid when `config.quantized`.
    #[inline]
    pub fn get_vector_ref(&self, id: u32) -> VectorRef<'_> {
        let idx = id as usize;
        let start = idx * self.dimension;
        VectorRef {
            data: &self.vector_data[start..start + self.dimension],
            min: self.vector_min[idx],
            scale: self.vector_scale[idx],
        }
    }

    /// Returns `true` if the node with the given internal ID has been soft-deleted.
    #[inline]
    pub fn is_deleted(&self, id: u32) -> bool {
        self.deleted[id as usize]
    }

    /// Append a node's vector data to the arenas.
    pub(crate) fn push_vector(&mut self, raw: &[f32]) {
        self.raw_vectors.extend_from_slice(raw);
        if self.config.quantized {
            let q = QuantizedVector::quantize(raw);
            self.vector_data.extend_from_slice(&q.data);
            self.vector_min.push(q.min);
            self.vector_scale.push(q.scale);
        }
    }

    /// Mark a node as deleted by internal ID. Returns `false` if it was unknown or already deleted.
    pub fn mark_deleted(&mut self, internal_id: u32) -> bool {
        match self.deleted.get_mut(internal_id as usize) {
            Some(flag) if !*flag => {
                *flag = true;
                self.live_count -= 1;
                true
            }
            _ => false,
        }
    }

    /// Checks arena lengths and graph references after deserialization.
    pub fn validate(&self) -> Result<(), String> {
        let nc = self.node_count as usize;
        let dim = self.dimension;

        if self.raw_vectors.len() != nc * dim {
            return Err(format!(
                "raw_vectors length {} != node_count({}) * dimension({})",
                self.raw_vectors.len(),
                nc,
                dim
            ));
        }
        if self.config.quantized {
            if self.vector_data.len() != nc * dim {
                return Err(format!(
                    "vector_data length {} != node_count({}) * dimension({})",
                    self.vector_data.len(),
                    nc,
                    dim
                ));
            }
            if self.vector_min.len() != nc || self.vector_scale.len() != nc {
                return Err(format!(
                    "quantization params ({}, {}) != node_count {}",
                    self.vector_min.len(),
                    self.vector_scale.len(),
                    nc
                ));
            }
        }
        for (name, len) in [
            ("neighbors", self.neighbors.len()),
            ("layers", self.layers.len()),
            ("deleted", self.deleted.len()),
        ] {
            if len != nc {
                return Err(format!("{name} length {len} != node_count {nc}"));
            }
        }
        let live = self.deleted.iter().filter(|d| !**d).count();
        if live != self.live_count as usize {
            return Err(format!(
                "live_count {} != non-deleted nodes {}",
                self.live_count, live
            ));
        }
        if let Some(ep) = self.entry_point {
            if ep as usize >= nc {
                return Err(format!("entry_point {} >= node_count {}", ep, nc));
            }
        } else if nc > 0 {
            return Err("entry_point missing for non-empty graph".to_string());
        }
        for (node_id, node_neighbors) in self.neighbors.iter().enumerate() {
            for (layer, layer_neighbors) in node_neighbors.iter().enumerate() {
                if let Some(&bad) = layer_neighbors.iter().find(|&&n| n as usize >= nc) {
                    return Err(format!(
                        "neighbor {} out of bounds (node_count={}) at node {} layer {}",
                        bad, nc, node_id, layer
                    ));
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_level_is_deterministic() {
        let a = HnswIndex::new(4, HnswConfig::default());
        let b = HnswIndex::new(4, HnswConfig::default());
        for id in 0..500 {
            assert_eq!(a.level_for(id), b.level_for(id));
        }
    }

    #[test]
    fn test_level_distribution_mostly_zero() {
        let idx = HnswIndex::new(4, HnswConfig::default());
        let zeros = (0..1000).filter(|&id| idx.level_for(id) == 0).count();
        assert!(zeros > 800, "expected most nodes on layer 0, got {zeros}");
        assert!((0..1000).all(|id| idx.level_for(id) < idx.config.max_layers));
    }

    #[test]
    fn test_push_vector_quantized_arena() {
        let mut idx = HnswIndex::new(3, HnswConfig::new(DistanceMetric::L2, 8, 32, true));
        idx.push_vector(&[0.0, 0.5, 1.0]);
        assert_eq!(idx.raw_vectors.len(), 3);
        assert_eq!(idx.vector_data.len(), 3);
        assert_eq!(idx.vector_min.len(), 1);
    }

    #[test]
    fn test_validate_detects_bad_entry_point() {
        let mut idx = HnswIndex::new(2, HnswConfig::default());
        idx.entry_point = Some(3);
        assert!(idx.validate().is_err());
    }
}
