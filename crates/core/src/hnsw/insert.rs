//! HNSW insertion algorithm.
//!
//! Inserts a vector into the HNSW graph with bidirectional connections and
//! heuristic neighbor pruning (Algorithm 4 from the HNSW paper).

use crate::hnsw::graph::HnswIndex;
use crate::hnsw::search::search_layer;
use crate::hnsw::visited::VisitedSet;

impl HnswIndex {
    /// Insert a new vector. `internal_id` must equal `node_count` before this call.
    pub fn insert(&mut self, internal_id: u32, raw_vector: &[f32]) {
        debug_assert_eq!(internal_id, self.node_count);
        let level = self.level_for(internal_id);

        let entry_point = match self.entry_point {
            Some(ep) => ep,
            None => {
                self.push_vector(raw_vector);
                self.neighbors.push(vec![Vec::new(); level + 1]);
                self.layers.push(level as u8);
                self.deleted.push(false);
                self.node_count += 1;
                self.live_count += 1;
                self.entry_point = Some(internal_id);
                self.max_layer = level;
                return;
            }
        };

        let query_norm_sq: f32 = raw_vector.iter().map(|&x| x * x).sum();
        let mut visited = VisitedSet::new(self.node_count as usize);
        let no_filter = |_: u32| true;

        // Phase 1: greedy descent from the top layer down to level + 1
        let mut current_ep = entry_point;
        for layer in (level + 1..=self.max_layer).rev() {
            let results = search_layer(
                self,
                raw_vector,
                std::slice::from_ref(&current_ep),
                1,
                layer,
                &mut visited,
                query_norm_sq,
                &no_filter,
                true,
            );
            if let Some(&(_, nearest)) = results.first() {
                current_ep = nearest;
            }
        }

        // Phase 2: collect neighbor lists for every layer the node lives on
        let top = level.min(self.max_layer);
        let mut node_neighbors: Vec<Vec<u32>> = vec![Vec::new(); level + 1];
        let mut layer_eps: Vec<u32> = vec![current_ep];
        for layer in (0..=top).rev() {
            // Deleted nodes still route traffic, so they stay eligible as links.
            let candidates = search_layer(
                self,
                raw_vector,
                &layer_eps,
                self.config.ef_construction,
                layer,
                &mut visited,
                query_norm_sq,
                &no_filter,
                true,
            );
            let selected = select_neighbors_heuristic(self, &candidates, self.m_for(layer));
            node_neighbors[layer] = selected.iter().map(|&(_, id)| id).collect();

            layer_eps.clear();
            layer_eps.extend(candidates.iter().map(|&(_, id)| id));
            if layer_eps.is_empty() {
                layer_eps.push(entry_point);
            }
        }

        self.push_vector(raw_vector);
        self.neighbors.push(node_neighbors);
        self.layers.push(level as u8);
        self.deleted.push(false);
        self.node_count += 1;
        self.live_count += 1;

        // Phase 3: back-links, pruning neighbors that went over capacity
        let metric = self.config.metric;
        for layer in 0..=top {
            let m_max = self.m_for(layer);
            let my_neighbors = self.neighbors[internal_id as usize][layer].clone();
            for neighbor_id in my_neighbors {
                let nid = neighbor_id as usize;
                while self.neighbors[nid].len() <= layer {
                    self.neighbors[nid].push(Vec::new());
                }
                self.neighbors[nid][layer].push(internal_id);

                if self.neighbors[nid][layer].len() > m_max {
                    let base = self.get_raw_vector(neighbor_id);
                    let candidates: Vec<(f32, u32)> = self.neighbors[nid][layer]
                        .iter()
                        .map(|&cid| (metric.distance_exact(base, self.get_raw_vector(cid)), cid))
                        .collect();
                    let pruned = select_neighbors_heuristic(self, &candidates, m_max);
                    self.neighbors[nid][layer] = pruned.iter().map(|&(_, id)| id).collect();
                }
            }
        }

        if level > self.max_layer {
            self.max_layer = level;
            self.entry_point = Some(internal_id);
        }
    }

    fn m_for(&self, layer: usize) -> usize {
        if layer == 0 {
            self.config.m_max0
        } else {
            self.config.m
        }
    }
}

/// Heuristic neighbor selection (Algorithm 4 from the HNSW paper).
///
/// A candidate is kept only if it is closer to the base node than to every
/// neighbor already selected. Remaining slots are back-filled with the closest
/// unused candidates.
fn select_neighbors_heuristic(
    index: &HnswIndex,
    candidates: &[(f32, u32)],
    m: usize,
) -> Vec<(f32, u32)> {
    let mut sorted = candidates.to_vec();
    sorted.sort_unstable_by(|a, b| a.0.total_cmp(&b.0).then(a.1.cmp(&b.1)));

    let metric = index.config.metric;
    let mut selected: Vec<(f32, u32)> = Vec::with_capacity(m);

    for &(dist_to_base, cid) in &sorted {
        if selected.len() >= m {
            break;
        }
        let cvec = index.get_raw_vector(cid);
        let is_diverse = selected.iter().all(|&(_, sid)| {
            dist_to_base <= metric.distance_exact(cvec, index.get_raw_vector(sid))
        });
        if is_diverse {
            selected.push((dist_to_base, cid));
        }
    }

    if selected.len() < m {
        for &(dist, cid) in &sorted {
            if selected.len() >= m {
                break;
            }
            if !selected.iter().any(|&(_, sid)| sid == cid) {
                selected.push((dist, cid));
            }
        }
    }

    selected
}
