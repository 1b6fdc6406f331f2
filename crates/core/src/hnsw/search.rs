//! HNSW search algorithms: single-layer search and multi-layer KNN.
//!
//! Supports optional pre-filtering via a predicate `Fn(u32) -> bool` applied during
//! graph traversal. Filtered nodes are still used for navigation but excluded from results.
//! When the walk cannot produce enough matches, [`knn_search_filtered`] falls back
//! to an exact scan so that callers always get `min(k, matches)` results.

use crate::hnsw::graph::HnswIndex;
use crate::hnsw::visited::VisitedSet;
use ordered_float::OrderedFloat;
use std::cell::RefCell;
use std::cmp::Reverse;
use std::collections::BinaryHeap;

thread_local! {
    /// Reused across searches on the same thread to avoid per-query allocation.
    static SEARCH_VISITED: RefCell<VisitedSet> = RefCell::new(VisitedSet::new(0));
}

/// Traversal distance: asymmetric against the u8 codes when quantized, exact otherwise.
#[inline]
fn traversal_distance(index: &HnswIndex, query: &[f32], node_id: u32, query_norm_sq: f32) -> f32 {
    if index.config.quantized {
        index
            .config
            .metric
            .distance_asym_prenorm(query, index.get_vector_ref(node_id), query_norm_sq)
    } else {
        index
            .config
            .metric
            .distance_exact(query, index.get_raw_vector(node_id))
    }
}

/// Search a single layer of the HNSW graph.
///
/// Returns up to `ef` closest nodes accepted by `filter_fn`, sorted by ascending
/// distance. Deleted nodes are only returned when `include_deleted` is set.
#[allow(clippy::too_many_arguments)]
pub fn search_layer<F: Fn(u32) -> bool>(
    index: &HnswIndex,
    query: &[f32],
    entry_points: &[u32],
    ef: usize,
    layer: usize,
    visited: &mut VisitedSet,
    query_norm_sq: f32,
    filter_fn: &F,
    include_deleted: bool,
) -> Vec<(f32, u32)> {
    visited.clear();
    // candidates: min-heap by distance; results: max-heap by distance
    let mut candidates: BinaryHeap<Reverse<(OrderedFloat<f32>, u32)>> =
        BinaryHeap::with_capacity(ef * 2);
    let mut results: BinaryHeap<(OrderedFloat<f32>, u32)> = BinaryHeap::with_capacity(ef + 1);
    let mut worst_dist = f32::MAX;

    let accept = |id: u32| (include_deleted || !index.is_deleted(id)) && filter_fn(id);

    for &ep in entry_points {
        if visited.insert(ep) {
            let dist = traversal_distance(index, query, ep, query_norm_sq);
            candidates.push(Reverse((OrderedFloat(dist), ep)));
            if accept(ep) {
                results.push((OrderedFloat(dist), ep));
                if results.len() > ef {
                    results.pop();
                }
                if results.len() >= ef {
                    worst_dist = results.peek().map_or(f32::MAX, |r| r.0 .0);
                }
            }
        }
    }

    while let Some(Reverse((OrderedFloat(c_dist), c_id))) = candidates.pop() {
        if results.len() >= ef && c_dist > worst_dist {
            break;
        }

        let node_layers = &index.neighbors[c_id as usize];
        if layer >= node_layers.len() {
            continue;
        }

        for &neighbor_id in &node_layers[layer] {
            if !visited.insert(neighbor_id) {
                continue;
            }
            let dist = traversal_distance(index, query, neighbor_id, query_norm_sq);
            if results.len() < ef || dist < worst_dist {
                candidates.push(Reverse((OrderedFloat(dist), neighbor_id)));
                if accept(neighbor_id) {
                    results.push((OrderedFloat(dist), neighbor_id));
                    if results.len() > ef {
                        results.pop();
                    }
                    if results.len() >= ef {
                        worst_dist = results.peek().map_or(f32::MAX, |r| r.0 .0);
                    }
                }
            }
        }
    }

    results
        .into_sorted_vec()
        .into_iter()
        .map(|(d, id)| (d.0, id))
        .collect()
}

/// Multi-layer KNN search through the HNSW graph.
pub fn knn_search(index: &HnswIndex, query: &[f32], k: usize) -> Vec<(f32, u32)> {
    knn_search_filtered(index, query, k, &|_: u32| true)
}

/// Multi-layer KNN search with a filter predicate applied during layer-0 traversal.
///
/// Uses adaptive ef oversampling (doubling up to 4x). If the graph still yields
/// fewer than `k` results while more live nodes match the filter, an exact scan
/// over the matching nodes replaces the graph result. Returned distances are
/// always exact, ordered by ascending distance then internal id.
pub fn knn_search_filtered<F: Fn(u32) -> bool>(
    index: &HnswIndex,
    query: &[f32],
    k: usize,
    filter_fn: &F,
) -> Vec<(f32, u32)> {
    let entry_point = match index.entry_point {
        Some(ep) if k > 0 && !index.is_empty() => ep,
        _ => return Vec::new(),
    };

    let mut results = SEARCH_VISITED.with(|cell| {
        let mut visited = cell.borrow_mut();
        visited.ensure_capacity(index.node_count as usize);

        let query_norm_sq: f32 = query.iter().map(|&x| x * x).sum();
        let no_filter = |_: u32| true;

        let mut current_ep = entry_point;
        for layer in (1..=index.max_layer).rev() {
            let nearest = search_layer(
                index,
                query,
                std::slice::from_ref(&current_ep),
                1,
                layer,
                &mut visited,
                query_norm_sq,
                &no_filter,
                true,
            );
            if let Some(&(_, id)) = nearest.first() {
                current_ep = id;
            }
        }

        let base_ef = index.config.ef_search.max(k);
        let max_ef = (base_ef * 4).min(index.node_count as usize).max(base_ef);
        let mut ef = base_ef;
        loop {
            let found = search_layer(
                index,
                query,
                std::slice::from_ref(&current_ep),
                ef,
                0,
                &mut visited,
                query_norm_sq,
                filter_fn,
                false,
            );
            if found.len() >= k || ef >= max_ef {
                break found;
            }
            ef = (ef * 2).min(max_ef);
        }
    });

    if results.len() < k {
        let matching = (0..index.node_count)
            .filter(|&id| !index.is_deleted(id) && filter_fn(id))
            .count();
        if matching > results.len() {
            tracing::debug!(
                found = results.len(),
                matching,
                k,
                "HNSW walk under-filled, falling back to exact scan"
            );
            return exact_scan(index, query, k, filter_fn);
        }
    }

    let metric = index.config.metric;
    for r in results.iter_mut() {
        r.0 = metric.distance_exact(query, index.get_raw_vector(r.1));
    }
    results.sort_unstable_by(|a, b| a.0.total_cmp(&b.0).then(a.1.cmp(&b.1)));
    results.truncate(k);
    results
}

/// Exact top-k over every live node accepted by `filter_fn`.
pub fn exact_scan<F: Fn(u32) -> bool>(
    index: &HnswIndex,
    query: &[f32],
    k: usize,
    filter_fn: &F,
) -> Vec<(f32, u32)> {
    let metric = index.config.metric;
    let mut heap: BinaryHeap<(OrderedFloat<f32>, u32)> = BinaryHeap::with_capacity(k + 1);
    for id in 0..index.node_count {
        if index.is_deleted(id) || !filter_fn(id) {
            continue;
        }
        let d = metric.distance_exact(query, index.get_raw_vector(id));
        heap.push((OrderedFloat(d), id));
        if heap.len() > k {
            heap.pop();
        }
    }
    heap.into_sorted_vec()
        .into_iter()
        .map(|(d, id)| (d.0, id))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hnsw::graph::HnswConfig;
    use crate::hnsw::DistanceMetric;

    fn make_vec(dim: usize, seed: usize) -> Vec<f32> {
        (0..dim)
            .map(|j| (((seed + 1) * 2654435761 + j * 40503) & 0xFFFF) as f32 / 65535.0)
            .collect()
    }

    fn build(n: u32, dim: usize, metric: DistanceMetric, quantized: bool) -> HnswIndex {
        let mut idx = HnswIndex::new(dim, HnswConfig::new(metric, 8, 64, quantized));
        for i in 0..n {
            idx.insert(i, &make_vec(dim, i as usize));
        }
        idx
    }

    // ── Basic KNN ──────────────────────────────────────────────────────

    #[test]
    fn test_empty_index_returns_nothing() {
        let idx = HnswIndex::new(4, HnswConfig::default());
        assert!(knn_search(&idx, &[0.0; 4], 5).is_empty());
    }

    #[test]
    fn test_exact_match_ranks_first() {
        let idx = build(200, 16, DistanceMetric::L2, false);
        let q = make_vec(16, 42);
        let res = knn_search(&idx, &q, 5);
        assert_eq!(res.len(), 5);
        assert_eq!(res[0].1, 42);
        assert!(res[0].0.abs() < 1e-6);
        assert!(res.windows(2).all(|w| w[0].0 <= w[1].0));
    }

    #[test]
    fn test_quantized_distances_are_exact() {
        let idx = build(150, 12, DistanceMetric::Cosine, true);
        let q = make_vec(12, 7);
        let res = knn_search(&idx, &q, 3);
        for (d, id) in res {
            let exact = DistanceMetric::Cosine.distance_exact(&q, idx.get_raw_vector(id));
            assert_eq!(d, exact);
        }
    }

    #[test]
    fn test_recall_against_exact_scan() {
        let idx = build(500, 16, DistanceMetric::L2, false);
        let mut hits = 0;
        for qi in 0..20 {
            let q = make_vec(16, 10_000 + qi);
            let approx: Vec<u32> = knn_search(&idx, &q, 10).into_iter().map(|r| r.1).collect();
            let exact: Vec<u32> = exact_scan(&idx, &q, 10, &|_| true)
                .into_iter()
                .map(|r| r.1)
                .collect();
            hits += approx.iter().filter(|id| exact.contains(id)).count();
        }
        assert!(hits >= 180, "recall@10 too low: {hits}/200");
    }

    // ── Deletes and filters ────────────────────────────────────────────

    #[test]
    fn test_deleted_nodes_never_returned() {
        let mut idx = build(100, 8, DistanceMetric::L2, false);
        let q = make_vec(8, 3);
        idx.mark_deleted(3);
        let res = knn_search(&idx, &q, 10);
        assert!(res.iter().all(|&(_, id)| id != 3));
        assert_eq!(res.len(), 10);
    }

    #[test]
    fn test_filter_returns_min_k_matches() {
        let idx = build(300, 8, DistanceMetric::L2, false);
        let q = make_vec(8, 0);
        // Only 3 nodes match: results must contain exactly those 3
        let allowed = [17u32, 150, 299];
        let res = knn_search_filtered(&idx, &q, 10, &|id| allowed.contains(&id));
        let mut ids: Vec<u32> = res.iter().map(|r| r.1).collect();
        ids.sort_unstable();
        assert_eq!(ids, allowed.to_vec());
    }

    #[test]
    fn test_all_deleted_then_insert_is_found() {
        let mut idx = build(20, 4, DistanceMetric::L2, false);
        for id in 0..20 {
            idx.mark_deleted(id);
        }
        idx.insert(20, &[0.5, 0.5, 0.5, 0.5]);
        let res = knn_search(&idx, &[0.5, 0.5, 0.5, 0.5], 3);
        assert_eq!(res.len(), 1);
        assert_eq!(res[0].1, 20);
    }
}
