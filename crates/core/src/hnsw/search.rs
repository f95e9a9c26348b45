//! HNSW search: single-layer best-first search and multi-layer KNN.
//!
//! Layer search keeps two heaps: a min-heap of candidates to expand and a
//! bounded max-heap of the best results found so far. Filtering happens at
//! result emission, after the full candidate list is collected, so the
//! traversal itself still navigates through non-matching nodes.

use std::collections::{BinaryHeap, HashSet};

use ordered_float::OrderedFloat;

use crate::config::HNSW_FILTER_WIDEN;
use crate::error::Result;
use crate::filter::IdFilter;
use crate::hnsw::distance::DistanceMetric;
use crate::hnsw::graph::{GraphState, HnswGraph};

/// A candidate to expand: min-heap by distance via negation.
#[derive(Debug, PartialEq, Eq)]
struct Candidate {
    neg_distance: OrderedFloat<f32>,
    id: u64,
}

impl Ord for Candidate {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.neg_distance.cmp(&other.neg_distance)
    }
}

impl PartialOrd for Candidate {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

/// A collected result: max-heap by distance so the worst is pruned first.
#[derive(Debug, PartialEq, Eq)]
struct ResultEntry {
    distance: OrderedFloat<f32>,
    id: u64,
}

impl Ord for ResultEntry {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.distance.cmp(&other.distance)
    }
}

impl PartialOrd for ResultEntry {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

/// Best-first search of one layer from an entry point.
/// Returns up to `ef` nodes in distance-ascending order.
pub(crate) fn search_layer(
    state: &GraphState,
    metric: DistanceMetric,
    query: &[f32],
    entry_id: u64,
    ef: usize,
    level: usize,
) -> Vec<(f32, u64)> {
    let Some(entry_node) = state.nodes.get(&entry_id) else {
        return Vec::new();
    };
    let entry_dist = metric.distance(query, &entry_node.vector);

    let mut visited: HashSet<u64> = HashSet::new();
    visited.insert(entry_id);

    let mut candidates = BinaryHeap::new();
    candidates.push(Candidate {
        neg_distance: OrderedFloat(-entry_dist),
        id: entry_id,
    });

    let mut results: BinaryHeap<ResultEntry> = BinaryHeap::new();
    results.push(ResultEntry {
        distance: OrderedFloat(entry_dist),
        id: entry_id,
    });

    while let Some(candidate) = candidates.pop() {
        let c_dist = -candidate.neg_distance.0;
        let worst = results.peek().map_or(f32::MAX, |r| r.distance.0);
        if results.len() >= ef && c_dist > worst {
            break;
        }

        let Some(node) = state.nodes.get(&candidate.id) else {
            continue;
        };
        let Some(neighbor_list) = node.neighbors.get(level) else {
            continue;
        };

        for &neighbor_id in neighbor_list {
            if !visited.insert(neighbor_id) {
                continue;
            }
            let Some(neighbor) = state.nodes.get(&neighbor_id) else {
                continue;
            };
            let dist = metric.distance(query, &neighbor.vector);
            let worst = results.peek().map_or(f32::MAX, |r| r.distance.0);
            if results.len() < ef || dist < worst {
                candidates.push(Candidate {
                    neg_distance: OrderedFloat(-dist),
                    id: neighbor_id,
                });
                results.push(ResultEntry {
                    distance: OrderedFloat(dist),
                    id: neighbor_id,
                });
                if results.len() > ef {
                    results.pop();
                }
            }
        }
    }

    results
        .into_sorted_vec()
        .into_iter()
        .map(|r| (r.distance.0, r.id))
        .collect()
}

impl HnswGraph {
    /// K-nearest-neighbor search, optionally restricted to ids in `filter`.
    ///
    /// With a filter present, the layer-0 candidate width grows to
    /// `min(k * 10, node_count)` so post-filtering still yields `k` hits;
    /// non-matching nodes are explored but never emitted.
    pub fn search(
        &self,
        query: &[f32],
        k: usize,
        filter: Option<&IdFilter>,
    ) -> Result<Vec<(u64, f32)>> {
        self.check_dimensions(query)?;

        let state = self.state.read();
        let Some(entry_point) = state.entry_point else {
            return Ok(Vec::new());
        };

        let filter = filter.filter(|f| !f.is_empty());
        let effective_k = if filter.is_some() {
            (k.saturating_mul(HNSW_FILTER_WIDEN)).min(state.nodes.len())
        } else {
            k
        };

        // Greedy descent to layer 1 with width 1.
        let mut ep = entry_point;
        for level in (1..=state.max_level).rev() {
            if let Some(&(_, nearest)) =
                search_layer(&state, self.metric(), query, ep, 1, level).first()
            {
                ep = nearest;
            }
        }

        let candidates = search_layer(
            &state,
            self.metric(),
            query,
            ep,
            effective_k.max(self.ef_search),
            0,
        );

        let mut results = Vec::with_capacity(k);
        for (distance, id) in candidates {
            if filter.is_some_and(|f| !f.contains(id)) {
                continue;
            }
            results.push((id, distance));
            if results.len() >= k {
                break;
            }
        }
        Ok(results)
    }
}
