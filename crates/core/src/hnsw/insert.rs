//! HNSW insertion: level assignment, greedy descent, per-level linking,
//! and reverse-edge pruning.

use crate::error::{Result, StoreError};
use crate::hnsw::graph::{GraphState, HnswGraph, HnswNode};
use crate::hnsw::search::search_layer;

impl HnswGraph {
    /// Insert a vector under a fresh id.
    ///
    /// The first node becomes the entry point. Later nodes greedily descend
    /// from the entry point to their assigned level, link to the nearest
    /// `M` candidates per level (candidate width `ef_construction`), and
    /// add reverse edges; any neighbor pushed past `2M` connections is
    /// pruned back to its `M` nearest.
    pub fn add(&self, id: u64, vector: &[f32]) -> Result<()> {
        self.check_dimensions(vector)?;

        let mut state = self.state.write();
        if state.nodes.contains_key(&id) {
            return Err(StoreError::AlreadyExists(format!(
                "vector id {id} already exists"
            )));
        }

        let level = self.random_level();
        let mut node = HnswNode {
            id,
            vector: vector.to_vec(),
            level,
            neighbors: vec![Vec::with_capacity(self.m); level + 1],
        };

        let Some(entry_point) = state.entry_point else {
            state.nodes.insert(id, node);
            state.entry_point = Some(id);
            state.max_level = level;
            state.dirty = true;
            return Ok(());
        };

        // Descend one neighbor at a time until the node's level.
        let mut ep = entry_point;
        let max_level = state.max_level;
        for l in ((level + 1)..=max_level).rev() {
            if let Some(&(_, nearest)) =
                search_layer(&state, self.metric(), vector, ep, 1, l).first()
            {
                ep = nearest;
            }
        }

        // Link at each level from min(level, max_level) down to 0.
        let mut reverse_edges: Vec<(u64, usize)> = Vec::new();
        for l in (0..=level.min(max_level)).rev() {
            let candidates =
                search_layer(&state, self.metric(), vector, ep, self.ef_construction, l);
            let selected = select_neighbors(&candidates, self.m);

            node.neighbors[l] = selected.iter().map(|&(_, nid)| nid).collect();
            reverse_edges.extend(selected.iter().map(|&(_, nid)| (nid, l)));

            if let Some(&(_, nearest)) = candidates.first() {
                ep = nearest;
            }
        }

        state.nodes.insert(id, node);
        state.dirty = true;

        for (neighbor_id, l) in reverse_edges {
            add_connection(&mut state, self.metric(), self.m, neighbor_id, id, l);
        }

        if level > state.max_level {
            state.max_level = level;
            state.entry_point = Some(id);
        }
        Ok(())
    }
}

/// Keep at most `m` candidates in distance-ascending order.
///
/// `search_layer` already returns ascending distances, so this is a
/// truncation; the contract only requires at-most-`m` ascending candidates.
fn select_neighbors(candidates: &[(f32, u64)], m: usize) -> Vec<(f32, u64)> {
    candidates.iter().copied().take(m).collect()
}

/// Add `target` to `source`'s neighbor list at `level`, pruning back to the
/// `m` nearest when the list grows past `2m`.
fn add_connection(
    state: &mut GraphState,
    metric: crate::hnsw::DistanceMetric,
    m: usize,
    source_id: u64,
    target_id: u64,
    level: usize,
) {
    let Some(source) = state.nodes.get(&source_id) else {
        return;
    };
    let Some(list) = source.neighbors.get(level) else {
        return;
    };
    if list.contains(&target_id) {
        return;
    }

    let needs_prune = list.len() + 1 > m * 2;
    if !needs_prune {
        state
            .nodes
            .get_mut(&source_id)
            .expect("source present")
            .neighbors[level]
            .push(target_id);
        return;
    }

    // Over capacity: rank all connections (including the new one) by
    // distance to the source and keep the m nearest.
    let source_vector = source.vector.clone();
    let mut ranked: Vec<(f32, u64)> = list
        .iter()
        .copied()
        .chain(std::iter::once(target_id))
        .filter_map(|nid| {
            state
                .nodes
                .get(&nid)
                .map(|n| (metric.distance(&source_vector, &n.vector), nid))
        })
        .collect();
    ranked.sort_unstable_by(|a, b| a.0.partial_cmp(&b.0).unwrap_or(std::cmp::Ordering::Equal));
    ranked.truncate(m);

    state
        .nodes
        .get_mut(&source_id)
        .expect("source present")
        .neighbors[level] = ranked.into_iter().map(|(_, nid)| nid).collect();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::HNSW_M;
    use crate::hnsw::DistanceMetric;

    #[test]
    fn test_first_node_becomes_entry_point() {
        let g = HnswGraph::new(2, DistanceMetric::L2);
        g.add(42, &[1.0, 2.0]).unwrap();
        let state = g.state.read();
        assert_eq!(state.entry_point, Some(42));
        assert!(state.dirty);
    }

    #[test]
    fn test_duplicate_id_rejected() {
        let g = HnswGraph::new(2, DistanceMetric::L2);
        g.add(7, &[1.0, 0.0]).unwrap();
        assert!(matches!(
            g.add(7, &[0.0, 1.0]),
            Err(StoreError::AlreadyExists(_))
        ));
    }

    #[test]
    fn test_dimension_mismatch_rejected() {
        let g = HnswGraph::new(3, DistanceMetric::L2);
        assert!(matches!(
            g.add(1, &[1.0, 0.0]),
            Err(StoreError::DimensionMismatch {
                expected: 3,
                got: 2
            })
        ));
    }

    #[test]
    fn test_edges_are_bidirectional() {
        let g = HnswGraph::new(2, DistanceMetric::L2);
        for i in 0..10u64 {
            g.add(i, &[i as f32, 0.0]).unwrap();
        }
        let state = g.state.read();
        for node in state.nodes.values() {
            for &nid in &node.neighbors[0] {
                let back = &state.nodes[&nid].neighbors[0];
                assert!(
                    back.contains(&node.id),
                    "edge {} -> {nid} missing reverse",
                    node.id
                );
            }
        }
    }

    #[test]
    fn test_connections_bounded() {
        let g = HnswGraph::new(2, DistanceMetric::L2);
        for i in 0..300u64 {
            let angle = i as f32 * 0.021;
            g.add(i, &[angle.cos(), angle.sin()]).unwrap();
        }
        let state = g.state.read();
        for node in state.nodes.values() {
            for level in &node.neighbors {
                assert!(
                    level.len() <= HNSW_M * 2,
                    "node {} has {} connections",
                    node.id,
                    level.len()
                );
            }
        }
    }

    #[test]
    fn test_select_neighbors_truncates_ascending() {
        let candidates = vec![(0.1, 1), (0.2, 2), (0.3, 3)];
        let selected = select_neighbors(&candidates, 2);
        assert_eq!(selected, vec![(0.1, 1), (0.2, 2)]);
    }

    #[test]
    fn test_recall_on_clustered_data() {
        // Two well-separated clusters; every query must resolve to its own
        // cluster's points.
        let g = HnswGraph::new(2, DistanceMetric::L2);
        for i in 0..50u64 {
            g.add(i, &[i as f32 * 0.01, 0.0]).unwrap();
            g.add(1000 + i, &[100.0 + i as f32 * 0.01, 0.0]).unwrap();
        }
        let hits = g.search(&[100.2, 0.0], 5, None).unwrap();
        for (id, _) in hits {
            assert!(id >= 1000, "wrong cluster: {id}");
        }
    }
}
