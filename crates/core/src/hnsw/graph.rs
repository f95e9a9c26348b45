//! HNSW graph structure and state management.
//!
//! Nodes are keyed by sparse `u64` vector ids in a node map; each node
//! carries its vector and per-level neighbor lists. A single reader-writer
//! lock guards the node map, entry point, and level state.

use std::collections::HashMap;

use parking_lot::RwLock;

use crate::config::{HNSW_EF_CONSTRUCTION, HNSW_EF_SEARCH, HNSW_M, HNSW_MAX_LEVEL};
use crate::error::{Result, StoreError};
use crate::hnsw::distance::DistanceMetric;

/// One node in the graph.
#[derive(Debug, Clone)]
pub struct HnswNode {
    pub id: u64,
    pub vector: Vec<f32>,
    pub level: usize,
    /// `neighbors[level]` = neighbor ids at that level.
    pub neighbors: Vec<Vec<u64>>,
}

/// Mutable graph state guarded by the graph's lock.
#[derive(Debug, Default)]
pub(crate) struct GraphState {
    pub nodes: HashMap<u64, HnswNode>,
    pub entry_point: Option<u64>,
    pub max_level: usize,
    /// Set on add/delete, cleared on save.
    pub dirty: bool,
}

/// An HNSW approximate-nearest-neighbor index over `u64` vector ids.
pub struct HnswGraph {
    dimensions: u32,
    metric: DistanceMetric,
    pub(crate) m: usize,
    /// Level normalization factor, `1 / ln(M)`.
    pub(crate) ml: f64,
    pub(crate) ef_construction: usize,
    pub(crate) ef_search: usize,
    pub(crate) state: RwLock<GraphState>,
}

impl HnswGraph {
    /// Create an empty graph with the standard construction parameters.
    pub fn new(dimensions: u32, metric: DistanceMetric) -> Self {
        Self {
            dimensions,
            metric,
            m: HNSW_M,
            ml: 1.0 / (HNSW_M as f64).ln(),
            ef_construction: HNSW_EF_CONSTRUCTION,
            ef_search: HNSW_EF_SEARCH,
            state: RwLock::new(GraphState::default()),
        }
    }

    pub fn dimensions(&self) -> u32 {
        self.dimensions
    }

    pub fn metric(&self) -> DistanceMetric {
        self.metric
    }

    /// Number of nodes currently in the graph.
    pub fn count(&self) -> u64 {
        self.state.read().nodes.len() as u64
    }

    pub fn contains(&self, id: u64) -> bool {
        self.state.read().nodes.contains_key(&id)
    }

    /// Copy of the stored vector for an id.
    pub fn get_vector(&self, id: u64) -> Option<Vec<f32>> {
        self.state.read().nodes.get(&id).map(|n| n.vector.clone())
    }

    /// All node ids, unordered.
    pub fn ids(&self) -> Vec<u64> {
        self.state.read().nodes.keys().copied().collect()
    }

    /// True when the graph has unsaved changes.
    pub fn is_dirty(&self) -> bool {
        self.state.read().dirty
    }

    pub(crate) fn check_dimensions(&self, vector: &[f32]) -> Result<()> {
        if vector.len() != self.dimensions as usize {
            return Err(StoreError::DimensionMismatch {
                expected: self.dimensions,
                got: vector.len(),
            });
        }
        Ok(())
    }

    /// Draw a level by repeated biased coin flips, capped at the level limit.
    pub(crate) fn random_level(&self) -> usize {
        let mut level = 0;
        while rand::random::<f64>() < self.ml && level < HNSW_MAX_LEVEL {
            level += 1;
        }
        level
    }

    /// Remove a node: drop its reverse edges at every level, then the node
    /// itself, promoting a replacement entry point when necessary.
    pub fn delete(&self, id: u64) -> Result<()> {
        let mut state = self.state.write();
        let node = state
            .nodes
            .remove(&id)
            .ok_or_else(|| StoreError::NotFound(format!("vector id {id} not found")))?;

        for (level, neighbors) in node.neighbors.iter().enumerate() {
            for &neighbor_id in neighbors {
                if let Some(neighbor) = state.nodes.get_mut(&neighbor_id) {
                    if let Some(list) = neighbor.neighbors.get_mut(level) {
                        list.retain(|&n| n != id);
                    }
                }
            }
        }
        state.dirty = true;

        if state.entry_point == Some(id) {
            // Rescan for the highest-level survivor.
            state.entry_point = None;
            state.max_level = 0;
            let mut best: Option<(u64, usize)> = None;
            for (nid, node) in &state.nodes {
                match best {
                    Some((_, level)) if node.level <= level => {}
                    _ => best = Some((*nid, node.level)),
                }
            }
            if let Some((nid, level)) = best {
                state.entry_point = Some(nid);
                state.max_level = level;
            }
        }
        Ok(())
    }
}
