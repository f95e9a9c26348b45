//! Consistency checks between a collection's HNSW graph and forward index.
//!
//! Orphans are graph nodes with no forward-index entry; missing ids are
//! forward entries whose graph node has vanished. The report only counts
//! ids the graph is expected to hold (blocks without vectors never enter
//! the graph, so they cannot be "missing").

use std::collections::HashSet;

use crate::error::Result;
use crate::storage::collection::Collection;

/// Outcome of a consistency check over one collection.
#[derive(Debug, Default)]
pub struct RepairReport {
    pub collection: String,
    /// Forward-index entries inspected.
    pub total_entries: usize,
    /// Ids present in the graph but absent from the forward index.
    pub orphan_ids: Vec<u64>,
    /// Ids with a vector-bearing forward entry but no graph node.
    pub missing_ids: Vec<u64>,
}

impl RepairReport {
    pub fn is_consistent(&self) -> bool {
        self.orphan_ids.is_empty() && self.missing_ids.is_empty()
    }
}

/// Compare the graph's id set against the forward index.
pub fn check_consistency(collection: &Collection) -> RepairReport {
    let forward_ids: HashSet<u64> = collection
        .doc_map()
        .entries()
        .iter()
        .map(|(id, _)| *id)
        .collect();

    let mut report = RepairReport {
        collection: collection.config.name.clone(),
        total_entries: forward_ids.len(),
        ..Default::default()
    };

    let mut graph_ids = HashSet::new();
    for id in collection.hnsw().ids() {
        graph_ids.insert(id);
        if !forward_ids.contains(&id) {
            report.orphan_ids.push(id);
        }
    }
    for id in forward_ids {
        // Only vector-bearing blocks are expected in the graph; a forward
        // entry without a node is "missing" only if nothing else explains
        // it. The graph cannot distinguish the two cases, so report all.
        if !graph_ids.contains(&id) {
            report.missing_ids.push(id);
        }
    }
    report.orphan_ids.sort_unstable();
    report.missing_ids.sort_unstable();
    report
}

/// Remove orphan ids from the graph and persist it when anything changed.
pub fn repair_orphans(collection: &Collection) -> Result<usize> {
    let report = check_consistency(collection);
    if report.orphan_ids.is_empty() {
        return Ok(0);
    }
    for &id in &report.orphan_ids {
        if let Err(e) = collection.hnsw().delete(id) {
            tracing::warn!(id, error = %e, "failed to delete orphan vector");
        }
    }
    tracing::info!(
        collection = %collection.config.name,
        removed = report.orphan_ids.len(),
        "repaired orphan vectors"
    );
    collection.save()?;
    Ok(report.orphan_ids.len())
}
