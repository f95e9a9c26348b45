//! Binary persistence for the HNSW graph (`vectors.hnsw`).
//!
//! Layout, all integers little-endian after the magic:
//!
//! ```text
//! header (64 bytes):
//!   0..8   magic "HNSWV001"
//!   8..12  dimensions u32
//!   12     metric byte (0 = l2, 1 = cosine, 2 = ip)
//!   16..20 node count u32
//!   20..28 entry point id u64
//!   28..32 max level u32
//!   32..36 M u32
//!   36     has-entry flag
//! node table (24 bytes per node, ids ascending):
//!   id u64 | level u32 | vector_offset u32 | neighbor_offset u32 | neighbor_count u32
//! vector section: node_count * dimensions * 4 bytes of f32
//! neighbor section per node:
//!   level_count u16, then per level: count u16 + count * id u64
//! ```
//!
//! Node ids are written in ascending order for deterministic output.

use std::collections::HashMap;
use std::fs;
use std::path::Path;

use crate::error::{Result, StoreError};
use crate::hnsw::distance::DistanceMetric;
use crate::hnsw::graph::{HnswGraph, HnswNode};

const MAGIC: &[u8; 8] = b"HNSWV001";
const HEADER_SIZE: usize = 64;
const NODE_ENTRY_SIZE: usize = 24;

impl HnswGraph {
    /// Persist the graph, atomically replacing any previous file.
    pub fn save(&self, path: &Path) -> Result<()> {
        let mut state = self.state.write();

        let mut ids: Vec<u64> = state.nodes.keys().copied().collect();
        ids.sort_unstable();

        let dims = self.dimensions();
        let vector_size = dims as usize * 4;
        let neighbor_section_offset =
            HEADER_SIZE + ids.len() * NODE_ENTRY_SIZE + ids.len() * vector_size;

        let mut buf = Vec::with_capacity(neighbor_section_offset);

        let mut header = [0u8; HEADER_SIZE];
        header[0..8].copy_from_slice(MAGIC);
        header[8..12].copy_from_slice(&dims.to_le_bytes());
        header[12] = self.metric().to_byte();
        header[16..20].copy_from_slice(&(ids.len() as u32).to_le_bytes());
        header[20..28].copy_from_slice(&state.entry_point.unwrap_or(0).to_le_bytes());
        header[28..32].copy_from_slice(&(state.max_level as u32).to_le_bytes());
        header[32..36].copy_from_slice(&(self.m as u32).to_le_bytes());
        header[36] = state.entry_point.is_some() as u8;
        buf.extend_from_slice(&header);

        // Node table with section-relative vector offsets and absolute
        // neighbor offsets.
        let mut neighbor_offset = 0u32;
        for (i, id) in ids.iter().enumerate() {
            let node = &state.nodes[id];
            let total_neighbors: u32 = node.neighbors.iter().map(|l| l.len() as u32).sum();
            let neighbor_size: u32 = 2 + node
                .neighbors
                .iter()
                .map(|l| 2 + l.len() as u32 * 8)
                .sum::<u32>();

            buf.extend_from_slice(&id.to_le_bytes());
            buf.extend_from_slice(&(node.level as u32).to_le_bytes());
            buf.extend_from_slice(&((i * vector_size) as u32).to_le_bytes());
            buf.extend_from_slice(
                &(neighbor_section_offset as u32 + neighbor_offset).to_le_bytes(),
            );
            buf.extend_from_slice(&total_neighbors.to_le_bytes());
            neighbor_offset += neighbor_size;
        }

        for id in &ids {
            for v in &state.nodes[id].vector {
                buf.extend_from_slice(&v.to_le_bytes());
            }
        }

        for id in &ids {
            let node = &state.nodes[id];
            buf.extend_from_slice(&(node.neighbors.len() as u16).to_le_bytes());
            for level in &node.neighbors {
                buf.extend_from_slice(&(level.len() as u16).to_le_bytes());
                for nid in level {
                    buf.extend_from_slice(&nid.to_le_bytes());
                }
            }
        }

        let tmp = path.with_extension("hnsw.tmp");
        fs::write(&tmp, &buf)?;
        fs::rename(&tmp, path)?;
        state.dirty = false;
        Ok(())
    }

    /// Load a previously saved graph; a missing file leaves the graph empty.
    ///
    /// The file's dimensions and metric must match this graph's
    /// configuration; any disagreement or malformed section is a format
    /// error and the load fails without touching current state.
    pub fn load(&self, path: &Path) -> Result<()> {
        let data = match fs::read(path) {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(e.into()),
        };

        if data.len() < HEADER_SIZE || &data[0..8] != MAGIC {
            return Err(StoreError::Format("bad HNSW magic".into()));
        }
        let dims = u32::from_le_bytes(data[8..12].try_into().expect("sized"));
        let metric = DistanceMetric::from_byte(data[12])?;
        let node_count = u32::from_le_bytes(data[16..20].try_into().expect("sized")) as usize;
        let entry_point = u64::from_le_bytes(data[20..28].try_into().expect("sized"));
        let max_level = u32::from_le_bytes(data[28..32].try_into().expect("sized")) as usize;
        let has_entry = data[36] == 1;

        if dims != self.dimensions() {
            return Err(StoreError::Format(format!(
                "dimension mismatch: file has {dims}, collection declares {}",
                self.dimensions()
            )));
        }
        if metric != self.metric() {
            return Err(StoreError::Format(format!(
                "metric mismatch: file has {metric}, collection declares {}",
                self.metric()
            )));
        }

        let table_end = HEADER_SIZE + node_count * NODE_ENTRY_SIZE;
        let vectors_end = table_end + node_count * dims as usize * 4;
        if data.len() < vectors_end {
            return Err(StoreError::Format("HNSW file truncated".into()));
        }

        struct TableEntry {
            id: u64,
            level: usize,
        }
        let mut entries = Vec::with_capacity(node_count);
        for i in 0..node_count {
            let at = HEADER_SIZE + i * NODE_ENTRY_SIZE;
            entries.push(TableEntry {
                id: u64::from_le_bytes(data[at..at + 8].try_into().expect("sized")),
                level: u32::from_le_bytes(data[at + 8..at + 12].try_into().expect("sized"))
                    as usize,
            });
        }

        let mut nodes = HashMap::with_capacity(node_count);
        for (i, entry) in entries.iter().enumerate() {
            let at = table_end + i * dims as usize * 4;
            let vector: Vec<f32> = data[at..at + dims as usize * 4]
                .chunks_exact(4)
                .map(|c| f32::from_le_bytes(c.try_into().expect("sized")))
                .collect();
            nodes.insert(
                entry.id,
                HnswNode {
                    id: entry.id,
                    vector,
                    level: entry.level,
                    neighbors: Vec::new(),
                },
            );
        }

        let mut pos = vectors_end;
        let read_u16 = |data: &[u8], pos: usize| -> Result<u16> {
            data.get(pos..pos + 2)
                .map(|s| u16::from_le_bytes(s.try_into().expect("sized")))
                .ok_or_else(|| StoreError::Format("HNSW neighbor section truncated".into()))
        };
        for entry in &entries {
            let level_count = read_u16(&data, pos)? as usize;
            pos += 2;
            let mut neighbors = Vec::with_capacity(level_count);
            for _ in 0..level_count {
                let count = read_u16(&data, pos)? as usize;
                pos += 2;
                let ids = data
                    .get(pos..pos + count * 8)
                    .ok_or_else(|| StoreError::Format("HNSW neighbor section truncated".into()))?
                    .chunks_exact(8)
                    .map(|c| u64::from_le_bytes(c.try_into().expect("sized")))
                    .collect();
                pos += count * 8;
                neighbors.push(ids);
            }
            nodes
                .get_mut(&entry.id)
                .expect("node table entry")
                .neighbors = neighbors;
        }

        let mut state = self.state.write();
        state.nodes = nodes;
        state.entry_point = has_entry.then_some(entry_point);
        state.max_level = max_level;
        state.dirty = false;
        Ok(())
    }
}
