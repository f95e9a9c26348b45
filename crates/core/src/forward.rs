//! Forward index: vector id → (key, block index).
//!
//! The authoritative record of which block a vector id belongs to. Search
//! results and keyword hits resolve through this map, which also makes it
//! the stale-id filter for inverted-index postings. Persisted as a single
//! bincode blob (`doc_map.bin`).

use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::error::{Result, StoreError};

/// Where a vector id points: a block position under a key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockLocation {
    pub key: String,
    pub index: u32,
}

/// Persistent `vector id → location` map.
pub struct ForwardIndex {
    mapping: RwLock<HashMap<u64, BlockLocation>>,
    file_path: PathBuf,
}

impl ForwardIndex {
    pub fn new(file_path: impl Into<PathBuf>) -> Self {
        Self {
            mapping: RwLock::new(HashMap::new()),
            file_path: file_path.into(),
        }
    }

    pub fn add(&self, vector_id: u64, key: &str, index: u32) {
        self.mapping.write().insert(
            vector_id,
            BlockLocation {
                key: key.to_string(),
                index,
            },
        );
    }

    pub fn get(&self, vector_id: u64) -> Option<BlockLocation> {
        self.mapping.read().get(&vector_id).cloned()
    }

    pub fn delete(&self, vector_id: u64) {
        self.mapping.write().remove(&vector_id);
    }

    pub fn contains(&self, vector_id: u64) -> bool {
        self.mapping.read().contains_key(&vector_id)
    }

    pub fn count(&self) -> usize {
        self.mapping.read().len()
    }

    /// Next id to mint: `max + 1` by linear scan. Ids are never reused, so
    /// this stays monotonic even when the map is sparse after deletions.
    /// Callers serialize minting through the collection's append lock.
    pub fn next_vector_id(&self) -> u64 {
        let mapping = self.mapping.read();
        mapping.keys().copied().max().unwrap_or(0) + 1
    }

    /// Snapshot of every (id, location) pair; used to rebuild the
    /// in-memory key tables on load and by the repair pass.
    pub fn entries(&self) -> Vec<(u64, BlockLocation)> {
        self.mapping
            .read()
            .iter()
            .map(|(id, loc)| (*id, loc.clone()))
            .collect()
    }

    pub fn save(&self) -> Result<()> {
        let mapping = self.mapping.read();
        let bytes = bincode::serialize(&*mapping)
            .map_err(|e| StoreError::Format(format!("forward index serialize failed: {e}")))?;
        let tmp = self.file_path.with_extension("bin.tmp");
        fs::write(&tmp, &bytes)?;
        fs::rename(&tmp, &self.file_path)?;
        Ok(())
    }

    /// Load the map; a missing file leaves it empty.
    pub fn load(&self) -> Result<()> {
        let bytes = match fs::read(&self.file_path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(e.into()),
        };
        let loaded: HashMap<u64, BlockLocation> = bincode::deserialize(&bytes)
            .map_err(|e| StoreError::Format(format!("forward index deserialize failed: {e}")))?;
        *self.mapping.write() = loaded;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_add_get_delete() {
        let dir = TempDir::new().unwrap();
        let fwd = ForwardIndex::new(dir.path().join("doc_map.bin"));
        fwd.add(1, "doc1", 0);
        assert_eq!(
            fwd.get(1),
            Some(BlockLocation {
                key: "doc1".into(),
                index: 0
            })
        );
        assert!(fwd.contains(1));
        fwd.delete(1);
        assert!(fwd.get(1).is_none());
    }

    #[test]
    fn test_next_vector_id_monotonic() {
        let dir = TempDir::new().unwrap();
        let fwd = ForwardIndex::new(dir.path().join("doc_map.bin"));
        assert_eq!(fwd.next_vector_id(), 1);
        fwd.add(1, "a", 0);
        fwd.add(2, "a", 1);
        assert_eq!(fwd.next_vector_id(), 3);
        // Sparse after delete: ids are never reused.
        fwd.delete(1);
        assert_eq!(fwd.next_vector_id(), 3);
    }

    #[test]
    fn test_save_load_roundtrip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("doc_map.bin");
        let fwd = ForwardIndex::new(&path);
        fwd.add(7, "doc1", 2);
        fwd.save().unwrap();

        let reloaded = ForwardIndex::new(&path);
        reloaded.load().unwrap();
        assert_eq!(reloaded.count(), 1);
        assert_eq!(reloaded.get(7).unwrap().index, 2);
    }

    #[test]
    fn test_load_missing_is_empty() {
        let dir = TempDir::new().unwrap();
        let fwd = ForwardIndex::new(dir.path().join("absent.bin"));
        fwd.load().unwrap();
        assert_eq!(fwd.count(), 0);
        assert_eq!(fwd.next_vector_id(), 1);
    }
}
