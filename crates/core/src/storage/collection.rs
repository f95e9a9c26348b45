//! A collection: one HNSW graph, one inverted index, one forward index,
//! and the in-memory key tables that tie them together.
//!
//! The key tables (`key → block count`, `key → vector ids`) are rebuilt
//! from the forward index on load. Their write lock is the append critical
//! section: vector-id minting order is the order appends enter it.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use parking_lot::RwLock;

use crate::block::{Block, CollectionConfig, KeywordMode, SearchFilter, SearchHit};
use crate::error::{Result, StoreError};
use crate::filter::IdFilter;
use crate::forward::ForwardIndex;
use crate::hnsw::HnswGraph;
use crate::keyword::InvertedIndex;

/// File names inside a collection directory.
const HNSW_FILE: &str = "vectors.hnsw";
const KEYWORDS_FILE: &str = "keywords.inv";
const DOC_MAP_FILE: &str = "doc_map.bin";

#[derive(Debug, Default)]
struct KeyTables {
    key_lengths: HashMap<String, u32>,
    key_index: HashMap<String, Vec<u64>>,
}

/// One named collection and all of its indexes.
pub struct Collection {
    pub config: CollectionConfig,
    base_path: PathBuf,
    hnsw: HnswGraph,
    keywords: InvertedIndex,
    doc_map: ForwardIndex,
    tables: RwLock<KeyTables>,
}

impl Collection {
    /// Create a fresh, empty collection rooted at `base_path`.
    pub fn create(config: CollectionConfig, base_path: &Path) -> Self {
        let hnsw = HnswGraph::new(config.dimensions, config.metric);
        let keywords = InvertedIndex::new(base_path.join(KEYWORDS_FILE));
        let doc_map = ForwardIndex::new(base_path.join(DOC_MAP_FILE));
        Self {
            config,
            base_path: base_path.to_path_buf(),
            hnsw,
            keywords,
            doc_map,
            tables: RwLock::new(KeyTables::default()),
        }
    }

    /// Load a collection's indexes from disk and rebuild the key tables.
    pub fn load(config: CollectionConfig, base_path: &Path) -> Result<Self> {
        let collection = Self::create(config, base_path);
        collection.hnsw.load(&base_path.join(HNSW_FILE))?;
        collection.keywords.load()?;
        collection.doc_map.load()?;
        collection.rebuild_tables();
        Ok(collection)
    }

    /// Rebuild `key_lengths` and `key_index` from the forward index.
    fn rebuild_tables(&self) {
        let mut tables = self.tables.write();
        tables.key_lengths.clear();
        tables.key_index.clear();
        for (id, loc) in self.doc_map.entries() {
            tables.key_index.entry(loc.key.clone()).or_default().push(id);
            let length = tables.key_lengths.entry(loc.key).or_insert(0);
            if loc.index >= *length {
                *length = loc.index + 1;
            }
        }
        // Ids are minted in append order; ascending id = block order.
        for ids in tables.key_index.values_mut() {
            ids.sort_unstable();
        }
    }

    /// Append a block under a key, returning the block's index.
    ///
    /// Mints the next vector id, inserts into the HNSW graph when the block
    /// carries a vector, records the forward mapping, indexes keywords, and
    /// bumps the key tables. All of it happens under the table write lock.
    pub fn append_block(&self, key: &str, block: &Block) -> Result<u32> {
        let mut tables = self.tables.write();

        let index = tables.key_lengths.get(key).copied().unwrap_or(0);
        let vector_id = self.doc_map.next_vector_id();

        if !block.vector.is_empty() {
            self.hnsw.add(vector_id, &block.vector)?;
        }
        self.doc_map.add(vector_id, key, index);
        if !block.keywords.is_empty() {
            self.keywords.add(&block.keywords, vector_id);
        }

        *tables.key_lengths.entry(key.to_string()).or_insert(0) += 1;
        tables.key_index.entry(key.to_string()).or_default().push(vector_id);
        Ok(index)
    }

    /// Build the id whitelist a filter implies: keyword hits and/or the
    /// union of the named keys' id lists, intersected when both exist.
    fn build_filter(&self, filter: &SearchFilter) -> Option<IdFilter> {
        let keyword_ids =
            self.keywords
                .search(&filter.keywords, filter.keyword_mode, filter.max_distance);

        let key_ids = if filter.keys.is_empty() {
            None
        } else {
            let tables = self.tables.read();
            let mut ids = IdFilter::new();
            for key in &filter.keys {
                if let Some(list) = tables.key_index.get(key) {
                    for &id in list {
                        ids.insert(id);
                    }
                }
            }
            Some(ids)
        };

        match (keyword_ids, key_ids) {
            (Some(a), Some(b)) => Some(a.intersect(&b)),
            (Some(a), None) => Some(a),
            (None, Some(b)) => Some(b),
            (None, None) => None,
        }
    }

    /// Vector search, optionally filtered. Results carry (key, index,
    /// distance) in ascending distance order; hits whose forward mapping
    /// has vanished are dropped.
    pub fn search(
        &self,
        query: &[f32],
        top_k: u32,
        filter: &SearchFilter,
    ) -> Result<Vec<SearchHit>> {
        let id_filter = self.build_filter(filter);
        if let Some(ref ids) = id_filter {
            if ids.is_empty() {
                return Ok(Vec::new());
            }
        }

        let hits = self.hnsw.search(query, top_k as usize, id_filter.as_ref())?;

        Ok(hits
            .into_iter()
            .filter_map(|(id, distance)| {
                let loc = self.doc_map.get(id)?;
                Some(SearchHit {
                    key: loc.key,
                    index: loc.index,
                    distance,
                    block: None,
                })
            })
            .collect())
    }

    /// Keyword-only search: unique keys whose blocks match, resolved (and
    /// stale ids filtered) through the forward index.
    pub fn keyword_search(
        &self,
        keywords: &[String],
        mode: KeywordMode,
        max_distance: u32,
    ) -> Result<Vec<String>> {
        let Some(ids) = self.keywords.search(keywords, mode, max_distance) else {
            return Ok(Vec::new());
        };

        let mut keys: Vec<String> = ids
            .to_sorted_vec()
            .into_iter()
            .filter_map(|id| self.doc_map.get(id).map(|loc| loc.key))
            .collect();
        keys.sort();
        keys.dedup();
        Ok(keys)
    }

    /// Delete a key and all of its blocks from the in-memory indexes.
    /// Keyword postings keep their (now stale) ids; queries filter them
    /// out through the forward index.
    pub fn delete_key(&self, key: &str) -> Result<()> {
        let mut tables = self.tables.write();
        let ids = tables
            .key_index
            .remove(key)
            .ok_or_else(|| StoreError::NotFound(format!("key {key:?} not found")))?;
        tables.key_lengths.remove(key);

        for id in ids {
            // Blocks without vectors have no graph node.
            let _ = self.hnsw.delete(id);
            self.doc_map.delete(id);
        }
        Ok(())
    }

    pub fn key_length(&self, key: &str) -> Result<u32> {
        self.tables
            .read()
            .key_lengths
            .get(key)
            .copied()
            .ok_or_else(|| StoreError::NotFound(format!("key {key:?} not found")))
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.tables.read().key_lengths.contains_key(key)
    }

    pub fn list_keys(&self) -> Vec<String> {
        self.tables.read().key_lengths.keys().cloned().collect()
    }

    /// Number of forward-index entries (= blocks) in the collection.
    pub fn count(&self) -> u64 {
        self.doc_map.count() as u64
    }

    pub fn get_vector_by_id(&self, id: u64) -> Option<Vec<f32>> {
        self.hnsw.get_vector(id)
    }

    /// Resolve the vector id of a specific block by matching forward-index
    /// block positions against the key's id list.
    pub fn block_vector_id(&self, key: &str, index: u32) -> Result<u64> {
        let tables = self.tables.read();
        let ids = tables
            .key_index
            .get(key)
            .ok_or_else(|| StoreError::NotFound(format!("key {key:?} not found")))?;
        ids.iter()
            .copied()
            .find(|&id| {
                self.doc_map
                    .get(id)
                    .is_some_and(|loc| loc.index == index)
            })
            .ok_or_else(|| {
                StoreError::NotFound(format!("block {index} not found for key {key:?}"))
            })
    }

    /// Persist every index to the collection directory.
    pub fn save(&self) -> Result<()> {
        self.hnsw.save(&self.base_path.join(HNSW_FILE))?;
        self.keywords.save()?;
        self.doc_map.save()?;
        Ok(())
    }

    pub(crate) fn hnsw(&self) -> &HnswGraph {
        &self.hnsw
    }

    pub(crate) fn doc_map(&self) -> &ForwardIndex {
        &self.doc_map
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hnsw::DistanceMetric;
    use tempfile::TempDir;

    fn make_collection(dir: &TempDir, dims: u32) -> Collection {
        let config = CollectionConfig {
            name: "test".into(),
            dimensions: dims,
            metric: DistanceMetric::L2,
        };
        std::fs::create_dir_all(dir.path().join("test")).unwrap();
        Collection::create(config, &dir.path().join("test"))
    }

    fn block(vector: &[f32], keywords: &[&str]) -> Block {
        Block {
            primary: b"data".to_vec(),
            vector: vector.to_vec(),
            keywords: keywords.iter().map(|s| s.to_string()).collect(),
        }
    }

    #[test]
    fn test_append_assigns_sequential_indexes() {
        let dir = TempDir::new().unwrap();
        let coll = make_collection(&dir, 2);
        assert_eq!(coll.append_block("k", &block(&[1.0, 0.0], &[])).unwrap(), 0);
        assert_eq!(coll.append_block("k", &block(&[0.0, 1.0], &[])).unwrap(), 1);
        assert_eq!(coll.key_length("k").unwrap(), 2);
        assert_eq!(coll.count(), 2);
    }

    #[test]
    fn test_vector_ids_strictly_monotonic() {
        let dir = TempDir::new().unwrap();
        let coll = make_collection(&dir, 2);
        coll.append_block("a", &block(&[1.0, 0.0], &[])).unwrap();
        coll.append_block("b", &block(&[0.0, 1.0], &[])).unwrap();
        let id_a = coll.block_vector_id("a", 0).unwrap();
        let id_b = coll.block_vector_id("b", 0).unwrap();
        assert!(id_b > id_a);

        coll.delete_key("a").unwrap();
        coll.append_block("c", &block(&[1.0, 1.0], &[])).unwrap();
        let id_c = coll.block_vector_id("c", 0).unwrap();
        assert!(id_c > id_b, "ids are never reused");
    }

    #[test]
    fn test_search_resolves_locations() {
        let dir = TempDir::new().unwrap();
        let coll = make_collection(&dir, 2);
        coll.append_block("near", &block(&[0.0, 0.0], &[])).unwrap();
        coll.append_block("far", &block(&[10.0, 10.0], &[])).unwrap();

        let hits = coll
            .search(&[0.1, 0.0], 1, &SearchFilter::default())
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].key, "near");
        assert_eq!(hits[0].index, 0);
    }

    #[test]
    fn test_keyword_filter_intersection() {
        let dir = TempDir::new().unwrap();
        let coll = make_collection(&dir, 2);
        coll.append_block("a", &block(&[1.0, 0.0], &["x"])).unwrap();
        coll.append_block("b", &block(&[0.0, 1.0], &["x", "y"])).unwrap();
        coll.append_block("c", &block(&[1.0, 1.0], &["y"])).unwrap();

        let filter = SearchFilter {
            keywords: vec!["x".into(), "y".into()],
            ..Default::default()
        };
        let hits = coll.search(&[1.0, 1.0], 3, &filter).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].key, "b");
    }

    #[test]
    fn test_key_filter() {
        let dir = TempDir::new().unwrap();
        let coll = make_collection(&dir, 2);
        coll.append_block("a", &block(&[0.0, 0.0], &[])).unwrap();
        coll.append_block("b", &block(&[0.1, 0.0], &[])).unwrap();

        let filter = SearchFilter {
            keys: vec!["b".into()],
            ..Default::default()
        };
        let hits = coll.search(&[0.0, 0.0], 2, &filter).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].key, "b");
    }

    #[test]
    fn test_unmatched_filter_returns_empty() {
        let dir = TempDir::new().unwrap();
        let coll = make_collection(&dir, 2);
        coll.append_block("a", &block(&[0.0, 0.0], &["x"])).unwrap();
        let filter = SearchFilter {
            keywords: vec!["nomatch".into()],
            ..Default::default()
        };
        assert!(coll.search(&[0.0, 0.0], 1, &filter).unwrap().is_empty());
    }

    #[test]
    fn test_delete_key_removes_everything_reachable() {
        let dir = TempDir::new().unwrap();
        let coll = make_collection(&dir, 2);
        coll.append_block("gone", &block(&[0.0, 0.0], &["x"])).unwrap();
        coll.delete_key("gone").unwrap();

        assert!(!coll.contains_key("gone"));
        assert_eq!(coll.count(), 0);
        assert!(coll
            .search(&[0.0, 0.0], 1, &SearchFilter::default())
            .unwrap()
            .is_empty());
        // Stale postings resolve to nothing through the forward index.
        assert!(coll
            .keyword_search(&["x".into()], KeywordMode::Exact, 0)
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_delete_missing_key() {
        let dir = TempDir::new().unwrap();
        let coll = make_collection(&dir, 2);
        assert!(matches!(
            coll.delete_key("ghost"),
            Err(StoreError::NotFound(_))
        ));
    }

    #[test]
    fn test_keyword_search_unique_keys() {
        let dir = TempDir::new().unwrap();
        let coll = make_collection(&dir, 2);
        coll.append_block("k1", &block(&[1.0, 0.0], &["shared"])).unwrap();
        coll.append_block("k1", &block(&[0.0, 1.0], &["shared"])).unwrap();
        coll.append_block("k2", &block(&[1.0, 1.0], &["shared"])).unwrap();

        let keys = coll
            .keyword_search(&["shared".into()], KeywordMode::Exact, 0)
            .unwrap();
        assert_eq!(keys, vec!["k1".to_string(), "k2".to_string()]);
    }

    #[test]
    fn test_block_without_vector() {
        let dir = TempDir::new().unwrap();
        let coll = make_collection(&dir, 2);
        coll.append_block("novec", &block(&[], &["kw"])).unwrap();
        assert_eq!(coll.key_length("novec").unwrap(), 1);
        // No graph node, but the forward mapping exists.
        let id = coll.block_vector_id("novec", 0).unwrap();
        assert!(coll.get_vector_by_id(id).is_none());
        coll.delete_key("novec").unwrap();
        assert_eq!(coll.count(), 0);
    }

    #[test]
    fn test_save_load_rebuilds_tables() {
        let dir = TempDir::new().unwrap();
        let config = CollectionConfig {
            name: "persist".into(),
            dimensions: 2,
            metric: DistanceMetric::L2,
        };
        let path = dir.path().join("persist");
        std::fs::create_dir_all(&path).unwrap();
        {
            let coll = Collection::create(config.clone(), &path);
            coll.append_block("k", &block(&[1.0, 0.0], &["kw"])).unwrap();
            coll.append_block("k", &block(&[0.0, 1.0], &[])).unwrap();
            coll.save().unwrap();
        }
        let coll = Collection::load(config, &path).unwrap();
        assert_eq!(coll.key_length("k").unwrap(), 2);
        assert_eq!(coll.count(), 2);
        let hits = coll
            .search(&[1.0, 0.0], 1, &SearchFilter::default())
            .unwrap();
        assert_eq!(hits[0].index, 0);
        let keys = coll
            .keyword_search(&["kw".into()], KeywordMode::Exact, 0)
            .unwrap();
        assert_eq!(keys, vec!["k".to_string()]);
    }
}
