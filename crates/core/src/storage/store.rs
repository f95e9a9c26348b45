//! `VectorStore`: the top-level façade composing the shard log, the
//! collection manager, and the write-ahead log under one data root.
//!
//! Every append follows the same pipeline: WAL record (fsynced) →
//! collection update (HNSW + forward + inverted + key tables) → encoded
//! entry appended to the shard log. Reads decode the shard record and
//! hydrate the vector from the in-memory graph. On open, the WAL is
//! replayed through the same paths with logging suppressed, so recovery
//! does not re-log its own work.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::block::{Block, CollectionConfig, KeywordMode, SearchFilter, SearchHit, StoreConfig};
use crate::error::{Result, StoreError};
use crate::shard::entry::{self, DataType, Entry, EntryFlags};
use crate::shard::ShardLog;
use crate::storage::collection::Collection;
use crate::storage::manager::CollectionManager;
use crate::storage::repair::{self, RepairReport};
use crate::storage::wal::{Wal, WalOp};

/// The single-node storage engine.
pub struct VectorStore {
    shard_log: ShardLog,
    collections: CollectionManager,
    wal: Wal,
    config: StoreConfig,
}

impl VectorStore {
    /// Open a store rooted at `config.data_path`, replaying any WAL
    /// records left behind by an unclean shutdown.
    pub fn open(config: StoreConfig) -> Result<Self> {
        let data_root = PathBuf::from(&config.data_path);
        std::fs::create_dir_all(&data_root)?;

        let shard_log = ShardLog::open(&data_root, config.sync_mode)?;
        let collections = CollectionManager::open(&data_root)?;
        let wal = Wal::open(&data_root.join("vector.wal"))?;

        let store = Self {
            shard_log,
            collections,
            wal,
            config,
        };
        store.recover_from_wal()?;
        Ok(store)
    }

    /// Replay every complete WAL record through the normal mutation paths
    /// with logging suppressed. Individual record failures are logged and
    /// skipped so one bad record does not block startup.
    fn recover_from_wal(&self) -> Result<()> {
        let (records, stats) = self.wal.replay()?;
        if stats.truncated || stats.crc_error {
            tracing::warn!(
                applied = stats.success,
                truncated = stats.truncated,
                crc_error = stats.crc_error,
                "WAL replay stopped early"
            );
        }
        if records.is_empty() {
            return Ok(());
        }

        tracing::info!(records = records.len(), "replaying WAL");
        let mut applied = 0usize;
        for record in records {
            let outcome = match record.op {
                WalOp::Add => {
                    let block = Block {
                        primary: record.data,
                        vector: record.vector,
                        keywords: record.keywords,
                    };
                    self.append_block_inner(&record.collection, &record.key, &block, false)
                        .map(|_| ())
                }
                WalOp::Delete => self.delete_key_inner(&record.collection, &record.key, false),
            };
            match outcome {
                Ok(()) => applied += 1,
                Err(e) => {
                    tracing::warn!(collection = %record.collection, key = %record.key, error = %e, "skipping WAL record")
                }
            }
        }
        tracing::info!(applied, "WAL replay complete");

        // Flush the restored state and truncate the log, so a second crash
        // cannot replay these records on top of themselves.
        self.checkpoint()?;
        Ok(())
    }

    // ── Collections ────────────────────────────────────────────────────

    pub fn create_collection(&self, config: CollectionConfig) -> Result<()> {
        self.collections.create(config)
    }

    pub fn delete_collection(&self, name: &str) -> Result<()> {
        self.collections.delete(name)
    }

    pub fn list_collections(&self) -> Vec<CollectionConfig> {
        self.collections.list()
    }

    fn collection(&self, name: &str) -> Result<Arc<Collection>> {
        self.collections.get(name)
    }

    // ── Writes ─────────────────────────────────────────────────────────

    /// Append a block under a key, returning the assigned block index.
    pub fn append_block(&self, collection: &str, key: &str, block: &Block) -> Result<u32> {
        self.append_block_inner(collection, key, block, true)
    }

    fn append_block_inner(
        &self,
        collection: &str,
        key: &str,
        block: &Block,
        log_to_wal: bool,
    ) -> Result<u32> {
        let coll = self.collection(collection)?;

        // Reject malformed keywords before any state changes.
        for kw in &block.keywords {
            entry::validate_keyword(&entry::normalize_keyword(kw))?;
        }

        if log_to_wal {
            self.wal
                .log_add(collection, key, &block.vector, &block.keywords, &block.primary)?;
        }

        let index = coll.append_block(key, block)?;
        let vector_id = coll.block_vector_id(key, index)?;
        let encoded = encode_block(key, block, vector_id)?;
        self.shard_log.append(key, &encoded)?;
        Ok(index)
    }

    /// Append many blocks; shard-log writes are grouped into one batch per
    /// shard. Returns a per-item success vector covering every stage — an
    /// item is reported successful only once its record is in the shard
    /// log. An item that fails at the shard stage keeps its WAL record and
    /// in-memory index state; its payload reads back as not-found until a
    /// retry re-appends it.
    pub fn batch_append_blocks(
        &self,
        collection: &str,
        items: &[(String, Block)],
    ) -> Result<Vec<bool>> {
        let coll = self.collection(collection)?;

        let mut successes = vec![false; items.len()];
        let mut batch: Vec<(String, Vec<u8>)> = Vec::with_capacity(items.len());
        let mut batch_origin: Vec<usize> = Vec::with_capacity(items.len());

        for (i, (key, block)) in items.iter().enumerate() {
            if block
                .keywords
                .iter()
                .any(|kw| entry::validate_keyword(&entry::normalize_keyword(kw)).is_err())
            {
                continue;
            }
            if self
                .wal
                .log_add(collection, key, &block.vector, &block.keywords, &block.primary)
                .is_err()
            {
                continue;
            }
            let Ok(index) = coll.append_block(key, block) else {
                continue;
            };
            let Ok(vector_id) = coll.block_vector_id(key, index) else {
                continue;
            };
            let Ok(encoded) = encode_block(key, block, vector_id) else {
                continue;
            };
            batch.push((key.clone(), encoded));
            batch_origin.push(i);
        }

        if !batch.is_empty() {
            let shard_outcomes = self.shard_log.batch_append(&batch);
            for (j, ok) in shard_outcomes.into_iter().enumerate() {
                successes[batch_origin[j]] = ok;
            }
        }
        Ok(successes)
    }

    /// Delete a key and all its blocks from every index. Shard-log bytes
    /// stay on disk; the key's offsets are dropped and tombstoned.
    pub fn delete_key(&self, collection: &str, key: &str) -> Result<()> {
        self.delete_key_inner(collection, key, true)
    }

    fn delete_key_inner(&self, collection: &str, key: &str, log_to_wal: bool) -> Result<()> {
        let coll = self.collection(collection)?;
        if !coll.contains_key(key) {
            return Err(StoreError::NotFound(format!("key {key:?} not found")));
        }
        if log_to_wal {
            self.wal.log_delete(collection, key)?;
        }
        coll.delete_key(key)?;
        self.shard_log.delete_key(key)?;
        Ok(())
    }

    /// Unsupported; blocks are immutable once appended.
    pub fn update_block(
        &self,
        _collection: &str,
        _key: &str,
        _index: u32,
        _block: &Block,
    ) -> Result<()> {
        Err(StoreError::NotImplemented("update_block"))
    }

    /// Unsupported; blocks are immutable once appended.
    pub fn replace_block(
        &self,
        _collection: &str,
        _key: &str,
        _index: u32,
        _block: &Block,
    ) -> Result<()> {
        Err(StoreError::NotImplemented("replace_block"))
    }

    // ── Reads ──────────────────────────────────────────────────────────

    /// Fetch one block: decode the shard record, then hydrate the vector
    /// from the graph when the entry names a vector id.
    pub fn get_block(&self, collection: &str, key: &str, index: u32) -> Result<Block> {
        let coll = self.collection(collection)?;
        if !coll.contains_key(key) {
            return Err(StoreError::NotFound(format!("key {key:?} not found")));
        }
        let payload = self.shard_log.get(key, index as usize)?;
        let entry = entry::decode_entry(&payload)?;
        Ok(block_from_entry(&coll, entry))
    }

    /// Fetch every block for a key, in block order.
    pub fn get_key(&self, collection: &str, key: &str) -> Result<Vec<Block>> {
        let coll = self.collection(collection)?;
        if !coll.contains_key(key) {
            return Err(StoreError::NotFound(format!("key {key:?} not found")));
        }
        let payloads = self.shard_log.get_all(key)?;
        let mut blocks = Vec::with_capacity(payloads.len());
        for payload in payloads {
            match entry::decode_entry(&payload) {
                Ok(entry) => blocks.push(block_from_entry(&coll, entry)),
                Err(e) => tracing::warn!(key, error = %e, "skipping undecodable block"),
            }
        }
        Ok(blocks)
    }

    /// Fetch just the in-memory vector of a block.
    pub fn get_vector(&self, collection: &str, key: &str, index: u32) -> Result<Vec<f32>> {
        let coll = self.collection(collection)?;
        let vector_id = coll.block_vector_id(key, index)?;
        coll.get_vector_by_id(vector_id).ok_or_else(|| {
            StoreError::NotFound(format!("vector data missing for id {vector_id}"))
        })
    }

    /// Fetch the blocks in the window `[index - before, index + after]`
    /// around an anchor block, clamped to the key's bounds, in block order.
    pub fn get_relative_blocks(
        &self,
        collection: &str,
        key: &str,
        index: u32,
        before: u32,
        after: u32,
    ) -> Result<Vec<Block>> {
        let coll = self.collection(collection)?;
        let length = coll.key_length(key)?;
        if index >= length {
            return Err(StoreError::NotFound(format!(
                "block {index} out of bounds for key {key:?} ({length} blocks)"
            )));
        }
        let start = index.saturating_sub(before);
        let end = index.saturating_add(after).min(length - 1);
        (start..=end)
            .map(|i| self.get_block(collection, key, i))
            .collect()
    }

    pub fn get_key_length(&self, collection: &str, key: &str) -> Result<u32> {
        self.collection(collection)?.key_length(key)
    }

    pub fn contains_key(&self, collection: &str, key: &str) -> Result<bool> {
        Ok(self.collection(collection)?.contains_key(key))
    }

    pub fn list_keys(&self, collection: &str) -> Result<Vec<String>> {
        Ok(self.collection(collection)?.list_keys())
    }

    // ── Search ─────────────────────────────────────────────────────────

    /// Vector search with an optional key/keyword filter. Each hit is
    /// hydrated with its decoded block where possible.
    pub fn search(
        &self,
        collection: &str,
        query: &[f32],
        top_k: u32,
        filter: &SearchFilter,
    ) -> Result<Vec<SearchHit>> {
        let coll = self.collection(collection)?;
        let mut hits = coll.search(query, top_k, filter)?;
        for hit in &mut hits {
            if let Ok(block) = self.get_block(collection, &hit.key, hit.index) {
                hit.block = Some(block);
            }
        }
        Ok(hits)
    }

    /// Search using an existing block's vector as the query.
    pub fn search_more_like_this(
        &self,
        collection: &str,
        key: &str,
        index: u32,
        top_k: u32,
    ) -> Result<Vec<SearchHit>> {
        let query = self.get_vector(collection, key, index)?;
        self.search(collection, &query, top_k, &SearchFilter::default())
    }

    /// Search restricted to one key's blocks.
    pub fn search_in_key(
        &self,
        collection: &str,
        key: &str,
        query: &[f32],
        top_k: u32,
    ) -> Result<Vec<SearchHit>> {
        let filter = SearchFilter {
            keys: vec![key.to_string()],
            ..Default::default()
        };
        self.search(collection, query, top_k, &filter)
    }

    /// Keyword-only search returning unique keys.
    pub fn keyword_search(
        &self,
        collection: &str,
        keywords: &[String],
        mode: KeywordMode,
        max_distance: u32,
    ) -> Result<Vec<String>> {
        self.collection(collection)?
            .keyword_search(keywords, mode, max_distance)
    }

    // ── Maintenance ────────────────────────────────────────────────────

    /// Unsupported at the collection level; see [`ShardLog::snapshot`] for
    /// raw shard-file copies.
    pub fn snapshot_collection(&self, _collection: &str) -> Result<String> {
        Err(StoreError::NotImplemented("snapshot_collection"))
    }

    /// Unsupported; deleted payload bytes are reclaimed out of band.
    pub fn compact_collection(&self, _collection: &str) -> Result<()> {
        Err(StoreError::NotImplemented("compact_collection"))
    }

    /// Copy all shard files under `snapshots/<name>/`.
    pub fn snapshot_shards(&self, name: &str) -> Result<PathBuf> {
        self.shard_log.snapshot(name)
    }

    /// Report orphan and missing vector ids for a collection.
    pub fn check_consistency(&self, collection: &str) -> Result<RepairReport> {
        Ok(repair::check_consistency(&self.collection(collection)?.clone()))
    }

    /// Delete orphan vector ids reported by the consistency check.
    pub fn repair_orphans(&self, collection: &str) -> Result<usize> {
        repair::repair_orphans(&*self.collection(collection)?)
    }

    /// Flush all collection state, then truncate the WAL.
    pub fn checkpoint(&self) -> Result<()> {
        self.collections.save_all()?;
        self.shard_log.save_indexes()?;
        self.wal.checkpoint()
    }

    /// Checkpoint and release; called on clean shutdown.
    pub fn close(&self) -> Result<()> {
        self.checkpoint()?;
        self.shard_log.close()
    }

    /// The store's data root.
    pub fn data_path(&self) -> &Path {
        Path::new(&self.config.data_path)
    }
}

/// Build the on-disk entry for a block: data-type flag set iff a vector is
/// present, secondary field carrying the big-endian vector id.
fn encode_block(key: &str, block: &Block, vector_id: u64) -> Result<Vec<u8>> {
    let entry = Entry {
        flags: EntryFlags {
            data_type: if block.vector.is_empty() {
                DataType::Binary
            } else {
                DataType::Vector
            },
            compressed: false,
            tombstone: false,
        },
        key: key.as_bytes().to_vec(),
        keywords: block.keywords.clone(),
        primary: block.primary.clone(),
        secondary: entry::vector_id_to_bytes(vector_id),
    };
    entry::encode_entry(&entry)
}

/// Turn a decoded entry back into a block, attaching the live vector when
/// the secondary field names one.
fn block_from_entry(coll: &Collection, entry: Entry) -> Block {
    let vector = if entry.secondary.len() == 8 {
        entry::bytes_to_vector_id(&entry.secondary)
            .ok()
            .and_then(|id| coll.get_vector_by_id(id))
            .unwrap_or_default()
    } else {
        Vec::new()
    };
    Block {
        primary: entry.primary,
        vector,
        keywords: entry.keywords,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hnsw::DistanceMetric;
    use tempfile::TempDir;

    fn open_store(dir: &TempDir) -> VectorStore {
        VectorStore::open(StoreConfig::new(dir.path().to_string_lossy())).unwrap()
    }

    fn make_collection(store: &VectorStore, name: &str, dims: u32) {
        store
            .create_collection(CollectionConfig {
                name: name.into(),
                dimensions: dims,
                metric: DistanceMetric::L2,
            })
            .unwrap();
    }

    #[test]
    fn test_append_get_roundtrip() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);
        make_collection(&store, "c", 4);

        let block = Block {
            primary: b"hello".to_vec(),
            vector: vec![0.1, 0.2, 0.3, 0.4],
            keywords: vec!["hi".into()],
        };
        assert_eq!(store.append_block("c", "doc1", &block).unwrap(), 0);

        let got = store.get_block("c", "doc1", 0).unwrap();
        assert_eq!(got.primary, b"hello");
        assert_eq!(got.vector, vec![0.1, 0.2, 0.3, 0.4]);
        assert_eq!(got.keywords, vec!["hi".to_string()]);
    }

    #[test]
    fn test_missing_collection() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);
        let err = store
            .append_block("ghost", "k", &Block::default())
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
    }

    #[test]
    fn test_invalid_keyword_rejected_before_mutation() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);
        make_collection(&store, "c", 2);

        let bad = Block {
            primary: b"x".to_vec(),
            vector: vec![1.0, 0.0],
            keywords: vec!["bad keyword!".into()],
        };
        assert!(matches!(
            store.append_block("c", "k", &bad),
            Err(StoreError::InputRange(_))
        ));
        // Nothing was applied.
        assert!(!store.contains_key("c", "k").unwrap());
        assert_eq!(store.check_consistency("c").unwrap().total_entries, 0);
    }

    #[test]
    fn test_stub_operations() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);
        make_collection(&store, "c", 2);
        let block = Block::default();
        assert!(matches!(
            store.update_block("c", "k", 0, &block),
            Err(StoreError::NotImplemented("update_block"))
        ));
        assert!(matches!(
            store.replace_block("c", "k", 0, &block),
            Err(StoreError::NotImplemented("replace_block"))
        ));
        assert!(matches!(
            store.snapshot_collection("c"),
            Err(StoreError::NotImplemented(_))
        ));
        assert!(matches!(
            store.compact_collection("c"),
            Err(StoreError::NotImplemented(_))
        ));
    }

    #[test]
    fn test_batch_append() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);
        make_collection(&store, "c", 2);

        let items: Vec<(String, Block)> = (0..10)
            .map(|i| {
                (
                    format!("key{i}"),
                    Block {
                        primary: format!("payload{i}").into_bytes(),
                        vector: vec![i as f32, 0.0],
                        keywords: vec![],
                    },
                )
            })
            .collect();
        let ok = store.batch_append_blocks("c", &items).unwrap();
        assert!(ok.iter().all(|&b| b));
        for i in 0..10 {
            let got = store.get_block("c", &format!("key{i}"), 0).unwrap();
            assert_eq!(got.primary, format!("payload{i}").into_bytes());
        }
    }

    #[test]
    fn test_batch_reports_per_item_failures() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);
        make_collection(&store, "c", 2);

        let items = vec![
            (
                "good".to_string(),
                Block {
                    primary: b"ok".to_vec(),
                    vector: vec![1.0, 0.0],
                    keywords: vec![],
                },
            ),
            (
                "bad".to_string(),
                Block {
                    primary: b"wrong dims".to_vec(),
                    vector: vec![1.0, 0.0, 3.0],
                    keywords: vec![],
                },
            ),
        ];
        let ok = store.batch_append_blocks("c", &items).unwrap();
        assert_eq!(ok, vec![true, false]);
    }

    #[test]
    fn test_wal_replay_after_unclean_shutdown() {
        let dir = TempDir::new().unwrap();
        {
            let store = open_store(&dir);
            make_collection(&store, "c", 2);
            store
                .append_block(
                    "c",
                    "k",
                    &Block {
                        primary: b"v".to_vec(),
                        vector: vec![1.0, 0.0],
                        keywords: vec![],
                    },
                )
                .unwrap();
            // Dropped without close(): collection indexes never flushed,
            // WAL still holds the append.
        }
        let store = open_store(&dir);
        assert_eq!(store.get_key_length("c", "k").unwrap(), 1);
        let hits = store
            .search("c", &[1.0, 0.0], 1, &SearchFilter::default())
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].key, "k");
    }

    #[test]
    fn test_relative_blocks_clamped_window() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);
        make_collection(&store, "c", 2);
        for word in ["first", "second", "third", "fourth", "fifth"] {
            store
                .append_block("c", "seq", &Block::from_primary(word.as_bytes()))
                .unwrap();
        }

        // Current plus next.
        let blocks = store.get_relative_blocks("c", "seq", 0, 0, 1).unwrap();
        assert_eq!(blocks.len(), 2);
        assert_eq!(blocks[0].primary, b"first");
        assert_eq!(blocks[1].primary, b"second");

        // Next from the last block clamps to just the current one.
        let blocks = store.get_relative_blocks("c", "seq", 4, 0, 1).unwrap();
        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0].primary, b"fifth");

        // Previous from the first block clamps the same way.
        let blocks = store.get_relative_blocks("c", "seq", 0, 1, 0).unwrap();
        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0].primary, b"first");

        let blocks = store.get_relative_blocks("c", "seq", 3, 1, 1).unwrap();
        assert_eq!(blocks.len(), 3);
        assert_eq!(blocks[1].primary, b"fourth");

        assert!(matches!(
            store.get_relative_blocks("c", "seq", 9, 1, 1),
            Err(StoreError::NotFound(_))
        ));
    }

    #[test]
    fn test_checkpoint_empties_wal() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);
        make_collection(&store, "c", 2);
        store
            .append_block(
                "c",
                "k",
                &Block {
                    primary: b"v".to_vec(),
                    vector: vec![1.0, 0.0],
                    keywords: vec![],
                },
            )
            .unwrap();
        store.checkpoint().unwrap();
        assert_eq!(
            std::fs::metadata(dir.path().join("vector.wal")).unwrap().len(),
            0
        );
    }
}
