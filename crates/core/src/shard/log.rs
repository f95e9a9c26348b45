//! Sharded append-only payload log.
//!
//! Payloads are spread over [`SHARD_COUNT`] files under `<data_root>/data/`,
//! routed by the first four bytes of the key's BLAKE3 hash. Each record is
//! `[key_len: u32 BE][key][payload_len: u32 BE][zstd payload]`; each shard
//! keeps an in-memory `key -> offsets` index that is serialized beside the
//! data file on close and rebuilt by a sequential scan when missing or
//! unreadable.
//!
//! `delete_key` removes the key from the in-memory index and appends a
//! tombstone record (`payload_len == 0` — a zstd frame is never empty), so
//! a rebuild scan does not resurrect deleted keys.

use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::os::unix::fs::FileExt;
use std::path::{Path, PathBuf};

use parking_lot::RwLock;

use crate::block::SyncMode;
use crate::config::{MAX_KEY_LEN, SHARD_COUNT, SHARD_READ_AHEAD};
use crate::error::{Result, StoreError};
use crate::shard::compress::{compress, decompress};

/// One shard: a data file plus its offset index, each behind its own lock.
struct Shard {
    id: u32,
    path: PathBuf,
    file: RwLock<File>,
    index: RwLock<HashMap<String, Vec<u64>>>,
}

/// The sharded append-only log.
pub struct ShardLog {
    shards: Vec<Shard>,
    sync_mode: SyncMode,
    data_root: PathBuf,
}

/// Route a key to its shard: big-endian u32 of the first four BLAKE3 bytes,
/// modulo the shard count.
pub fn shard_for(key: &str) -> u32 {
    let hash = blake3::hash(key.as_bytes());
    let bytes = hash.as_bytes();
    u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) % SHARD_COUNT
}

fn validate_key(key: &str) -> Result<()> {
    if key.is_empty() || key.len() > MAX_KEY_LEN {
        return Err(StoreError::InputRange(format!(
            "key length must be 1..={MAX_KEY_LEN} bytes, got {}",
            key.len()
        )));
    }
    Ok(())
}

/// Build a `[key_len][key][payload_len][payload]` record buffer.
fn encode_record(key: &str, payload: &[u8]) -> Result<Vec<u8>> {
    if payload.len() >= u32::MAX as usize {
        return Err(StoreError::Compression(
            "payload exceeds 32-bit length field after compression".into(),
        ));
    }
    let mut buf = Vec::with_capacity(8 + key.len() + payload.len());
    buf.extend_from_slice(&(key.len() as u32).to_be_bytes());
    buf.extend_from_slice(key.as_bytes());
    buf.extend_from_slice(&(payload.len() as u32).to_be_bytes());
    buf.extend_from_slice(payload);
    Ok(buf)
}

impl Shard {
    fn index_path(&self) -> PathBuf {
        let mut os = self.path.clone().into_os_string();
        os.push(".idx");
        PathBuf::from(os)
    }

    /// Append a prepared record buffer, returning the pre-write offset.
    fn write_record(&self, record: &[u8], sync: bool) -> Result<u64> {
        let mut file = self.file.write();
        let offset = file.seek(SeekFrom::End(0))?;
        file.write_all(record)?;
        if sync {
            file.sync_all()?;
        }
        Ok(offset)
    }

    /// Read and decompress the record starting at `offset`.
    ///
    /// A single speculative read covers the header and small payloads; a
    /// second positioned read picks up the remainder of larger payloads.
    fn read_record_at(&self, offset: u64) -> Result<Vec<u8>> {
        let file = self.file.read();
        let mut buf = vec![0u8; SHARD_READ_AHEAD];
        let n = file.read_at(&mut buf, offset)?;
        if n < 4 {
            return Err(StoreError::Corruption(format!(
                "record at offset {offset} truncated before key length"
            )));
        }
        let key_len = u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]) as usize;
        let len_at = 4 + key_len;
        if len_at + 4 > n {
            // Header alone overflows the speculative read; re-read exactly.
            let mut len_buf = [0u8; 4];
            file.read_exact_at(&mut len_buf, offset + len_at as u64)?;
            let payload_len = u32::from_be_bytes(len_buf) as usize;
            let mut payload = vec![0u8; payload_len];
            file.read_exact_at(&mut payload, offset + len_at as u64 + 4)?;
            return decompress(&payload);
        }
        let payload_len =
            u32::from_be_bytes([buf[len_at], buf[len_at + 1], buf[len_at + 2], buf[len_at + 3]])
                as usize;
        let payload_start = len_at + 4;
        if payload_start + payload_len <= n {
            return decompress(&buf[payload_start..payload_start + payload_len]);
        }
        let mut payload = vec![0u8; payload_len];
        file.read_exact_at(&mut payload, offset + payload_start as u64)?;
        decompress(&payload)
    }

    fn save_index(&self) -> Result<()> {
        let index = self.index.read();
        let bytes = bincode::serialize(&*index)
            .map_err(|e| StoreError::Format(format!("offset index serialize failed: {e}")))?;
        let tmp = self.index_path().with_extension("idx.tmp");
        fs::write(&tmp, &bytes)?;
        fs::rename(&tmp, self.index_path())?;
        Ok(())
    }

    fn load_index(&self) -> Result<()> {
        let bytes = fs::read(self.index_path())?;
        let loaded: HashMap<String, Vec<u64>> = bincode::deserialize(&bytes)
            .map_err(|e| StoreError::Format(format!("offset index deserialize failed: {e}")))?;
        *self.index.write() = loaded;
        Ok(())
    }

    /// Rebuild the offset index by scanning the data file sequentially.
    /// Tombstone records (zero payload length) clear the key's offsets.
    fn rebuild_index(&self) -> Result<()> {
        let mut index: HashMap<String, Vec<u64>> = HashMap::new();
        let mut file = self.file.write();
        let file_size = file.metadata()?.len();
        file.seek(SeekFrom::Start(0))?;

        let mut offset = 0u64;
        let mut records = 0usize;
        while offset < file_size {
            let mut header = [0u8; 4];
            if file.read_exact(&mut header).is_err() {
                break;
            }
            let key_len = u32::from_be_bytes(header) as usize;
            let mut key_buf = vec![0u8; key_len];
            if file.read_exact(&mut key_buf).is_err() {
                break;
            }
            let Ok(key) = String::from_utf8(key_buf) else {
                break;
            };
            if file.read_exact(&mut header).is_err() {
                break;
            }
            let payload_len = u32::from_be_bytes(header) as u64;
            if payload_len == 0 {
                index.remove(&key);
            } else {
                if file.seek(SeekFrom::Current(payload_len as i64)).is_err() {
                    break;
                }
                index.entry(key).or_default().push(offset);
            }
            records += 1;
            offset = file.stream_position()?;
        }
        tracing::info!(
            shard = self.id,
            keys = index.len(),
            records,
            "rebuilt shard offset index"
        );
        *self.index.write() = index;
        Ok(())
    }
}

impl ShardLog {
    /// Open (creating if needed) all shard files under `<data_root>/data/`.
    pub fn open(data_root: &Path, sync_mode: SyncMode) -> Result<Self> {
        let data_dir = data_root.join("data");
        fs::create_dir_all(&data_dir)?;

        let mut shards = Vec::with_capacity(SHARD_COUNT as usize);
        for id in 0..SHARD_COUNT {
            let path = data_dir.join(format!("waddle_shard_{id:03}.db"));
            let file = OpenOptions::new()
                .read(true)
                .write(true)
                .create(true)
                .open(&path)?;
            let shard = Shard {
                id,
                path,
                file: RwLock::new(file),
                index: RwLock::new(HashMap::new()),
            };
            if let Err(e) = shard.load_index() {
                tracing::warn!(shard = id, error = %e, "offset index unreadable, rebuilding");
                shard.rebuild_index()?;
                shard.save_index()?;
            }
            shards.push(shard);
        }

        Ok(Self {
            shards,
            sync_mode,
            data_root: data_root.to_path_buf(),
        })
    }

    fn shard(&self, key: &str) -> &Shard {
        &self.shards[shard_for(key) as usize]
    }

    /// Append a payload for a key; compresses, writes under the shard's
    /// write lock, and records the offset.
    pub fn append(&self, key: &str, payload: &[u8]) -> Result<()> {
        validate_key(key)?;
        let record = encode_record(key, &compress(payload)?)?;
        let shard = self.shard(key);
        let offset = shard.write_record(&record, self.sync_mode == SyncMode::Strict)?;
        shard.index.write().entry(key.to_string()).or_default().push(offset);
        Ok(())
    }

    /// Append many payloads, grouped by shard so each shard's write lock is
    /// taken once. Record buffers are prepared concurrently per shard.
    ///
    /// Returns one outcome per entry. A write error abandons the rest of
    /// that shard's batch (the written prefix stays durable and indexed);
    /// entries on other shards are unaffected.
    pub fn batch_append(&self, entries: &[(String, Vec<u8>)]) -> Vec<bool> {
        let mut successes = vec![false; entries.len()];

        let mut grouped: HashMap<u32, Vec<usize>> = HashMap::new();
        for (i, (key, _)) in entries.iter().enumerate() {
            if let Err(e) = validate_key(key) {
                tracing::warn!(key = %key, error = %e, "batch item rejected");
                continue;
            }
            grouped.entry(shard_for(key)).or_default().push(i);
        }

        let sync = self.sync_mode == SyncMode::Strict;
        std::thread::scope(|scope| {
            let mut handles = Vec::with_capacity(grouped.len());
            for (shard_id, group) in grouped {
                let shard = &self.shards[shard_id as usize];
                handles.push(scope.spawn(move || -> Vec<(usize, bool)> {
                    let mut outcomes: Vec<(usize, bool)> = Vec::with_capacity(group.len());

                    let mut prepared: Vec<(usize, Vec<u8>)> = Vec::with_capacity(group.len());
                    for &i in &group {
                        let (key, payload) = &entries[i];
                        match compress(payload).and_then(|packed| encode_record(key, &packed)) {
                            Ok(record) => prepared.push((i, record)),
                            Err(e) => {
                                tracing::warn!(key = %key, error = %e, "batch item failed to encode");
                                outcomes.push((i, false));
                            }
                        }
                    }

                    let mut new_offsets: Vec<(usize, u64)> = Vec::with_capacity(prepared.len());
                    {
                        let mut file = shard.file.write();
                        match file.seek(SeekFrom::End(0)) {
                            Ok(mut offset) => {
                                let mut write_failed = false;
                                for (i, record) in &prepared {
                                    if write_failed {
                                        outcomes.push((*i, false));
                                        continue;
                                    }
                                    match file.write_all(record) {
                                        Ok(()) => {
                                            new_offsets.push((*i, offset));
                                            offset += record.len() as u64;
                                        }
                                        Err(e) => {
                                            tracing::error!(
                                                shard = shard.id,
                                                error = %e,
                                                "batch write failed, abandoning rest of shard batch"
                                            );
                                            outcomes.push((*i, false));
                                            write_failed = true;
                                        }
                                    }
                                }
                                if sync && !new_offsets.is_empty() {
                                    if let Err(e) = file.sync_all() {
                                        tracing::warn!(shard = shard.id, error = %e, "batch fsync failed");
                                    }
                                }
                            }
                            Err(e) => {
                                tracing::error!(shard = shard.id, error = %e, "batch seek failed");
                                outcomes.extend(prepared.iter().map(|&(i, _)| (i, false)));
                            }
                        }
                    }

                    let mut index = shard.index.write();
                    for &(i, offset) in &new_offsets {
                        index
                            .entry(entries[i].0.clone())
                            .or_default()
                            .push(offset);
                        outcomes.push((i, true));
                    }
                    outcomes
                }));
            }
            for handle in handles {
                for (i, ok) in handle.join().expect("shard writer thread panicked") {
                    successes[i] = ok;
                }
            }
        });

        successes
    }

    /// Fetch the `index`-th payload recorded for a key.
    pub fn get(&self, key: &str, index: usize) -> Result<Vec<u8>> {
        let shard = self.shard(key);
        let offset = {
            let idx = shard.index.read();
            let offsets = idx
                .get(key)
                .ok_or_else(|| StoreError::NotFound(format!("key {key:?} not found")))?;
            *offsets.get(index).ok_or_else(|| {
                StoreError::NotFound(format!(
                    "block {index} out of bounds for key {key:?} ({} blocks)",
                    offsets.len()
                ))
            })?
        };
        shard.read_record_at(offset)
    }

    /// Fetch every payload recorded for a key, in append order.
    pub fn get_all(&self, key: &str) -> Result<Vec<Vec<u8>>> {
        let shard = self.shard(key);
        let offsets = {
            let idx = shard.index.read();
            idx.get(key)
                .cloned()
                .ok_or_else(|| StoreError::NotFound(format!("key {key:?} not found")))?
        };
        offsets.iter().map(|&off| shard.read_record_at(off)).collect()
    }

    /// Number of payloads recorded for a key (0 when unknown).
    pub fn key_length(&self, key: &str) -> usize {
        self.shard(key)
            .index
            .read()
            .get(key)
            .map_or(0, |offsets| offsets.len())
    }

    /// Union of keys across all shards.
    pub fn keys(&self) -> Vec<String> {
        let mut keys = Vec::new();
        for shard in &self.shards {
            keys.extend(shard.index.read().keys().cloned());
        }
        keys
    }

    /// Forget a key's offsets and append a tombstone so an index rebuild
    /// does not resurrect it. Payload bytes stay on disk until compaction.
    pub fn delete_key(&self, key: &str) -> Result<()> {
        let shard = self.shard(key);
        if shard.index.write().remove(key).is_none() {
            return Ok(());
        }
        let tombstone = encode_record(key, &[])?;
        shard.write_record(&tombstone, self.sync_mode == SyncMode::Strict)?;
        Ok(())
    }

    /// Copy each shard file under `<data_root>/snapshots/<name>/`, pausing
    /// writes per shard while its bytes are read.
    pub fn snapshot(&self, name: &str) -> Result<PathBuf> {
        let snap_dir = self.data_root.join("snapshots").join(name);
        fs::create_dir_all(&snap_dir)?;
        for shard in &self.shards {
            let bytes = {
                let _write_pause = shard.file.write();
                fs::read(&shard.path)?
            };
            let file_name = shard
                .path
                .file_name()
                .expect("shard path has a file name");
            fs::write(snap_dir.join(file_name), bytes)?;
        }
        Ok(snap_dir)
    }

    /// Persist every shard's offset index beside its data file.
    pub fn save_indexes(&self) -> Result<()> {
        for shard in &self.shards {
            shard.save_index()?;
        }
        Ok(())
    }

    /// Flush offset indexes; called on clean shutdown.
    pub fn close(&self) -> Result<()> {
        self.save_indexes()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn open_log(dir: &TempDir) -> ShardLog {
        ShardLog::open(dir.path(), SyncMode::Strict).unwrap()
    }

    #[test]
    fn test_shard_routing_is_stable() {
        let a = shard_for("doc1");
        assert_eq!(a, shard_for("doc1"));
        assert!(a < SHARD_COUNT);
    }

    #[test]
    fn test_append_get_roundtrip() {
        let dir = TempDir::new().unwrap();
        let log = open_log(&dir);
        log.append("doc1", b"hello").unwrap();
        log.append("doc1", b"world").unwrap();
        assert_eq!(log.get("doc1", 0).unwrap(), b"hello");
        assert_eq!(log.get("doc1", 1).unwrap(), b"world");
        assert_eq!(log.key_length("doc1"), 2);
    }

    #[test]
    fn test_get_missing() {
        let dir = TempDir::new().unwrap();
        let log = open_log(&dir);
        assert!(matches!(
            log.get("nope", 0),
            Err(StoreError::NotFound(_))
        ));
        log.append("doc1", b"x").unwrap();
        assert!(matches!(
            log.get("doc1", 5),
            Err(StoreError::NotFound(_))
        ));
    }

    #[test]
    fn test_key_validation() {
        let dir = TempDir::new().unwrap();
        let log = open_log(&dir);
        assert!(matches!(
            log.append("", b"x"),
            Err(StoreError::InputRange(_))
        ));
        let long_key = "k".repeat(MAX_KEY_LEN + 1);
        assert!(matches!(
            log.append(&long_key, b"x"),
            Err(StoreError::InputRange(_))
        ));
    }

    #[test]
    fn test_large_payload_second_read() {
        let dir = TempDir::new().unwrap();
        let log = open_log(&dir);
        // Incompressible payload much larger than the 4 KiB read-ahead.
        let payload: Vec<u8> = (0..64 * 1024).map(|i| (i * 2654435761u64 >> 13) as u8).collect();
        log.append("big", &payload).unwrap();
        assert_eq!(log.get("big", 0).unwrap(), payload);
    }

    #[test]
    fn test_get_all_preserves_order() {
        let dir = TempDir::new().unwrap();
        let log = open_log(&dir);
        for i in 0..5u8 {
            log.append("seq", &[i]).unwrap();
        }
        let all = log.get_all("seq").unwrap();
        assert_eq!(all, vec![vec![0], vec![1], vec![2], vec![3], vec![4]]);
    }

    #[test]
    fn test_keys_union() {
        let dir = TempDir::new().unwrap();
        let log = open_log(&dir);
        log.append("a", b"1").unwrap();
        log.append("b", b"2").unwrap();
        let mut keys = log.keys();
        keys.sort();
        assert_eq!(keys, vec!["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn test_index_persists_across_reopen() {
        let dir = TempDir::new().unwrap();
        {
            let log = open_log(&dir);
            log.append("doc1", b"hello").unwrap();
            log.close().unwrap();
        }
        let log = open_log(&dir);
        assert_eq!(log.get("doc1", 0).unwrap(), b"hello");
    }

    #[test]
    fn test_rebuild_after_index_loss() {
        let dir = TempDir::new().unwrap();
        {
            let log = open_log(&dir);
            log.append("doc1", b"hello").unwrap();
            log.append("doc2", b"world").unwrap();
            log.close().unwrap();
        }
        // Drop every index file; reopen must rebuild by scanning.
        for entry in fs::read_dir(dir.path().join("data")).unwrap() {
            let path = entry.unwrap().path();
            if path.extension().and_then(|s| s.to_str()) == Some("idx") {
                fs::remove_file(path).unwrap();
            }
        }
        let log = open_log(&dir);
        assert_eq!(log.get("doc1", 0).unwrap(), b"hello");
        assert_eq!(log.get("doc2", 0).unwrap(), b"world");
    }

    #[test]
    fn test_tombstone_honored_by_rebuild() {
        let dir = TempDir::new().unwrap();
        {
            let log = open_log(&dir);
            log.append("gone", b"payload").unwrap();
            log.append("kept", b"payload").unwrap();
            log.delete_key("gone").unwrap();
            log.close().unwrap();
        }
        for entry in fs::read_dir(dir.path().join("data")).unwrap() {
            let path = entry.unwrap().path();
            if path.extension().and_then(|s| s.to_str()) == Some("idx") {
                fs::remove_file(path).unwrap();
            }
        }
        let log = open_log(&dir);
        assert_eq!(log.key_length("gone"), 0);
        assert_eq!(log.get("kept", 0).unwrap(), b"payload");
    }

    #[test]
    fn test_delete_then_reappend() {
        let dir = TempDir::new().unwrap();
        let log = open_log(&dir);
        log.append("k", b"old").unwrap();
        log.delete_key("k").unwrap();
        assert_eq!(log.key_length("k"), 0);
        log.append("k", b"new").unwrap();
        assert_eq!(log.get("k", 0).unwrap(), b"new");
    }

    #[test]
    fn test_batch_append() {
        let dir = TempDir::new().unwrap();
        let log = open_log(&dir);
        let entries: Vec<(String, Vec<u8>)> = (0..20)
            .map(|i| (format!("key{i}"), format!("payload{i}").into_bytes()))
            .collect();
        let ok = log.batch_append(&entries);
        assert!(ok.iter().all(|&b| b));
        for (key, payload) in &entries {
            assert_eq!(&log.get(key, 0).unwrap(), payload);
        }
    }

    #[test]
    fn test_batch_append_marks_invalid_key_failed() {
        let dir = TempDir::new().unwrap();
        let log = open_log(&dir);
        let entries = vec![
            ("good".to_string(), b"a".to_vec()),
            (String::new(), b"b".to_vec()),
            ("also_good".to_string(), b"c".to_vec()),
        ];
        let ok = log.batch_append(&entries);
        assert_eq!(ok, vec![true, false, true]);
        assert_eq!(log.get("good", 0).unwrap(), b"a");
        assert_eq!(log.get("also_good", 0).unwrap(), b"c");
        assert_eq!(log.key_length(""), 0);
    }

    #[test]
    fn test_snapshot_copies_shards() {
        let dir = TempDir::new().unwrap();
        let log = open_log(&dir);
        log.append("doc1", b"hello").unwrap();
        let snap = log.snapshot("backup1").unwrap();
        let copies: Vec<_> = fs::read_dir(&snap).unwrap().collect();
        assert_eq!(copies.len(), SHARD_COUNT as usize);
    }
}
