//! Write-ahead log for crash recovery.
//!
//! Every mutation is durably recorded before any in-memory index changes.
//! Each record is framed as `[u32 length BE][u32 CRC32 BE][bincode payload]`
//! and fsynced before the logging call returns. Replay reads records until
//! the first truncated or corrupt frame and hands them back in order;
//! checkpoint truncates the file once collection state has been flushed.

use std::fs::{File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::error::{Result, StoreError};

/// Operation discriminant for a WAL record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WalOp {
    Add,
    Delete,
}

/// One logged mutation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WalRecord {
    pub timestamp_nanos: i64,
    pub op: WalOp,
    pub collection: String,
    pub key: String,
    pub vector_id: u64,
    pub vector: Vec<f32>,
    pub keywords: Vec<String>,
    pub data: Vec<u8>,
}

/// Diagnostic counters from a replay pass.
#[derive(Debug, Default)]
pub struct ReplayStats {
    /// Records successfully decoded.
    pub success: usize,
    /// Whether replay stopped at a truncated trailing record.
    pub truncated: bool,
    /// Whether replay stopped at a CRC mismatch.
    pub crc_error: bool,
}

/// Append-only write-ahead log with CRC-checked frames.
pub struct Wal {
    writer: Mutex<BufWriter<File>>,
    path: PathBuf,
}

fn now_nanos() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as i64)
        .unwrap_or(0)
}

fn frame(record: &WalRecord) -> Result<Vec<u8>> {
    let bytes = bincode::serialize(record)
        .map_err(|e| StoreError::Format(format!("WAL record serialize failed: {e}")))?;
    let mut framed = Vec::with_capacity(8 + bytes.len());
    framed.extend_from_slice(&(bytes.len() as u32).to_be_bytes());
    framed.extend_from_slice(&crc32fast::hash(&bytes).to_be_bytes());
    framed.extend_from_slice(&bytes);
    Ok(framed)
}

impl Wal {
    /// Open or create the WAL file in append mode.
    pub fn open(path: &Path) -> Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            writer: Mutex::new(BufWriter::new(file)),
            path: path.to_path_buf(),
        })
    }

    /// Log a block append. fsyncs before returning.
    pub fn log_add(
        &self,
        collection: &str,
        key: &str,
        vector: &[f32],
        keywords: &[String],
        data: &[u8],
    ) -> Result<()> {
        self.append(&WalRecord {
            timestamp_nanos: now_nanos(),
            op: WalOp::Add,
            collection: collection.to_string(),
            key: key.to_string(),
            vector_id: 0,
            vector: vector.to_vec(),
            keywords: keywords.to_vec(),
            data: data.to_vec(),
        })
    }

    /// Log a key deletion. fsyncs before returning.
    pub fn log_delete(&self, collection: &str, key: &str) -> Result<()> {
        self.append(&WalRecord {
            timestamp_nanos: now_nanos(),
            op: WalOp::Delete,
            collection: collection.to_string(),
            key: key.to_string(),
            vector_id: 0,
            vector: Vec::new(),
            keywords: Vec::new(),
            data: Vec::new(),
        })
    }

    fn append(&self, record: &WalRecord) -> Result<()> {
        let framed = frame(record)?;
        let mut writer = self.writer.lock();
        writer.write_all(&framed)?;
        writer.flush()?;
        writer.get_mut().sync_all()?;
        Ok(())
    }

    /// Read every complete record from the start of the log.
    ///
    /// Stops silently at a truncated trailing record or a CRC mismatch,
    /// returning everything decoded up to that point.
    pub fn replay(&self) -> Result<(Vec<WalRecord>, ReplayStats)> {
        let _writer = self.writer.lock();
        let file = File::open(&self.path)?;
        let mut reader = BufReader::new(file);
        let mut records = Vec::new();
        let mut stats = ReplayStats::default();
        let mut header = [0u8; 8];

        loop {
            match reader.read_exact(&mut header) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => break,
                Err(e) => return Err(e.into()),
            }
            let len = u32::from_be_bytes([header[0], header[1], header[2], header[3]]) as usize;
            let stored_crc = u32::from_be_bytes([header[4], header[5], header[6], header[7]]);

            let mut payload = vec![0u8; len];
            match reader.read_exact(&mut payload) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
                    tracing::warn!("WAL truncated mid-record, stopping replay");
                    stats.truncated = true;
                    break;
                }
                Err(e) => return Err(e.into()),
            }

            if crc32fast::hash(&payload) != stored_crc {
                tracing::warn!("WAL record CRC mismatch, stopping replay");
                stats.crc_error = true;
                break;
            }

            match bincode::deserialize::<WalRecord>(&payload) {
                Ok(record) => {
                    records.push(record);
                    stats.success += 1;
                }
                Err(e) => {
                    tracing::warn!("WAL record deserialize failed, stopping replay: {e}");
                    stats.crc_error = true;
                    break;
                }
            }
        }

        Ok((records, stats))
    }

    /// Truncate the log and reopen it in append mode. Called after all
    /// collection state has been flushed.
    pub fn checkpoint(&self) -> Result<()> {
        let mut writer = self.writer.lock();
        let truncated = OpenOptions::new()
            .write(true)
            .truncate(true)
            .open(&self.path)?;
        truncated.sync_all()?;
        *writer = BufWriter::new(OpenOptions::new().create(true).append(true).open(&self.path)?);
        Ok(())
    }

    /// Current size of the log file in bytes.
    pub fn size(&self) -> Result<u64> {
        Ok(std::fs::metadata(&self.path)?.len())
    }
}
