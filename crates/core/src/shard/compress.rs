//! Single-shot zstd compression for shard payloads.

use crate::error::{Result, StoreError};

/// Default zstd compression level; balances ratio against append latency.
const ZSTD_LEVEL: i32 = 3;

/// Compress a payload buffer.
pub fn compress(data: &[u8]) -> Result<Vec<u8>> {
    zstd::encode_all(data, ZSTD_LEVEL)
        .map_err(|e| StoreError::Compression(format!("zstd encode failed: {e}")))
}

/// Decompress a payload buffer produced by [`compress`].
pub fn decompress(data: &[u8]) -> Result<Vec<u8>> {
    zstd::decode_all(data)
        .map_err(|e| StoreError::Corruption(format!("zstd decode failed: {e}")))
}
