//! Global configuration constants for waddledb.
//!
//! All tuning parameters, input validation limits, and server defaults are
//! defined here. These are compile-time constants; runtime configuration is
//! handled via [`StoreConfig`](crate::block::StoreConfig) and CLI flags.

/// Number of shard files the append-only log is partitioned into.
///
/// Fixed: shard assignment is `BigEndianU32(BLAKE3(key)[0..4]) % SHARD_COUNT`
/// and changing it invalidates every existing data directory.
pub const SHARD_COUNT: u32 = 16;

/// Maximum key length in bytes accepted by the shard log.
pub const MAX_KEY_LEN: usize = 1024;

/// Maximum key length representable in the entry header (u16 field).
pub const ENTRY_MAX_KEY_LEN: usize = 65_535;

/// Maximum length of a single keyword in bytes.
pub const MAX_KEYWORD_LEN: usize = 128;

/// Maximum size of the serialized keywords block in an entry (u16 field).
pub const MAX_KEYWORDS_BLOCK_LEN: usize = 65_535;

/// Speculative read size for shard record fetches.
///
/// One read of this size covers the record header plus most payloads in a
/// single syscall; larger payloads fall back to a second positioned read.
pub const SHARD_READ_AHEAD: usize = 4096;

/// Number of bidirectional links per HNSW node.
pub const HNSW_M: usize = 16;

/// Candidate list width during HNSW construction.
pub const HNSW_EF_CONSTRUCTION: usize = 200;

/// Candidate list width during HNSW search.
pub const HNSW_EF_SEARCH: usize = 100;

/// Hard cap on HNSW level assignment.
pub const HNSW_MAX_LEVEL: usize = 32;

/// Multiplier applied to `top_k` when a filter narrows the candidate set.
///
/// Filtered searches widen the layer-0 candidate list to `k * 10` (capped
/// at the node count) so that post-filtering still yields enough hits.
pub const HNSW_FILTER_WIDEN: usize = 10;

/// Depth of the dispatcher's bounded request queue.
pub const DISPATCH_QUEUE_DEPTH: usize = 100;

/// Default TCP port for the server binary.
pub const DEFAULT_PORT: u16 = 6969;

/// Default data directory for the server binary.
pub const DEFAULT_DATA_DIR: &str = "./waddledb_db";
