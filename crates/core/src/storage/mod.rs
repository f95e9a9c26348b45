//! Storage layer: collections, the collection manager, the write-ahead
//! log, the repair pass, and the `VectorStore` façade that ties them to
//! the shard log.

/// One collection: HNSW + inverted + forward indexes and key tables.
pub mod collection;
/// Collection registry under `indexes/` with `meta.json` metadata.
pub mod manager;
/// Orphan / missing-id consistency checks.
pub mod repair;
/// The top-level store façade.
pub mod store;
/// CRC-framed, fsynced write-ahead log.
pub mod wal;

pub use collection::Collection;
pub use manager::CollectionManager;
pub use repair::RepairReport;
pub use store::VectorStore;
pub use wal::{ReplayStats, Wal, WalOp, WalRecord};
