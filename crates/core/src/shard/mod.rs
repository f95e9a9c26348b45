//! Sharded append-only payload storage.
//!
//! [`ShardLog`] spreads length-prefixed records over sixteen files selected
//! by BLAKE3 of the key; [`entry`] defines the CRC-checked block record
//! stored as each payload; [`compress`] provides the zstd codec applied to
//! every payload on its way to disk.

/// Single-shot zstd compression helpers.
pub mod compress;
/// Block record codec: 18-byte header, keyword block, CRC32 integrity.
pub mod entry;
/// The sharded log itself: append, batch append, positional reads, index
/// persistence and rebuild.
pub mod log;

pub use entry::{
    bytes_to_vector_id, decode_entry, encode_entry, vector_id_to_bytes, DataType, Entry,
    EntryFlags,
};
pub use log::{shard_for, ShardLog};
