//! Error types shared across the storage engine.
//!
//! Every fallible operation in this crate returns [`Result`]. Variants map
//! one-to-one onto the error kinds surfaced in response envelopes; the
//! dispatcher turns them into `success = false` plus a message.

use std::io;
use thiserror::Error;

/// Errors raised by the storage engine.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Input outside accepted bounds (key length, keyword shape, empty
    /// collection name, zero dimensions).
    #[error("invalid input: {0}")]
    InputRange(String),

    /// Missing collection, key, block index, or vector id.
    #[error("not found: {0}")]
    NotFound(String),

    /// Duplicate collection name or duplicate HNSW vector id.
    #[error("already exists: {0}")]
    AlreadyExists(String),

    /// Vector length does not match the collection's dimensions.
    #[error("dimension mismatch: expected {expected}, got {got}")]
    DimensionMismatch { expected: u32, got: usize },

    /// CRC mismatch, impossible declared lengths, or a truncated record.
    #[error("corrupt record: {0}")]
    Corruption(String),

    /// Unrecognized on-disk format (bad magic, unknown metric byte,
    /// mismatched index metadata).
    #[error("format error: {0}")]
    Format(String),

    /// Compressed payload exceeds the 32-bit length field.
    #[error("compression error: {0}")]
    Compression(String),

    /// Underlying file or disk failure.
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),

    /// Operation is declared on the wire but intentionally unsupported.
    #[error("operation not implemented: {0}")]
    NotImplemented(&'static str),
}

/// Result type alias used throughout the crate.
pub type Result<T> = std::result::Result<T, StoreError>;
