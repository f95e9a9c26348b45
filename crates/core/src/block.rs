//! Core value types: blocks, collection configuration, search filters,
//! and search results.
//!
//! A `Block` is the atomic unit of user data: primary bytes, an optional
//! fixed-dimension vector, and a set of keyword tokens. Keys name ordered
//! sequences of blocks inside a collection.

use serde::{Deserialize, Serialize};

use crate::error::{Result, StoreError};
use crate::hnsw::DistanceMetric;

/// A single block of user data.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Block {
    /// Primary payload bytes, stored compressed in the shard log.
    pub primary: Vec<u8>,
    /// Embedding vector; empty when the block carries no vector.
    pub vector: Vec<f32>,
    /// Keyword tokens, normalized to lowercase on write.
    pub keywords: Vec<String>,
}

impl Block {
    /// Convenience constructor for a payload-only block.
    pub fn from_primary(primary: impl Into<Vec<u8>>) -> Self {
        Self {
            primary: primary.into(),
            ..Self::default()
        }
    }
}

/// Immutable configuration of a collection, persisted as `meta.json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectionConfig {
    pub name: String,
    pub dimensions: u32,
    pub metric: DistanceMetric,
}

impl CollectionConfig {
    /// Validate name, dimensions, and metric at creation time.
    pub fn validate(&self) -> Result<()> {
        if self.name.is_empty() {
            return Err(StoreError::InputRange(
                "collection name cannot be empty".into(),
            ));
        }
        if self.dimensions == 0 {
            return Err(StoreError::InputRange(
                "dimensions must be greater than 0".into(),
            ));
        }
        Ok(())
    }
}

/// Matching mode for keyword lookups against the inverted index.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeywordMode {
    /// Every query keyword must match an indexed keyword exactly.
    #[default]
    Exact,
    /// Indexed keywords starting with the query prefix match.
    Prefix,
    /// Indexed keywords containing the query substring match (via trigrams).
    Partial,
    /// Indexed keywords within an edit distance of the query match.
    Levenshtein,
}

/// Filter narrowing a vector search to specific keys and/or keywords.
///
/// When both parts are present, the candidate set is their intersection.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SearchFilter {
    /// Limit results to blocks under these keys (empty = no key filter).
    pub keys: Vec<String>,
    /// Limit results to blocks carrying these keywords.
    pub keywords: Vec<String>,
    /// How `keywords` are matched.
    pub keyword_mode: KeywordMode,
    /// Maximum edit distance for [`KeywordMode::Levenshtein`].
    pub max_distance: u32,
}

impl SearchFilter {
    /// True when the filter constrains nothing.
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty() && self.keywords.is_empty()
    }
}

/// One search result: the block's address, its distance, and (when
/// hydrated by the store) the decoded block itself.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchHit {
    pub key: String,
    pub index: u32,
    pub distance: f32,
    pub block: Option<Block>,
}

/// Durability policy for shard log appends.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncMode {
    /// fsync after every append.
    #[default]
    Strict,
    /// Leave flushing to the OS page cache.
    Async,
}

/// Runtime configuration for opening a store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Advisory payload size hint carried on the wire; not enforced by
    /// the engine.
    pub payload_size: u32,
    /// Root directory for shard files, indexes, and the WAL.
    pub data_path: String,
    /// Durability policy for shard appends.
    pub sync_mode: SyncMode,
}

impl StoreConfig {
    pub fn new(data_path: impl Into<String>) -> Self {
        Self {
            payload_size: 1024,
            data_path: data_path.into(),
            sync_mode: SyncMode::Strict,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_collection_config_validation() {
        let ok = CollectionConfig {
            name: "docs".into(),
            dimensions: 4,
            metric: DistanceMetric::L2,
        };
        assert!(ok.validate().is_ok());

        let empty_name = CollectionConfig {
            name: "".into(),
            ..ok.clone()
        };
        assert!(matches!(
            empty_name.validate(),
            Err(StoreError::InputRange(_))
        ));

        let zero_dims = CollectionConfig {
            dimensions: 0,
            ..ok
        };
        assert!(matches!(
            zero_dims.validate(),
            Err(StoreError::InputRange(_))
        ));
    }

    #[test]
    fn test_filter_is_empty() {
        assert!(SearchFilter::default().is_empty());
        let with_keys = SearchFilter {
            keys: vec!["a".into()],
            ..Default::default()
        };
        assert!(!with_keys.is_empty());
    }

    #[test]
    fn test_keyword_mode_serde_names() {
        let json = serde_json::to_string(&KeywordMode::Levenshtein).unwrap();
        assert_eq!(json, "\"levenshtein\"");
        let mode: KeywordMode = serde_json::from_str("\"prefix\"").unwrap();
        assert_eq!(mode, KeywordMode::Prefix);
    }
}
