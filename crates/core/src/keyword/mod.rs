//! Keyword search: trigram inverted index with four match modes
//! (exact, prefix, partial, levenshtein).

/// The token → vector-id postings map and its search modes.
pub mod inverted_index;
/// Trigram windows and edit distance.
pub mod trigram;

pub use inverted_index::InvertedIndex;
