//! Inverted keyword index: token → vector-id postings.
//!
//! Two token namespaces share one map: raw trigrams over each keyword, and
//! full keywords under a `"kw:"` prefix. The four search modes intersect
//! per-term results across the query; an empty query returns `None`.
//!
//! Postings may retain stale ids after a key is deleted; callers filter
//! results against the forward index. This is the documented semantic.

use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;

use parking_lot::RwLock;

use crate::block::KeywordMode;
use crate::error::{Result, StoreError};
use crate::filter::IdFilter;
use crate::keyword::trigram::{levenshtein, trigrams};

/// Prefix marking full-keyword postings in the shared token map.
const KW_PREFIX: &str = "kw:";

/// Trigram-based inverted index with full-keyword postings.
pub struct InvertedIndex {
    index: RwLock<HashMap<String, Vec<u64>>>,
    file_path: PathBuf,
}

fn push_unique(list: &mut Vec<u64>, id: u64) {
    if !list.contains(&id) {
        list.push(id);
    }
}

impl InvertedIndex {
    pub fn new(file_path: impl Into<PathBuf>) -> Self {
        Self {
            index: RwLock::new(HashMap::new()),
            file_path: file_path.into(),
        }
    }

    /// Index keywords for a vector id: every trigram plus the full keyword.
    pub fn add(&self, keywords: &[String], vector_id: u64) {
        let mut index = self.index.write();
        for kw in keywords {
            let kw = kw.to_lowercase();
            for tg in trigrams(&kw) {
                push_unique(index.entry(tg).or_default(), vector_id);
            }
            push_unique(
                index.entry(format!("{KW_PREFIX}{kw}")).or_default(),
                vector_id,
            );
        }
    }

    /// Remove a vector id from the postings of the given keywords.
    ///
    /// `delete_key` does not call this (stale ids are tolerated); it exists
    /// for compaction and targeted cleanup.
    pub fn remove(&self, keywords: &[String], vector_id: u64) {
        let mut index = self.index.write();
        for kw in keywords {
            let kw = kw.to_lowercase();
            for tg in trigrams(&kw) {
                if let Some(list) = index.get_mut(&tg) {
                    list.retain(|&id| id != vector_id);
                }
            }
            if let Some(list) = index.get_mut(&format!("{KW_PREFIX}{kw}")) {
                list.retain(|&id| id != vector_id);
            }
        }
        index.retain(|_, list| !list.is_empty());
    }

    /// Run a search in the requested mode. `None` means "no keywords given";
    /// an empty filter means "keywords given, nothing matched".
    pub fn search(
        &self,
        keywords: &[String],
        mode: KeywordMode,
        max_distance: u32,
    ) -> Option<IdFilter> {
        if keywords.is_empty() {
            return None;
        }
        match mode {
            KeywordMode::Exact => self.search_exact(keywords),
            KeywordMode::Prefix => self.search_prefix(keywords),
            KeywordMode::Partial => self.search_partial(keywords),
            KeywordMode::Levenshtein => self.search_levenshtein(keywords, max_distance),
        }
    }

    /// Intersect full-keyword postings across all query keywords.
    fn search_exact(&self, keywords: &[String]) -> Option<IdFilter> {
        let index = self.index.read();
        let mut result: Option<IdFilter> = None;
        for kw in keywords {
            let kw = kw.to_lowercase();
            let matches = index
                .get(&format!("{KW_PREFIX}{kw}"))
                .map(|ids| IdFilter::from_ids(ids.iter().copied()))
                .unwrap_or_default();
            result = Some(match result {
                None => matches,
                Some(acc) => acc.intersect(&matches),
            });
        }
        result
    }

    /// Union postings of all keywords starting with each prefix, then
    /// intersect across prefixes.
    fn search_prefix(&self, prefixes: &[String]) -> Option<IdFilter> {
        let index = self.index.read();
        let mut result: Option<IdFilter> = None;
        for prefix in prefixes {
            let prefix = prefix.to_lowercase();
            let mut candidates = IdFilter::new();
            for (token, ids) in index.iter() {
                if let Some(keyword) = token.strip_prefix(KW_PREFIX) {
                    if keyword.starts_with(&prefix) {
                        for &id in ids {
                            candidates.insert(id);
                        }
                    }
                }
            }
            result = Some(match result {
                None => candidates,
                Some(acc) => acc.intersect(&candidates),
            });
        }
        result
    }

    /// Intersect trigram postings per substring, then intersect across
    /// query terms.
    fn search_partial(&self, substrings: &[String]) -> Option<IdFilter> {
        let index = self.index.read();
        let mut result: Option<IdFilter> = None;
        for substr in substrings {
            let substr = substr.to_lowercase();
            let mut candidates: Option<IdFilter> = None;
            for tg in trigrams(&substr) {
                let matches = index
                    .get(&tg)
                    .map(|ids| IdFilter::from_ids(ids.iter().copied()))
                    .unwrap_or_default();
                candidates = Some(match candidates {
                    None => matches,
                    Some(acc) => acc.intersect(&matches),
                });
            }
            let candidates = candidates.unwrap_or_default();
            result = Some(match result {
                None => candidates,
                Some(acc) => acc.intersect(&candidates),
            });
        }
        result
    }

    /// Union postings of indexed keywords within edit distance of each
    /// query keyword, then intersect across query keywords.
    fn search_levenshtein(&self, keywords: &[String], max_distance: u32) -> Option<IdFilter> {
        let index = self.index.read();
        let mut result: Option<IdFilter> = None;
        for query in keywords {
            let query = query.to_lowercase();
            let mut candidates = IdFilter::new();
            for (token, ids) in index.iter() {
                if let Some(keyword) = token.strip_prefix(KW_PREFIX) {
                    if levenshtein(&query, keyword) <= max_distance as usize {
                        for &id in ids {
                            candidates.insert(id);
                        }
                    }
                }
            }
            result = Some(match result {
                None => candidates,
                Some(acc) => acc.intersect(&candidates),
            });
        }
        result
    }

    /// Number of distinct tokens (trigrams and full keywords) indexed.
    pub fn token_count(&self) -> usize {
        self.index.read().len()
    }

    /// Serialize the token map as one blob, written atomically.
    pub fn save(&self) -> Result<()> {
        let index = self.index.read();
        let bytes = bincode::serialize(&*index)
            .map_err(|e| StoreError::Format(format!("inverted index serialize failed: {e}")))?;
        let tmp = self.file_path.with_extension("inv.tmp");
        fs::write(&tmp, &bytes)?;
        fs::rename(&tmp, &self.file_path)?;
        Ok(())
    }

    /// Load the token map; a missing file leaves the index empty.
    pub fn load(&self) -> Result<()> {
        let bytes = match fs::read(&self.file_path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(e.into()),
        };
        let loaded: HashMap<String, Vec<u64>> = bincode::deserialize(&bytes)
            .map_err(|e| StoreError::Format(format!("inverted index deserialize failed: {e}")))?;
        *self.index.write() = loaded;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn index_in(dir: &TempDir) -> InvertedIndex {
        InvertedIndex::new(dir.path().join("keywords.inv"))
    }

    fn kws(words: &[&str]) -> Vec<String> {
        words.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_exact_intersection() {
        let dir = TempDir::new().unwrap();
        let idx = index_in(&dir);
        idx.add(&kws(&["finance"]), 1);
        idx.add(&kws(&["finance", "report"]), 2);
        idx.add(&kws(&["report"]), 3);

        let hits = idx
            .search(&kws(&["finance", "report"]), KeywordMode::Exact, 0)
            .unwrap();
        assert_eq!(hits.to_sorted_vec(), vec![2]);
    }

    #[test]
    fn test_exact_no_match_is_empty_not_none() {
        let dir = TempDir::new().unwrap();
        let idx = index_in(&dir);
        idx.add(&kws(&["finance"]), 1);
        let hits = idx
            .search(&kws(&["missing"]), KeywordMode::Exact, 0)
            .unwrap();
        assert!(hits.is_empty());
    }

    #[test]
    fn test_empty_query_is_none() {
        let dir = TempDir::new().unwrap();
        let idx = index_in(&dir);
        assert!(idx.search(&[], KeywordMode::Exact, 0).is_none());
    }

    #[test]
    fn test_prefix_union_then_intersection() {
        let dir = TempDir::new().unwrap();
        let idx = index_in(&dir);
        idx.add(&kws(&["finance"]), 1);
        idx.add(&kws(&["finland"]), 2);
        idx.add(&kws(&["report"]), 3);
        idx.add(&kws(&["finance", "report"]), 4);

        let hits = idx.search(&kws(&["fin"]), KeywordMode::Prefix, 0).unwrap();
        assert_eq!(hits.to_sorted_vec(), vec![1, 2, 4]);

        let hits = idx
            .search(&kws(&["fin", "rep"]), KeywordMode::Prefix, 0)
            .unwrap();
        assert_eq!(hits.to_sorted_vec(), vec![4]);
    }

    #[test]
    fn test_partial_matches_substring() {
        let dir = TempDir::new().unwrap();
        let idx = index_in(&dir);
        idx.add(&kws(&["financial"]), 1);
        idx.add(&kws(&["infinite"]), 2);

        // "nanc" appears only inside "financial"
        let hits = idx
            .search(&kws(&["nanc"]), KeywordMode::Partial, 0)
            .unwrap();
        assert_eq!(hits.to_sorted_vec(), vec![1]);

        // "fin" is a trigram of both
        let hits = idx.search(&kws(&["fin"]), KeywordMode::Partial, 0).unwrap();
        assert_eq!(hits.to_sorted_vec(), vec![1, 2]);
    }

    #[test]
    fn test_levenshtein_within_distance() {
        let dir = TempDir::new().unwrap();
        let idx = index_in(&dir);
        idx.add(&kws(&["finance"]), 1);
        idx.add(&kws(&["finances"]), 2);
        idx.add(&kws(&["banking"]), 3);

        let hits = idx
            .search(&kws(&["finance"]), KeywordMode::Levenshtein, 1)
            .unwrap();
        assert_eq!(hits.to_sorted_vec(), vec![1, 2]);

        let hits = idx
            .search(&kws(&["finance"]), KeywordMode::Levenshtein, 0)
            .unwrap();
        assert_eq!(hits.to_sorted_vec(), vec![1]);
    }

    #[test]
    fn test_add_is_idempotent_per_id() {
        let dir = TempDir::new().unwrap();
        let idx = index_in(&dir);
        idx.add(&kws(&["dup"]), 5);
        idx.add(&kws(&["dup"]), 5);
        let hits = idx.search(&kws(&["dup"]), KeywordMode::Exact, 0).unwrap();
        assert_eq!(hits.to_sorted_vec(), vec![5]);
    }

    #[test]
    fn test_remove() {
        let dir = TempDir::new().unwrap();
        let idx = index_in(&dir);
        idx.add(&kws(&["gone"]), 1);
        idx.add(&kws(&["gone"]), 2);
        idx.remove(&kws(&["gone"]), 1);
        let hits = idx.search(&kws(&["gone"]), KeywordMode::Exact, 0).unwrap();
        assert_eq!(hits.to_sorted_vec(), vec![2]);
    }

    #[test]
    fn test_save_load_roundtrip() {
        let dir = TempDir::new().unwrap();
        let idx = index_in(&dir);
        idx.add(&kws(&["persisted"]), 9);
        idx.save().unwrap();

        let reloaded = index_in(&dir);
        reloaded.load().unwrap();
        let hits = reloaded
            .search(&kws(&["persisted"]), KeywordMode::Exact, 0)
            .unwrap();
        assert_eq!(hits.to_sorted_vec(), vec![9]);
    }

    #[test]
    fn test_load_missing_file_is_empty() {
        let dir = TempDir::new().unwrap();
        let idx = index_in(&dir);
        idx.load().unwrap();
        assert_eq!(idx.token_count(), 0);
    }

    #[test]
    fn test_uppercase_query_normalized() {
        let dir = TempDir::new().unwrap();
        let idx = index_in(&dir);
        idx.add(&kws(&["finance"]), 1);
        let hits = idx
            .search(&kws(&["FINANCE"]), KeywordMode::Exact, 0)
            .unwrap();
        assert_eq!(hits.to_sorted_vec(), vec![1]);
    }
}
