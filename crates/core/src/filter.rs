//! Vector-id sets used to narrow searches.
//!
//! An [`IdFilter`] is built from keyword postings and/or per-key id lists,
//! intersected, and handed to the HNSW search as a candidate whitelist.

use std::collections::HashSet;

/// A set of vector ids with the set algebra search filtering needs.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IdFilter {
    ids: HashSet<u64>,
}

impl IdFilter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a filter from any id iterator.
    pub fn from_ids(ids: impl IntoIterator<Item = u64>) -> Self {
        Self {
            ids: ids.into_iter().collect(),
        }
    }

    pub fn insert(&mut self, id: u64) {
        self.ids.insert(id);
    }

    pub fn contains(&self, id: u64) -> bool {
        self.ids.contains(&id)
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Ids present in both sets.
    pub fn intersect(&self, other: &IdFilter) -> IdFilter {
        // Walk the smaller set.
        let (small, large) = if self.ids.len() <= other.ids.len() {
            (&self.ids, &other.ids)
        } else {
            (&other.ids, &self.ids)
        };
        Self {
            ids: small.iter().filter(|id| large.contains(id)).copied().collect(),
        }
    }

    /// Ids present in either set.
    pub fn union(&self, other: &IdFilter) -> IdFilter {
        Self {
            ids: self.ids.union(&other.ids).copied().collect(),
        }
    }

    /// All ids in ascending order.
    pub fn to_sorted_vec(&self) -> Vec<u64> {
        let mut out: Vec<u64> = self.ids.iter().copied().collect();
        out.sort_unstable();
        out
    }
}

impl FromIterator<u64> for IdFilter {
    fn from_iter<T: IntoIterator<Item = u64>>(iter: T) -> Self {
        Self::from_ids(iter)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_contains() {
        let mut f = IdFilter::new();
        assert!(f.is_empty());
        f.insert(7);
        assert!(f.contains(7));
        assert!(!f.contains(8));
        assert_eq!(f.len(), 1);
    }

    #[test]
    fn test_intersect() {
        let a = IdFilter::from_ids([1, 2, 3, 4]);
        let b = IdFilter::from_ids([3, 4, 5]);
        assert_eq!(a.intersect(&b).to_sorted_vec(), vec![3, 4]);
        // Symmetric regardless of which side is smaller
        assert_eq!(b.intersect(&a).to_sorted_vec(), vec![3, 4]);
    }

    #[test]
    fn test_union() {
        let a = IdFilter::from_ids([1, 2]);
        let b = IdFilter::from_ids([2, 3]);
        assert_eq!(a.union(&b).to_sorted_vec(), vec![1, 2, 3]);
    }

    #[test]
    fn test_intersect_with_empty() {
        let a = IdFilter::from_ids([1, 2]);
        let empty = IdFilter::new();
        assert!(a.intersect(&empty).is_empty());
    }
}
