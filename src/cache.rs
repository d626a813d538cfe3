//! Process-local mapping of resolved source ids to target ids.
//!
//! Single writer per run, never persisted, no eviction. A fresh cache must be
//! re-seeded from current playlist membership on every run.

use rustc_hash::FxHashMap;
use serde::Serialize;

use crate::models::TargetId;

/// Hit/miss/insert counters plus derived totals.
#[derive(Default, Debug, Clone, PartialEq, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub inserts: u64,
    pub total_cached: usize,
    pub hit_rate_percent: f64,
}

#[derive(Default, Debug)]
pub struct CorrespondenceCache {
    data: FxHashMap<String, TargetId>,
    hits: u64,
    misses: u64,
    inserts: u64,
}

impl CorrespondenceCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up a correspondence, counting the hit or miss.
    pub fn get(&mut self, source_id: &str) -> Option<TargetId> {
        match self.data.get(source_id) {
            Some(target) => {
                self.hits += 1;
                Some(target.clone())
            }
            None => {
                self.misses += 1;
                None
            }
        }
    }

    /// Check for a correspondence without touching the counters.
    pub fn contains(&self, source_id: &str) -> bool {
        self.data.contains_key(source_id)
    }

    /// Insert or overwrite a correspondence.
    pub fn insert(&mut self, source_id: impl Into<String>, target_id: TargetId) {
        self.data.insert(source_id.into(), target_id);
        self.inserts += 1;
    }

    pub fn batch_insert<I>(&mut self, pairs: I)
    where
        I: IntoIterator<Item = (String, TargetId)>,
    {
        for (source_id, target_id) in pairs {
            self.insert(source_id, target_id);
        }
    }

    /// Returns true if an entry was removed.
    pub fn remove(&mut self, source_id: &str) -> bool {
        self.data.remove(source_id).is_some()
    }

    /// Drop all entries and reset the counters.
    pub fn clear(&mut self) {
        self.data.clear();
        self.hits = 0;
        self.misses = 0;
        self.inserts = 0;
    }

    /// Ids from `source_ids` that have no correspondence yet.
    pub fn missing<'a>(&self, source_ids: &[&'a str]) -> Vec<&'a str> {
        source_ids
            .iter()
            .copied()
            .filter(|id| !self.data.contains_key(*id))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn stats(&self) -> CacheStats {
        let requests = self.hits + self.misses;
        CacheStats {
            hits: self.hits,
            misses: self.misses,
            inserts: self.inserts,
            total_cached: self.data.len(),
            hit_rate_percent: 100.0 * self.hits as f64 / requests.max(1) as f64,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_counts_hits_and_misses() {
        let mut cache = CorrespondenceCache::new();
        cache.insert("a", TargetId::from(1));

        assert_eq!(cache.get("a"), Some(TargetId::from(1)));
        assert_eq!(cache.get("b"), None);
        assert_eq!(cache.get("a"), Some(TargetId::from(1)));

        let stats = cache.stats();
        assert_eq!(stats.hits, 2);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.inserts, 1);
        assert_eq!(stats.total_cached, 1);
        assert!((stats.hit_rate_percent - 200.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_insert_overwrites() {
        let mut cache = CorrespondenceCache::new();
        cache.insert("a", TargetId::from(1));
        cache.insert("a", TargetId::from(2));
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.get("a"), Some(TargetId::from(2)));
        assert_eq!(cache.stats().inserts, 2);
    }

    #[test]
    fn test_contains_does_not_count() {
        let mut cache = CorrespondenceCache::new();
        cache.insert("a", TargetId::from(1));
        assert!(cache.contains("a"));
        assert!(!cache.contains("z"));
        let stats = cache.stats();
        assert_eq!(stats.hits + stats.misses, 0);
        assert_eq!(stats.hit_rate_percent, 0.0);
    }

    #[test]
    fn test_batch_insert_remove_and_missing() {
        let mut cache = CorrespondenceCache::new();
        cache.batch_insert(vec![
            ("a".to_string(), TargetId::from(1)),
            ("b".to_string(), TargetId::from(2)),
        ]);
        assert!(cache.remove("a"));
        assert!(!cache.remove("a"));
        assert_eq!(cache.missing(&["a", "b", "c"]), vec!["a", "c"]);
    }

    #[test]
    fn test_clear_resets_everything() {
        let mut cache = CorrespondenceCache::new();
        cache.insert("a", TargetId::from(1));
        cache.get("a");
        cache.clear();
        assert!(cache.is_empty());
        assert_eq!(cache.stats(), CacheStats::default());
    }
}
