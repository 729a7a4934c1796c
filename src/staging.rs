//! Resource staging cache
//!
//! Holds the pre-image of a record between the Before and After hooks of an
//! update. `stage` overwrites, `take_staged` removes. Both go through a
//! sharded map, so distinct ids never contend and calls for one id are
//! linearized by its shard lock.

use dashmap::DashMap;
use tracing::trace;

/// Staged pre-images keyed by record id
pub struct StagingCache<T> {
    entries: DashMap<String, T>,
}

impl<T> StagingCache<T> {
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
        }
    }

    /// Store `record` under `id`, replacing any earlier entry
    pub fn stage(&self, id: &str, record: T) {
        if self.entries.insert(id.to_string(), record).is_some() {
            trace!(id = %id, "Replaced staged record");
        }
    }

    /// Remove and return the record staged under `id`
    pub fn take_staged(&self, id: &str) -> Option<T> {
        self.entries.remove(id).map(|(_, record)| record)
    }

    /// Number of staged records awaiting their After call
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<T> Default for StagingCache<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_take_removes_entry() {
        let cache = StagingCache::new();
        cache.stage("p1", 1);
        assert_eq!(cache.take_staged("p1"), Some(1));
        assert_eq!(cache.take_staged("p1"), None);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_last_stage_wins() {
        let cache = StagingCache::new();
        cache.stage("p1", "first");
        cache.stage("p1", "second");
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.take_staged("p1"), Some("second"));
    }

    #[test]
    fn test_missing_key_is_none() {
        let cache: StagingCache<u8> = StagingCache::default();
        assert_eq!(cache.take_staged("nobody"), None);
    }

    #[test]
    fn test_concurrent_takes_consume_once() {
        let cache = StagingCache::new();
        for i in 0..64 {
            cache.stage(&format!("id-{}", i), i);
        }

        let taken = AtomicUsize::new(0);
        std::thread::scope(|s| {
            for _ in 0..8 {
                s.spawn(|| {
                    for i in 0..64 {
                        if cache.take_staged(&format!("id-{}", i)).is_some() {
                            taken.fetch_add(1, Ordering::SeqCst);
                        }
                    }
                });
            }
        });

        assert_eq!(taken.load(Ordering::SeqCst), 64);
        assert!(cache.is_empty());
    }
}
