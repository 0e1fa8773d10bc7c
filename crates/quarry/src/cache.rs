//! Bounded LRU caches for compiled plans.
//!
//! Entries are keyed by the parameterized shape's hash. Each entry also
//! stores the serialized shape so that a hash collision between two
//! different shapes is a miss rather than a wrong plan.

use crate::plan::{BatchResponse, QueryPlanNode};

use lru::LruCache;
use std::{num::NonZeroUsize, sync::Arc};

pub const DEFAULT_CAPACITY: usize = 1000;

/// A compiled single-query plan.
#[derive(Debug, Clone)]
pub struct SinglePlan {
    pub plan: Arc<QueryPlanNode>,
    pub placeholder_paths: Vec<String>,
}

/// A compiled batch plan.
#[derive(Debug, Clone)]
pub struct BatchPlan {
    pub response: Arc<BatchResponse>,
    pub placeholder_paths: Vec<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub single_entries: usize,
    pub batch_entries: usize,
    pub hits: u64,
    pub misses: u64,
}

#[derive(Debug)]
pub struct PlanCache {
    single: LruCache<u32, Entry<SinglePlan>>,
    batch: LruCache<u32, Entry<BatchPlan>>,
    hits: u64,
    misses: u64,
}

#[derive(Debug)]
struct Entry<T> {
    shape: String,
    value: T,
}

impl PlanCache {
    pub fn new(single_capacity: usize, batch_capacity: usize) -> PlanCache {
        PlanCache {
            single: LruCache::new(capacity(single_capacity)),
            batch: LruCache::new(capacity(batch_capacity)),
            hits: 0,
            misses: 0,
        }
    }

    /// Looks up a single-query plan. `key` is only called when an entry with
    /// the same hash exists.
    pub fn get_single(&mut self, hash: u32, key: impl FnOnce() -> String) -> Option<SinglePlan> {
        let found = lookup(&mut self.single, hash, key);
        self.record(found.is_some());
        found
    }

    pub fn set_single(&mut self, hash: u32, shape: String, plan: SinglePlan) {
        self.single.put(hash, Entry { shape, value: plan });
    }

    /// Looks up a batch plan. `key` is only called when an entry with the
    /// same hash exists.
    pub fn get_batch(&mut self, hash: u32, key: impl FnOnce() -> String) -> Option<BatchPlan> {
        let found = lookup(&mut self.batch, hash, key);
        self.record(found.is_some());
        found
    }

    pub fn set_batch(&mut self, hash: u32, shape: String, plan: BatchPlan) {
        self.batch.put(hash, Entry { shape, value: plan });
    }

    pub fn single_len(&self) -> usize {
        self.single.len()
    }

    pub fn batch_len(&self) -> usize {
        self.batch.len()
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            single_entries: self.single.len(),
            batch_entries: self.batch.len(),
            hits: self.hits,
            misses: self.misses,
        }
    }

    pub fn clear(&mut self) {
        self.single.clear();
        self.batch.clear();
    }

    fn record(&mut self, hit: bool) {
        if hit {
            self.hits += 1;
        } else {
            self.misses += 1;
        }
    }
}

impl Default for PlanCache {
    fn default() -> Self {
        PlanCache::new(DEFAULT_CAPACITY, DEFAULT_CAPACITY)
    }
}

fn lookup<T: Clone>(
    entries: &mut LruCache<u32, Entry<T>>,
    hash: u32,
    key: impl FnOnce() -> String,
) -> Option<T> {
    let entry = entries.get(&hash)?;
    (entry.shape == key()).then(|| entry.value.clone())
}

fn capacity(capacity: usize) -> NonZeroUsize {
    NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN)
}
