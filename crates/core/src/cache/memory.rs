//! L1 volatile tier: byte-bounded strict LRU.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use lru::LruCache;
use parking_lot::Mutex;

use super::entry::CacheEntry;
use super::key::CacheKey;
use crate::Error;

struct LruState {
    entries: LruCache<CacheKey, Arc<CacheEntry>>,
    used_bytes: usize,
}

impl LruState {
    fn remove(&mut self, key: &CacheKey) -> Option<Arc<CacheEntry>> {
        let removed = self.entries.pop(key)?;
        self.used_bytes -= removed.size_bytes;
        Some(removed)
    }

    fn insert(&mut self, entry: Arc<CacheEntry>, capacity: usize) -> usize {
        self.used_bytes += entry.size_bytes;
        if let Some(old) = self.entries.put(entry.key.clone(), entry) {
            self.used_bytes -= old.size_bytes;
        }
        self.evict_until(capacity)
    }

    fn evict_until(&mut self, capacity: usize) -> usize {
        let mut evicted = 0;
        while self.used_bytes > capacity {
            let Some((_, victim)) = self.entries.pop_lru() else {
                break;
            };
            self.used_bytes -= victim.size_bytes;
            evicted += 1;
        }
        evicted
    }
}

/// In-process LRU store bounded by total entry bytes.
///
/// A single mutex guards both recency order and the byte counter, so the
/// budget is exact and eviction order is globally least-recently-used.
pub struct MemoryTier {
    capacity_bytes: usize,
    state: Mutex<LruState>,
}

impl std::fmt::Debug for MemoryTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryTier")
            .field("capacity_bytes", &self.capacity_bytes)
            .field("used_bytes", &self.used_bytes())
            .finish()
    }
}

impl MemoryTier {
    pub fn new(capacity_bytes: usize) -> Self {
        Self {
            capacity_bytes,
            state: Mutex::new(LruState { entries: LruCache::unbounded(), used_bytes: 0 }),
        }
    }

    pub fn capacity_bytes(&self) -> usize {
        self.capacity_bytes
    }

    /// Look up a live entry and mark it most recently used.
    ///
    /// Entries past their expiry are dropped and reported as absent.
    pub fn get(&self, key: &CacheKey, now: DateTime<Utc>) -> Option<Arc<CacheEntry>> {
        let mut state = self.state.lock();
        let entry = state.entries.get(key)?.clone();
        if entry.is_expired_at(now) {
            state.remove(key);
            return None;
        }
        Some(entry)
    }

    /// Insert or replace an entry, returning how many entries were evicted.
    ///
    /// # Errors
    ///
    /// Returns `Error::CapacityExceeded` if the entry alone exceeds the budget.
    pub fn put(&self, entry: Arc<CacheEntry>) -> Result<usize, Error> {
        self.check_size(&entry)?;
        let mut state = self.state.lock();
        Ok(state.insert(entry, self.capacity_bytes))
    }

    /// Insert only if `admit` still holds while the tier lock is held.
    ///
    /// Returns `Ok(None)` when the insert was refused, otherwise the number
    /// of evictions it caused.
    pub fn insert_if(&self, entry: Arc<CacheEntry>, admit: impl FnOnce() -> bool) -> Result<Option<usize>, Error> {
        self.check_size(&entry)?;
        let mut state = self.state.lock();
        if !admit() {
            return Ok(None);
        }
        Ok(Some(state.insert(entry, self.capacity_bytes)))
    }

    pub fn evict_lru_until_under_capacity(&self) -> usize {
        self.state.lock().evict_until(self.capacity_bytes)
    }

    pub fn remove(&self, key: &CacheKey) -> Option<Arc<CacheEntry>> {
        self.state.lock().remove(key)
    }

    /// Remove every entry whose origin host equals `domain`.
    pub fn remove_domain(&self, domain: &str) -> usize {
        self.remove_matching(|e| e.domain == domain)
    }

    pub fn purge_expired(&self, now: DateTime<Utc>) -> usize {
        self.remove_matching(|e| e.is_expired_at(now))
    }

    pub fn remove_matching(&self, doomed: impl Fn(&CacheEntry) -> bool) -> usize {
        let mut state = self.state.lock();
        let keys: Vec<CacheKey> = state
            .entries
            .iter()
            .filter(|(_, e)| doomed(e))
            .map(|(k, _)| k.clone())
            .collect();
        for key in &keys {
            state.remove(key);
        }
        keys.len()
    }

    /// Live entries accepted by `filter`, newest first, without touching
    /// recency order.
    pub fn snapshot(
        &self, now: DateTime<Utc>, limit: usize, filter: impl Fn(&CacheEntry) -> bool,
    ) -> Vec<Arc<CacheEntry>> {
        let mut entries: Vec<Arc<CacheEntry>> = {
            let state = self.state.lock();
            state
                .entries
                .iter()
                .filter(|(_, e)| !e.is_expired_at(now) && filter(e))
                .map(|(_, e)| e.clone())
                .collect()
        };
        entries.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        entries.truncate(limit);
        entries
    }

    pub fn len(&self) -> usize {
        self.state.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn used_bytes(&self) -> usize {
        self.state.lock().used_bytes
    }

    /// Oldest and newest creation timestamps currently held.
    pub fn age_bounds(&self) -> Option<(DateTime<Utc>, DateTime<Utc>)> {
        let state = self.state.lock();
        let mut iter = state.entries.iter().map(|(_, e)| e.created_at);
        let first = iter.next()?;
        Some(iter.fold((first, first), |(lo, hi), t| (lo.min(t), hi.max(t))))
    }

    fn check_size(&self, entry: &CacheEntry) -> Result<(), Error> {
        if entry.size_bytes > self.capacity_bytes {
            return Err(Error::CapacityExceeded { size: entry.size_bytes, capacity: self.capacity_bytes });
        }
        Ok(())
    }
}
