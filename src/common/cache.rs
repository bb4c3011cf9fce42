//! Set-associative cache with second-chance eviction
//!
//! Keys map to one of `num_sets` sets by [`set_index`]. Each set sits behind
//! its own async lock, so operations on different sets run in parallel while
//! operations within a set are serialized. The lock is a `tokio` mutex because
//! the coordinator holds a key's set lock across the network round-trips of a
//! whole 2PC transaction.
//!
//! Reads and writes happen on the locked [`CacheSet`], which makes "the caller
//! holds the set lock" a property of the types rather than a convention.

use crate::common::config::CacheConfig;
use crate::common::hash::set_index;
use tokio::sync::{Mutex, MutexGuard};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    pub key: String,
    pub value: String,
    pub referenced: bool,
}

/// One set: entries in insertion order, which is also eviction-scan order.
#[derive(Debug)]
pub struct CacheSet {
    id: usize,
    num_sets: usize,
    capacity: usize,
    entries: Vec<CacheEntry>,
}

impl CacheSet {
    fn new(id: usize, num_sets: usize, capacity: usize) -> Self {
        Self {
            id,
            num_sets,
            capacity,
            entries: Vec::with_capacity(capacity),
        }
    }

    fn position(&self, key: &str) -> Option<usize> {
        debug_assert_eq!(
            set_index(key, self.num_sets),
            self.id,
            "key {:?} does not belong to set {}",
            key,
            self.id
        );
        self.entries.iter().position(|e| e.key == key)
    }

    /// Look up `key`, marking the entry referenced on a hit.
    pub fn get(&mut self, key: &str) -> Option<String> {
        let idx = self.position(key)?;
        let entry = &mut self.entries[idx];
        entry.referenced = true;
        Some(entry.value.clone())
    }

    /// Insert or overwrite `key`. An overwrite counts as a fresh write, so the
    /// reference bit is cleared. A full set first evicts by second chance.
    pub fn put(&mut self, key: &str, value: &str) {
        if let Some(idx) = self.position(key) {
            let entry = &mut self.entries[idx];
            entry.value = value.to_string();
            entry.referenced = false;
            return;
        }

        if self.entries.len() >= self.capacity {
            self.evict();
        }
        self.entries.push(CacheEntry {
            key: key.to_string(),
            value: value.to_string(),
            referenced: false,
        });
    }

    /// Remove `key` if present.
    pub fn del(&mut self, key: &str) {
        if let Some(idx) = self.position(key) {
            self.entries.remove(idx);
        }
    }

    /// Sweep from the front, forgiving referenced entries, until an
    /// unreferenced one is found; remove it. Terminates within two passes.
    fn evict(&mut self) {
        let len = self.entries.len();
        if len == 0 {
            return;
        }
        let mut idx = 0;
        loop {
            let entry = &mut self.entries[idx];
            if !entry.referenced {
                let victim = self.entries.remove(idx);
                tracing::trace!("Evicted key {:?} from set {}", victim.key, self.id);
                return;
            }
            entry.referenced = false;
            idx = (idx + 1) % len;
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[CacheEntry] {
        &self.entries
    }

    pub fn id(&self) -> usize {
        self.id
    }
}

/// Set-associative cache shared by the coordinator and each replica.
#[derive(Debug)]
pub struct ReplicaCache {
    sets: Vec<Mutex<CacheSet>>,
}

impl ReplicaCache {
    pub fn new(num_sets: usize, max_elems_per_set: usize) -> Self {
        assert!(num_sets > 0, "cache needs at least one set");
        assert!(max_elems_per_set > 0, "cache sets need capacity");
        let sets = (0..num_sets)
            .map(|id| Mutex::new(CacheSet::new(id, num_sets, max_elems_per_set)))
            .collect();
        Self { sets }
    }

    pub fn from_config(conf: &CacheConfig) -> Self {
        Self::new(conf.num_sets, conf.max_elems_per_set)
    }

    pub fn num_sets(&self) -> usize {
        self.sets.len()
    }

    /// Index of the set holding `key`; stable for the cache's lifetime.
    pub fn set_id(&self, key: &str) -> usize {
        set_index(key, self.sets.len())
    }

    /// Acquire the lock of the set holding `key`. Composite operations keep
    /// the guard for their whole duration.
    pub async fn lock(&self, key: &str) -> MutexGuard<'_, CacheSet> {
        self.sets[self.set_id(key)].lock().await
    }

    pub async fn get(&self, key: &str) -> Option<String> {
        self.lock(key).await.get(key)
    }

    pub async fn put(&self, key: &str, value: &str) {
        self.lock(key).await.put(key, value)
    }

    pub async fn del(&self, key: &str) {
        self.lock(key).await.del(key)
    }

    /// Number of entries currently in set `set_id`.
    pub async fn set_len(&self, set_id: usize) -> usize {
        self.sets[set_id].lock().await.len()
    }
}
