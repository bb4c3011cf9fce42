//! Replica-local key-value server: a write-through cache over a backing store

use crate::common::{
    validate_key, validate_value, CacheConfig, CacheSet, Error, KvStore, ReplicaCache, Result,
};
use crate::replica::log::LogRecord;
use std::sync::Arc;

pub struct KvServer {
    cache: ReplicaCache,
    store: Arc<dyn KvStore>,
}

impl KvServer {
    pub fn new(cache: &CacheConfig, store: Arc<dyn KvStore>) -> Self {
        Self {
            cache: ReplicaCache::from_config(cache),
            store,
        }
    }

    pub fn cache(&self) -> &ReplicaCache {
        &self.cache
    }

    pub fn store(&self) -> &Arc<dyn KvStore> {
        &self.store
    }

    /// Read through the cache; a store hit is cached.
    pub async fn get(&self, key: &str) -> Result<String> {
        validate_key(key)?;
        let mut set = self.cache.lock(key).await;
        if let Some(value) = set.get(key) {
            return Ok(value);
        }
        let value = self.store.get(key)?.ok_or(Error::NoSuchKey)?;
        set.put(key, &value);
        Ok(value)
    }

    pub async fn put(&self, key: &str, value: &str) -> Result<()> {
        validate_key(key)?;
        validate_value(value)?;
        let mut set = self.cache.lock(key).await;
        self.write(&mut set, key, value)
    }

    pub async fn del(&self, key: &str) -> Result<()> {
        validate_key(key)?;
        let mut set = self.cache.lock(key).await;
        self.remove(&mut set, key)
    }

    /// Whether the backing store holds `key`; the cache is not consulted.
    pub fn has_key(&self, key: &str) -> Result<bool> {
        self.store.contains(key)
    }

    /// Apply a committed write while the caller holds the key's set.
    pub fn apply(&self, set: &mut CacheSet, record: &LogRecord) -> Result<()> {
        match record {
            LogRecord::Put { key, value } => self.write(set, key, value),
            LogRecord::Del { key } => self.remove(set, key),
            other => Err(Error::Log(format!("not a write: {:?}", other))),
        }
    }

    fn write(&self, set: &mut CacheSet, key: &str, value: &str) -> Result<()> {
        self.store.put(key, value)?;
        set.put(key, value);
        Ok(())
    }

    fn remove(&self, set: &mut CacheSet, key: &str) -> Result<()> {
        self.store.delete(key)?;
        set.del(key);
        Ok(())
    }
}
