//! Backing key-value stores for replicas
//!
//! Supports an in-memory map and, behind the `sled-backend` feature, a durable
//! sled tree. Each individual call is assumed atomic and durable on its own;
//! grouping calls into transactions is the recovery log's job.

use crate::common::Result;
use std::collections::HashMap;
use std::sync::Mutex;

#[cfg(feature = "sled-backend")]
use std::path::Path;

/// Trait for key-value storage backends
pub trait KvStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>>;
    fn put(&self, key: &str, value: &str) -> Result<()>;
    fn delete(&self, key: &str) -> Result<()>;

    fn contains(&self, key: &str) -> Result<bool> {
        Ok(self.get(key)?.is_some())
    }
}

/// In-memory store (default)
#[derive(Default)]
pub struct MemStore {
    map: Mutex<HashMap<String, String>>,
}

impl MemStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, String>> {
        self.map.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl KvStore for MemStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.lock().get(key).cloned())
    }
    fn put(&self, key: &str, value: &str) -> Result<()> {
        self.lock().insert(key.to_string(), value.to_string());
        Ok(())
    }
    fn delete(&self, key: &str) -> Result<()> {
        self.lock().remove(key);
        Ok(())
    }
}

/// Sled store
#[cfg(feature = "sled-backend")]
pub struct SledStore {
    db: sled::Db,
}

#[cfg(feature = "sled-backend")]
impl SledStore {
    pub fn open(path: &Path) -> Result<Self> {
        let db = sled::open(path).map_err(|e| crate::Error::Other(e.to_string()))?;
        Ok(Self { db })
    }
}

#[cfg(feature = "sled-backend")]
impl KvStore for SledStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        let found = self
            .db
            .get(key)
            .map_err(|e| crate::Error::Other(e.to_string()))?;
        found
            .map(|ivec| {
                String::from_utf8(ivec.to_vec())
                    .map_err(|_| crate::Error::Other(format!("non UTF-8 value for {}", key)))
            })
            .transpose()
    }
    fn put(&self, key: &str, value: &str) -> Result<()> {
        self.db
            .insert(key, value.as_bytes())
            .map_err(|e| crate::Error::Other(e.to_string()))?;
        self.db
            .flush()
            .map_err(|e| crate::Error::Other(e.to_string()))?;
        Ok(())
    }
    fn delete(&self, key: &str) -> Result<()> {
        self.db
            .remove(key)
            .map_err(|e| crate::Error::Other(e.to_string()))?;
        self.db
            .flush()
            .map_err(|e| crate::Error::Other(e.to_string()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mem_store() {
        let store = MemStore::new();
        assert!(store.is_empty());
        store.put("k", "v").unwrap();
        assert_eq!(store.get("k").unwrap().as_deref(), Some("v"));
        assert!(store.contains("k").unwrap());
        store.delete("k").unwrap();
        assert_eq!(store.get("k").unwrap(), None);
        store.delete("k").unwrap();
    }

    #[cfg(feature = "sled-backend")]
    #[test]
    fn test_sled_store_persists() {
        let dir = tempfile::tempdir().unwrap();
        {
            let store = SledStore::open(dir.path()).unwrap();
            store.put("k", "v").unwrap();
        }
        let store = SledStore::open(dir.path()).unwrap();
        assert_eq!(store.get("k").unwrap().as_deref(), Some("v"));
    }
}
