//! Common utilities and types shared across tpckv

pub mod cache;
pub mod config;
pub mod error;
pub mod hash;
pub mod message;
pub mod net;
pub mod pool;
pub mod storage;
pub mod utils;

pub use cache::{CacheEntry, CacheSet, ReplicaCache};
pub use config::{CacheConfig, Config, CoordinatorConfig, ReplicaConfig};
pub use error::{Error, Result};
pub use hash::{hash64, set_index};
pub use message::{KvMessage, MsgType};
pub use pool::WorkerPool;
pub use storage::{KvStore, MemStore};
pub use utils::{validate_key, validate_value, Backoff, MAX_KEY_LEN, MAX_VALUE_LEN};
