//! Configuration for tpckv components

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

/// Global configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Coordinator-specific config
    #[serde(default)]
    pub coordinator: CoordinatorConfig,

    /// Replica-specific config
    #[serde(default)]
    pub replica: ReplicaConfig,

    /// Logging level
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Config {
    /// Load `tpckv.toml` (if present) overlaid with `TPCKV_*` environment
    /// variables, e.g. `TPCKV_COORDINATOR__REPLICAS=2`. Falls back to defaults
    /// when neither source yields a valid configuration.
    pub fn load() -> Self {
        Self::load_from("tpckv").unwrap_or_else(|e| {
            tracing::warn!("Using default configuration: {}", e);
            Self::default()
        })
    }

    /// Load from a named config file (extension resolved by the `config` crate).
    pub fn load_from(name: &str) -> crate::Result<Self> {
        config::Config::builder()
            .add_source(config::File::with_name(name).required(false))
            .add_source(config::Environment::with_prefix("TPCKV").separator("__"))
            .build()
            .and_then(|c| c.try_deserialize::<Config>())
            .map_err(|e| crate::Error::InvalidConfig(e.to_string()))
    }
}

/// Cache geometry shared by coordinator and replicas
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Number of independently locked sets
    #[serde(default = "default_num_sets")]
    pub num_sets: usize,

    /// Capacity of each set
    #[serde(default = "default_max_elems_per_set")]
    pub max_elems_per_set: usize,
}

fn default_num_sets() -> usize {
    10
}
fn default_max_elems_per_set() -> usize {
    10
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            num_sets: default_num_sets(),
            max_elems_per_set: default_max_elems_per_set(),
        }
    }
}

/// Coordinator configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoordinatorConfig {
    /// Bind address for client requests
    #[serde(default = "default_client_addr")]
    pub client_addr: SocketAddr,

    /// Bind address for replica registration
    #[serde(default = "default_register_addr")]
    pub register_addr: SocketAddr,

    /// Number of replicas that must register before any 2PC runs
    #[serde(default = "default_replicas")]
    pub replicas: usize,

    /// Per-call socket timeout for replica round-trips
    #[serde(default = "default_timeout")]
    pub timeout_ms: u64,

    /// Initial delay between phase-2 retries (doubles up to the cap)
    #[serde(default = "default_retry_initial")]
    pub retry_initial_ms: u64,

    /// Upper bound on the phase-2 retry delay
    #[serde(default = "default_retry_max")]
    pub retry_max_ms: u64,

    /// Worker tasks per listener
    #[serde(default = "default_workers")]
    pub workers: usize,

    #[serde(default)]
    pub cache: CacheConfig,
}

fn default_client_addr() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 8080))
}
fn default_register_addr() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 9090))
}
fn default_replicas() -> usize {
    2
}
fn default_timeout() -> u64 {
    3000
}
fn default_retry_initial() -> u64 {
    100
}
fn default_retry_max() -> u64 {
    2000
}
fn default_workers() -> usize {
    8
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            client_addr: default_client_addr(),
            register_addr: default_register_addr(),
            replicas: default_replicas(),
            timeout_ms: default_timeout(),
            retry_initial_ms: default_retry_initial(),
            retry_max_ms: default_retry_max(),
            workers: default_workers(),
            cache: CacheConfig::default(),
        }
    }
}

impl CoordinatorConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn retry_initial(&self) -> Duration {
        Duration::from_millis(self.retry_initial_ms)
    }

    pub fn retry_max(&self) -> Duration {
        Duration::from_millis(self.retry_max_ms)
    }

    /// Reject settings the coordinator cannot run with.
    pub fn validate(&self) -> crate::Result<()> {
        if self.replicas < 2 {
            return Err(crate::Error::InvalidConfig(format!(
                "need at least 2 replicas, got {}",
                self.replicas
            )));
        }
        if self.workers == 0 {
            return Err(crate::Error::InvalidConfig("workers must be > 0".into()));
        }
        self.cache.validate()
    }
}

impl CacheConfig {
    pub fn validate(&self) -> crate::Result<()> {
        if self.num_sets == 0 || self.max_elems_per_set == 0 {
            return Err(crate::Error::InvalidConfig(
                "cache sets and set capacity must be > 0".into(),
            ));
        }
        Ok(())
    }
}

/// Replica configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplicaConfig {
    /// Ring position of this replica
    #[serde(default)]
    pub id: u64,

    /// Bind address for coordinator traffic
    #[serde(default = "default_replica_addr")]
    pub bind_addr: SocketAddr,

    /// Host name advertised to the coordinator (defaults to the bind IP)
    #[serde(default)]
    pub advertise_host: Option<String>,

    /// Coordinator registration address, `host:port`
    #[serde(default = "default_coordinator")]
    pub coordinator: String,

    /// Recovery log location
    #[serde(default = "default_log_path")]
    pub log_path: PathBuf,

    /// Sled directory for the durable backing store (memory store when unset)
    #[serde(default)]
    pub store_path: Option<PathBuf>,

    /// Per-call socket timeout
    #[serde(default = "default_timeout")]
    pub timeout_ms: u64,

    /// Worker tasks serving coordinator connections
    #[serde(default = "default_workers")]
    pub workers: usize,

    #[serde(default)]
    pub cache: CacheConfig,
}

fn default_replica_addr() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 7070))
}
fn default_coordinator() -> String {
    "127.0.0.1:9090".to_string()
}
fn default_log_path() -> PathBuf {
    PathBuf::from("./data/replica.log")
}

impl Default for ReplicaConfig {
    fn default() -> Self {
        Self {
            id: 0,
            bind_addr: default_replica_addr(),
            advertise_host: None,
            coordinator: default_coordinator(),
            log_path: default_log_path(),
            store_path: None,
            timeout_ms: default_timeout(),
            workers: default_workers(),
            cache: CacheConfig::default(),
        }
    }
}

impl ReplicaConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Host this replica tells the coordinator to dial.
    pub fn advertised_host(&self) -> String {
        self.advertise_host
            .clone()
            .unwrap_or_else(|| self.bind_addr.ip().to_string())
    }

    pub fn validate(&self) -> crate::Result<()> {
        if self.workers == 0 {
            return Err(crate::Error::InvalidConfig("workers must be > 0".into()));
        }
        self.cache.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_coordinator_defaults() {
        let conf = CoordinatorConfig::default();
        assert_eq!(conf.replicas, 2);
        assert_eq!(conf.timeout(), Duration::from_millis(3000));
        assert_eq!(conf.register_addr.port(), 9090);
        assert!(conf.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_single_replica() {
        let conf = CoordinatorConfig {
            replicas: 1,
            ..Default::default()
        };
        assert!(conf.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_empty_cache() {
        let conf = CoordinatorConfig {
            cache: CacheConfig {
                num_sets: 0,
                max_elems_per_set: 4,
            },
            ..Default::default()
        };
        assert!(conf.validate().is_err());
    }

    #[test]
    fn test_deserialize_partial() {
        let json = r#"{"coordinator": {"replicas": 4, "timeout_ms": 500}}"#;
        let conf: Config = serde_json::from_str(json).unwrap();
        assert_eq!(conf.coordinator.replicas, 4);
        assert_eq!(conf.coordinator.timeout(), Duration::from_millis(500));
        assert_eq!(conf.coordinator.workers, 8);
        assert_eq!(conf.log_level, "info");
    }

    #[test]
    fn test_advertised_host_defaults_to_bind_ip() {
        let conf = ReplicaConfig::default();
        assert_eq!(conf.advertised_host(), "127.0.0.1");
    }

    #[test]
    fn test_load_from_toml() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("tpckv.toml"),
            "log_level = \"debug\"\n\n[replica]\nid = 7\nlog_path = \"/tmp/r7.log\"\n\n[replica.cache]\nnum_sets = 3\n",
        )
        .unwrap();

        let name = dir.path().join("tpckv");
        let conf = Config::load_from(name.to_str().unwrap()).unwrap();
        assert_eq!(conf.log_level, "debug");
        assert_eq!(conf.replica.id, 7);
        assert_eq!(conf.replica.log_path, PathBuf::from("/tmp/r7.log"));
        assert_eq!(conf.replica.cache.num_sets, 3);
        assert_eq!(conf.replica.cache.max_elems_per_set, 10);
        assert_eq!(conf.coordinator.replicas, 2);
    }
}
