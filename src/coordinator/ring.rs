//! Consistent-hash ring of replica endpoints
//!
//! Replica ids are their ring positions. A key belongs to the first replica
//! whose id is at or after `hash64(key)` (wrapping to the smallest id), and its
//! second copy lives on that replica's successor. Because a restarted replica
//! re-registers under the same id, only its network location changes and no
//! key ever moves.

use crate::common::{hash64, Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::ops::Bound::{Excluded, Unbounded};
use std::sync::{Mutex, MutexGuard};
use tokio::sync::watch;

/// Network identity of one replica process.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ReplicaEndpoint {
    pub id: u64,
    pub host: String,
    pub port: u16,
}

impl ReplicaEndpoint {
    pub fn new(id: u64, host: impl Into<String>, port: u16) -> Self {
        Self {
            id,
            host: host.into(),
            port,
        }
    }

    /// Parse a registration payload of the form `<id>@<host>:<port>`.
    pub fn parse(info: &str) -> Result<Self> {
        let (id, location) = info.trim().split_once('@').ok_or(Error::InvalidFormat)?;
        let (host, port) = location.split_once(':').ok_or(Error::InvalidFormat)?;
        if location.contains('@') || port.contains(':') {
            return Err(Error::InvalidFormat);
        }

        let id = id.trim().parse::<u64>().map_err(|_| Error::InvalidFormat)?;
        let host = host.trim();
        let port = port.trim().parse::<u16>().map_err(|_| Error::InvalidFormat)?;
        if host.is_empty() {
            return Err(Error::InvalidFormat);
        }

        Ok(Self::new(id, host, port))
    }

    /// `host:port` suitable for connecting.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl std::fmt::Display for ReplicaEndpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}@{}:{}", self.id, self.host, self.port)
    }
}

impl std::str::FromStr for ReplicaEndpoint {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

/// Outcome of a registration attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Registration {
    /// New id admitted to the ring.
    Inserted,
    /// Known id; host/port replaced.
    Updated,
    /// Ring already holds its full complement of distinct ids.
    Dropped,
}

/// Membership table mapping ring position to replica endpoint.
pub struct ReplicaRing {
    capacity: usize,
    members: Mutex<BTreeMap<u64, ReplicaEndpoint>>,
    registered: watch::Sender<usize>,
}

impl ReplicaRing {
    /// Ring admitting at most `capacity` distinct replica ids.
    pub fn new(capacity: usize) -> Self {
        let (registered, _) = watch::channel(0);
        Self {
            capacity,
            members: Mutex::new(BTreeMap::new()),
            registered,
        }
    }

    fn members(&self) -> MutexGuard<'_, BTreeMap<u64, ReplicaEndpoint>> {
        self.members
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Admit or refresh a replica. Re-registration of a known id always wins;
    /// a new id beyond capacity is dropped so the caller may retry later.
    pub fn register(&self, endpoint: ReplicaEndpoint) -> Registration {
        let mut members = self.members();

        let outcome = if let Some(existing) = members.get_mut(&endpoint.id) {
            tracing::info!("Replica {} re-registered as {}", existing, endpoint);
            *existing = endpoint;
            Registration::Updated
        } else if members.len() < self.capacity {
            tracing::info!("Replica {} joined the ring", endpoint);
            members.insert(endpoint.id, endpoint);
            Registration::Inserted
        } else {
            tracing::warn!(
                "Dropping registration of {}: ring already has {} replicas",
                endpoint,
                self.capacity
            );
            Registration::Dropped
        };

        let count = members.len();
        drop(members);
        if outcome == Registration::Inserted {
            self.registered.send_replace(count);
        }
        outcome
    }

    /// Replica owning `key`: smallest id ≥ `hash64(key)`, wrapping around.
    pub fn primary(&self, key: &str) -> Option<ReplicaEndpoint> {
        let position = hash64(key);
        let members = self.members();
        members
            .range(position..)
            .next()
            .or_else(|| members.iter().next())
            .map(|(_, e)| e.clone())
    }

    /// Next replica strictly after `endpoint` on the ring, wrapping around.
    /// A single-member ring is its own successor.
    pub fn successor(&self, endpoint: &ReplicaEndpoint) -> Option<ReplicaEndpoint> {
        let members = self.members();
        members
            .range((Excluded(endpoint.id), Unbounded))
            .next()
            .or_else(|| members.iter().next())
            .map(|(_, e)| e.clone())
    }

    /// Primary and secondary replica for `key`.
    pub fn replicas_for(&self, key: &str) -> Option<(ReplicaEndpoint, ReplicaEndpoint)> {
        let primary = self.primary(key)?;
        let secondary = self.successor(&primary)?;
        Some((primary, secondary))
    }

    /// Current endpoint registered under `id`.
    pub fn get(&self, id: u64) -> Option<ReplicaEndpoint> {
        self.members().get(&id).cloned()
    }

    /// Number of distinct registered ids.
    pub fn count(&self) -> usize {
        self.members().len()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn is_full(&self) -> bool {
        self.count() >= self.capacity
    }

    /// Wait until every expected replica has registered.
    pub async fn await_quorum(&self) {
        let mut rx = self.registered.subscribe();
        let capacity = self.capacity;
        // The sender lives in `self`, so the channel cannot close while we wait.
        let _ = rx.wait_for(|&count| count >= capacity).await;
    }
}
