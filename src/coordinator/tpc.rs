//! Two-phase commit driver
//!
//! Each PUT/DEL runs the protocol synchronously on the requesting task:
//!
//! ```text
//! AWAIT_QUORUM -> PHASE1 -> DECIDED{COMMIT|ABORT} -> PHASE2 -> APPLIED
//! ```
//!
//! - Phase 1 sends the request to the key's primary and secondary with a
//!   bounded timeout. Anything other than `READY` (including a transport
//!   failure) is an abort vote.
//! - Phase 2 delivers the decision to both replicas and retries until each one
//!   acknowledges, re-resolving the replica's address through the ring before
//!   every attempt since it may have restarted elsewhere.
//! - The key's cache set lock is held from phase 1 through the cache update,
//!   so at most one transaction per key is in flight.
//!
//! The coordinator keeps no log of its own; only replicas recover.

use crate::common::{
    validate_key, validate_value, Backoff, CoordinatorConfig, Error, KvMessage, MsgType,
    ReplicaCache, Result,
};
use crate::coordinator::ring::{ReplicaEndpoint, ReplicaRing};
use crate::coordinator::transport::ReplicaTransport;
use std::sync::Arc;
use std::time::Duration;

/// A validated client write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TpcOp {
    Put { key: String, value: String },
    Del { key: String },
}

impl TpcOp {
    /// Validate a client PUT/DEL before any network activity.
    pub fn from_request(request: &KvMessage) -> Result<Self> {
        match request.msg_type {
            MsgType::Put => {
                let key = request.key()?;
                let value = request.value()?;
                validate_key(key)?;
                validate_value(value)?;
                Ok(TpcOp::Put {
                    key: key.to_string(),
                    value: value.to_string(),
                })
            }
            MsgType::Del => {
                let key = request.key()?;
                validate_key(key)?;
                Ok(TpcOp::Del {
                    key: key.to_string(),
                })
            }
            _ => Err(Error::InvalidFormat),
        }
    }

    pub fn key(&self) -> &str {
        match self {
            TpcOp::Put { key, .. } | TpcOp::Del { key } => key,
        }
    }

    /// Phase-1 message sent to both replicas.
    pub fn to_message(&self) -> KvMessage {
        match self {
            TpcOp::Put { key, value } => KvMessage::put(key.as_str(), value.as_str()),
            TpcOp::Del { key } => KvMessage::del(key.as_str()),
        }
    }
}

/// Outcome of phase 1.
#[derive(Debug)]
pub enum Decision {
    Commit,
    /// Carries the first non-`READY` vote's failure.
    Abort(Error),
}

impl Decision {
    /// Commit iff both votes are `READY`; otherwise abort with the primary's
    /// failure if it has one, else the secondary's.
    pub fn from_votes(primary: Result<()>, secondary: Result<()>) -> Self {
        match (primary, secondary) {
            (Ok(()), Ok(())) => Decision::Commit,
            (Err(e), _) | (Ok(()), Err(e)) => Decision::Abort(e),
        }
    }

    pub fn to_message(&self, key: &str) -> KvMessage {
        match self {
            Decision::Commit => KvMessage::commit(key),
            Decision::Abort(e) => KvMessage::abort(key, Some(e.to_string())),
        }
    }

    pub fn is_commit(&self) -> bool {
        matches!(self, Decision::Commit)
    }
}

/// Which of a key's two replicas a phase-2 delivery targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Slot {
    Primary,
    Secondary,
}

/// Coordinator-side 2PC master.
pub struct TpcMaster<T> {
    ring: Arc<ReplicaRing>,
    cache: ReplicaCache,
    transport: T,
    timeout: Duration,
    retry_initial: Duration,
    retry_max: Duration,
}

impl<T: ReplicaTransport> TpcMaster<T> {
    pub fn new(config: &CoordinatorConfig, ring: Arc<ReplicaRing>, transport: T) -> Self {
        Self {
            ring,
            cache: ReplicaCache::from_config(&config.cache),
            transport,
            timeout: config.timeout(),
            retry_initial: config.retry_initial(),
            retry_max: config.retry_max(),
        }
    }

    pub fn ring(&self) -> &Arc<ReplicaRing> {
        &self.ring
    }

    pub fn cache(&self) -> &ReplicaCache {
        &self.cache
    }

    /// Run two-phase commit for a client PUT or DEL. Returns once the decision
    /// has been acknowledged by both replicas; an abort surfaces as the
    /// failure carried by the first non-`READY` vote.
    pub async fn handle_tpc_request(&self, request: &KvMessage) -> Result<()> {
        let op = TpcOp::from_request(request)?;
        let key = op.key();

        self.ring.await_quorum().await;

        let mut set = self.cache.lock(key).await;

        let (primary, secondary) = self
            .ring
            .replicas_for(key)
            .ok_or(Error::CouldNotConnect)?;
        tracing::debug!("2PC {:?}: replicas {} and {}", key, primary, secondary);

        // Phase 1
        let phase1 = op.to_message();
        let (vote1, vote2) = tokio::join!(
            self.vote(&primary, &phase1),
            self.vote(&secondary, &phase1)
        );
        let decision = Decision::from_votes(vote1, vote2);
        tracing::debug!("2PC {:?}: decided {:?}", key, decision);

        // Phase 2
        let phase2 = decision.to_message(key);
        tokio::join!(
            self.deliver(Slot::Primary, key, &phase2),
            self.deliver(Slot::Secondary, key, &phase2)
        );

        match decision {
            Decision::Commit => {
                match &op {
                    TpcOp::Put { key, value } => set.put(key, value),
                    TpcOp::Del { key } => set.del(key),
                }
                tracing::debug!("2PC {:?}: committed", key);
                Ok(())
            }
            Decision::Abort(e) => {
                tracing::debug!("2PC {:?}: aborted: {}", key, e);
                Err(e)
            }
        }
    }

    /// Phase-1 vote of one replica; transport failures count as aborts.
    async fn vote(&self, endpoint: &ReplicaEndpoint, request: &KvMessage) -> Result<()> {
        match self
            .transport
            .round_trip(endpoint, request, self.timeout)
            .await
        {
            Ok(reply) if reply.is(MsgType::Ready) => Ok(()),
            Ok(reply) => {
                tracing::debug!("Replica {} voted {}", endpoint, reply);
                Err(reply.to_error())
            }
            Err(e) => {
                tracing::warn!("Replica {} unreachable in phase 1: {}", endpoint, e);
                Err(e)
            }
        }
    }

    /// Deliver a phase-2 decision until the replica acknowledges it.
    async fn deliver(&self, slot: Slot, key: &str, decision: &KvMessage) {
        let mut backoff = Backoff::new(self.retry_initial, self.retry_max);
        loop {
            match self.resolve(slot, key) {
                Some(endpoint) => match self
                    .transport
                    .round_trip(&endpoint, decision, self.timeout)
                    .await
                {
                    Ok(reply) if reply.is(MsgType::Ack) => return,
                    Ok(reply) => {
                        tracing::warn!(
                            "Replica {} answered {} with {}, retrying",
                            endpoint,
                            decision.msg_type,
                            reply
                        );
                    }
                    Err(e) => {
                        tracing::warn!(
                            "Replica {} unreachable for {}: {}, retrying",
                            endpoint,
                            decision.msg_type,
                            e
                        );
                    }
                },
                None => tracing::warn!("No replica registered for {:?}, retrying", key),
            }
            backoff.wait().await;
        }
    }

    /// Current address of the replica in `slot` for `key`.
    fn resolve(&self, slot: Slot, key: &str) -> Option<ReplicaEndpoint> {
        let primary = self.ring.primary(key)?;
        match slot {
            Slot::Primary => Some(primary),
            Slot::Secondary => self.ring.successor(&primary),
        }
    }

    /// Serve a GET from the cache, else from the primary, else the secondary.
    /// Reads bypass 2PC entirely.
    pub async fn handle_get(&self, key: &str) -> Result<String> {
        validate_key(key)?;

        self.ring.await_quorum().await;

        let mut set = self.cache.lock(key).await;
        if let Some(value) = set.get(key) {
            return Ok(value);
        }

        let (primary, secondary) = self
            .ring
            .replicas_for(key)
            .ok_or(Error::NoSuchKey)?;
        let request = KvMessage::get(key);

        for endpoint in [primary, secondary] {
            match self
                .transport
                .round_trip(&endpoint, &request, self.timeout)
                .await
            {
                Ok(reply) if reply.is(MsgType::Resp) && reply.value.is_some() => {
                    let value = reply.value.unwrap_or_default();
                    set.put(key, &value);
                    return Ok(value);
                }
                Ok(reply) => tracing::debug!("GET {:?} from {}: {}", key, endpoint, reply),
                Err(e) => tracing::debug!("GET {:?} from {} failed: {}", key, endpoint, e),
            }
        }

        Err(Error::NoSuchKey)
    }
}
