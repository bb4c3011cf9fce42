//! How the coordinator reaches replicas
//!
//! The 2PC driver is generic over [`ReplicaTransport`] so its protocol logic
//! can be exercised against in-memory replicas; deployments use
//! [`TcpTransport`].

use crate::common::{net, KvMessage, Result};
use crate::coordinator::ring::ReplicaEndpoint;
use std::future::Future;
use std::time::Duration;

pub trait ReplicaTransport: Send + Sync + 'static {
    /// Deliver `request` to `endpoint` over a fresh connection and return its
    /// reply. Transport failures (connect, timeout, malformed reply) are errors.
    fn round_trip(
        &self,
        endpoint: &ReplicaEndpoint,
        request: &KvMessage,
        timeout: Duration,
    ) -> impl Future<Output = Result<KvMessage>> + Send;
}

/// One TCP connection per round-trip.
#[derive(Debug, Clone, Copy, Default)]
pub struct TcpTransport;

impl ReplicaTransport for TcpTransport {
    async fn round_trip(
        &self,
        endpoint: &ReplicaEndpoint,
        request: &KvMessage,
        timeout: Duration,
    ) -> Result<KvMessage> {
        tracing::debug!("-> {} {}", endpoint, request);
        let reply = net::exchange(&endpoint.addr(), request, timeout).await?;
        tracing::debug!("<- {} {}", endpoint, reply);
        Ok(reply)
    }
}
