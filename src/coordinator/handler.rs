//! Per-connection jobs run by the coordinator's worker pools

use crate::common::message::{registration_ack, INVALID_TYPE, SUCCESS};
use crate::common::{KvMessage, MsgType, Result};
use crate::coordinator::ring::{Registration, ReplicaEndpoint, ReplicaRing};
use crate::coordinator::tpc::TpcMaster;
use crate::coordinator::transport::ReplicaTransport;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};

/// Answer one client request.
pub async fn respond_to_client<T: ReplicaTransport>(
    master: &TpcMaster<T>,
    request: &KvMessage,
) -> KvMessage {
    match request.msg_type {
        MsgType::Get => {
            let result = match request.key() {
                Ok(key) => master.handle_get(key).await.map(|v| (key, v)),
                Err(e) => Err(e),
            };
            match result {
                Ok((key, value)) => KvMessage::value_resp(key, value),
                Err(e) => KvMessage::error_resp(&e),
            }
        }
        MsgType::Put | MsgType::Del => match master.handle_tpc_request(request).await {
            Ok(()) => KvMessage::with_message(MsgType::Resp, SUCCESS),
            Err(e) => {
                tracing::info!("{} aborted: {}", request, e);
                KvMessage::error_resp(&e)
            }
        },
        _ => KvMessage::with_message(MsgType::Resp, INVALID_TYPE),
    }
}

/// Answer one registration request.
pub fn respond_to_registration(ring: &ReplicaRing, request: &KvMessage) -> KvMessage {
    if !request.is(MsgType::Register) {
        return KvMessage::with_message(MsgType::Resp, INVALID_TYPE);
    }

    let info = request.message.as_deref().unwrap_or_default();
    match ReplicaEndpoint::parse(info) {
        Ok(endpoint) => match ring.register(endpoint) {
            Registration::Inserted | Registration::Updated => {
                KvMessage::with_message(MsgType::Resp, registration_ack(info.trim()))
            }
            Registration::Dropped => KvMessage::with_message(
                MsgType::Resp,
                format!("Registration rejected: ring already has {} replicas", ring.capacity()),
            ),
        },
        Err(e) => {
            tracing::warn!("Bad registration {:?}: {}", info, e);
            KvMessage::error_resp(&e)
        }
    }
}

/// Serve one client connection: read a request, answer it, close.
pub async fn handle_client<T, S>(master: &TpcMaster<T>, stream: &mut S, timeout: Duration) -> Result<()>
where
    T: ReplicaTransport,
    S: AsyncRead + AsyncWrite + Unpin,
{
    let response = match KvMessage::recv_timeout(stream, timeout).await {
        Ok(request) => {
            tracing::debug!("client request: {}", request);
            respond_to_client(master, &request).await
        }
        Err(e) => KvMessage::error_resp(&e),
    };
    response.send(stream).await
}

/// Serve one registration connection.
pub async fn handle_registration<S>(ring: &ReplicaRing, stream: &mut S, timeout: Duration) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let response = match KvMessage::recv_timeout(stream, timeout).await {
        Ok(request) => respond_to_registration(ring, &request),
        Err(e) => KvMessage::error_resp(&e),
    };
    response.send(stream).await
}
