//! Replica side of the 2PC protocol
//!
//! Phase 1 (`PUT`/`DEL`) validates the write and, only when it can be done,
//! logs it durably before voting `READY`; a failing write is answered with an
//! `ABORT` vote carrying the reason and leaves no trace in the log. Phase 2
//! (`COMMIT`/`ABORT`) resolves the key's prepared write and is always
//! acknowledged, including redeliveries of a decision already applied.
//! `GET` is served straight from the local [`KvServer`].

use crate::common::message::INVALID_TYPE;
use crate::common::{
    validate_key, validate_value, CacheSet, Error, KvMessage, MsgType, Result,
};
use crate::replica::kvserver::KvServer;
use crate::replica::log::{LogRecord, RecoveryLog};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};

pub struct PhaseHandler {
    server: Arc<KvServer>,
    log: Mutex<RecoveryLog>,
}

impl PhaseHandler {
    pub fn new(server: Arc<KvServer>, log: RecoveryLog) -> Self {
        Self {
            server,
            log: Mutex::new(log),
        }
    }

    pub fn server(&self) -> &Arc<KvServer> {
        &self.server
    }

    fn log(&self) -> MutexGuard<'_, RecoveryLog> {
        self.log.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Whether `key` has a write prepared but not yet decided.
    pub fn is_prepared(&self, key: &str) -> bool {
        self.log().pending(key).is_some()
    }

    /// Answer one coordinator message.
    pub async fn respond(&self, request: &KvMessage) -> KvMessage {
        match request.msg_type {
            MsgType::Get => {
                let result = match request.key() {
                    Ok(key) => self.server.get(key).await.map(|v| (key, v)),
                    Err(e) => Err(e),
                };
                match result {
                    Ok((key, value)) => KvMessage::value_resp(key, value),
                    Err(e) => KvMessage::error_resp(&e),
                }
            }
            MsgType::Put | MsgType::Del => match self.prepare(request) {
                Ok(()) => KvMessage::new(MsgType::Ready),
                Err(e) => {
                    tracing::info!("Voting abort on {}: {}", request, e);
                    KvMessage::abort_vote(&e)
                }
            },
            MsgType::Commit | MsgType::Abort => match self.decide(request).await {
                Ok(()) => KvMessage::new(MsgType::Ack),
                Err(e) => {
                    tracing::error!("Failed to apply {}: {}", request, e);
                    KvMessage::error_resp(&e)
                }
            },
            _ => KvMessage::with_message(MsgType::Resp, INVALID_TYPE),
        }
    }

    /// Phase 1: validate and durably log the write.
    fn prepare(&self, request: &KvMessage) -> Result<()> {
        let key = request.key()?;
        validate_key(key)?;

        let record = if request.is(MsgType::Put) {
            let value = request.value()?;
            validate_value(value)?;
            LogRecord::Put {
                key: key.to_string(),
                value: value.to_string(),
            }
        } else {
            if !self.server.has_key(key)? {
                return Err(Error::NoSuchKey);
            }
            LogRecord::Del {
                key: key.to_string(),
            }
        };

        self.log().prepare(record)
    }

    /// Phase 2: resolve the key's prepared write.
    async fn decide(&self, request: &KvMessage) -> Result<()> {
        let key = request.key()?;
        let mut set = self.server.cache().lock(key).await;
        self.resolve(&mut set, key, request.is(MsgType::Commit))
    }

    fn resolve(&self, set: &mut CacheSet, key: &str, commit: bool) -> Result<()> {
        let mut log = self.log();

        if !commit {
            if !log.abort(key)? {
                tracing::debug!("ABORT for {:?} with nothing prepared", key);
            }
            return Ok(());
        }

        let Some(write) = log.pending(key).cloned() else {
            tracing::debug!("COMMIT for {:?} with nothing prepared", key);
            return Ok(());
        };
        // A failed apply leaves the write prepared for the next delivery.
        self.server.apply(set, &write)?;
        log.commit(key)?;
        Ok(())
    }
}

/// Serve one coordinator connection.
pub async fn handle_connection<S>(handler: &PhaseHandler, stream: &mut S, timeout: Duration) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let response = match KvMessage::recv_timeout(stream, timeout).await {
        Ok(request) => {
            tracing::debug!("coordinator request: {}", request);
            handler.respond(&request).await
        }
        Err(e) => KvMessage::error_resp(&e),
    };
    response.send(stream).await
}
