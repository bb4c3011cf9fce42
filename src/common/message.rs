//! Request/response envelope exchanged between clients, coordinator and replicas
//!
//! Framing is one message per direction per connection: the sender writes the
//! JSON body and shuts down its write half, the receiver reads until EOF. The
//! connection stays readable in the other direction so a reply can follow.

use crate::common::{Error, Result, MAX_VALUE_LEN};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Upper bound on one encoded message; leaves room for JSON escaping of a
/// maximal value.
pub const MAX_MESSAGE_BYTES: u64 = 8 * MAX_VALUE_LEN as u64;

/// Client-visible success text for PUT/DEL.
pub const SUCCESS: &str = "Success";

/// Reply text for an unrecognized request type.
pub const INVALID_TYPE: &str = "Data Error: Invalid Message Type";

/// Reply text acknowledging the registration of `info`.
pub fn registration_ack(info: &str) -> String {
    format!("Successful registered {}", info)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum MsgType {
    Get,
    Put,
    Del,
    Ready,
    Commit,
    Abort,
    Ack,
    Resp,
    Register,
}

impl std::fmt::Display for MsgType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            MsgType::Get => "GET",
            MsgType::Put => "PUT",
            MsgType::Del => "DEL",
            MsgType::Ready => "READY",
            MsgType::Commit => "COMMIT",
            MsgType::Abort => "ABORT",
            MsgType::Ack => "ACK",
            MsgType::Resp => "RESP",
            MsgType::Register => "REGISTER",
        };
        write!(f, "{}", s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KvMessage {
    #[serde(rename = "type")]
    pub msg_type: MsgType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl KvMessage {
    pub fn new(msg_type: MsgType) -> Self {
        Self {
            msg_type,
            key: None,
            value: None,
            message: None,
        }
    }

    pub fn with_message(msg_type: MsgType, message: impl Into<String>) -> Self {
        Self {
            message: Some(message.into()),
            ..Self::new(msg_type)
        }
    }

    pub fn get(key: impl Into<String>) -> Self {
        Self {
            key: Some(key.into()),
            ..Self::new(MsgType::Get)
        }
    }

    pub fn put(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: Some(key.into()),
            value: Some(value.into()),
            ..Self::new(MsgType::Put)
        }
    }

    pub fn del(key: impl Into<String>) -> Self {
        Self {
            key: Some(key.into()),
            ..Self::new(MsgType::Del)
        }
    }

    /// Phase-2 commit decision for the transaction on `key`.
    pub fn commit(key: impl Into<String>) -> Self {
        Self {
            key: Some(key.into()),
            ..Self::new(MsgType::Commit)
        }
    }

    /// Phase-2 abort decision for the transaction on `key`, carrying the
    /// failure that caused it.
    pub fn abort(key: impl Into<String>, reason: Option<String>) -> Self {
        Self {
            key: Some(key.into()),
            message: reason,
            ..Self::new(MsgType::Abort)
        }
    }

    /// A vote or reply failure carrying `err` as its text.
    pub fn abort_vote(err: &Error) -> Self {
        Self::with_message(MsgType::Abort, err.to_string())
    }

    pub fn register(info: impl Into<String>) -> Self {
        Self::with_message(MsgType::Register, info)
    }

    /// Successful GET reply.
    pub fn value_resp(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: Some(key.into()),
            value: Some(value.into()),
            ..Self::new(MsgType::Resp)
        }
    }

    /// `RESP` carrying an error's wire text.
    pub fn error_resp(err: &Error) -> Self {
        Self::with_message(MsgType::Resp, err.to_string())
    }

    pub fn is(&self, msg_type: MsgType) -> bool {
        self.msg_type == msg_type
    }

    pub fn key(&self) -> Result<&str> {
        self.key.as_deref().ok_or(Error::InvalidKey)
    }

    pub fn value(&self) -> Result<&str> {
        self.value.as_deref().ok_or(Error::InvalidValue)
    }

    /// The failure this message carries, if any.
    pub fn to_error(&self) -> Error {
        match self.message.as_deref() {
            Some(text) => Error::from_wire(text),
            None => Error::Aborted(format!("{} without reason", self.msg_type)),
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(self).map_err(|_| Error::InvalidFormat)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }

    /// Write this message and signal end-of-input to the peer without closing
    /// the read side.
    pub async fn send<W>(&self, writer: &mut W) -> Result<()>
    where
        W: AsyncWrite + Unpin,
    {
        let bytes = self.encode()?;
        writer
            .write_all(&bytes)
            .await
            .map_err(|_| Error::CouldNotConnect)?;
        writer.shutdown().await.map_err(|_| Error::CouldNotConnect)?;
        Ok(())
    }

    /// Read one message until the peer's end-of-input.
    pub async fn recv<R>(reader: &mut R) -> Result<Self>
    where
        R: AsyncRead + Unpin,
    {
        let mut buf = Vec::new();
        reader
            .take(MAX_MESSAGE_BYTES + 1)
            .read_to_end(&mut buf)
            .await
            .map_err(|_| Error::CouldNotConnect)?;
        if buf.len() as u64 > MAX_MESSAGE_BYTES {
            return Err(Error::InvalidFormat);
        }
        Self::decode(&buf)
    }

    /// [`KvMessage::recv`] bounded by `timeout`.
    pub async fn recv_timeout<R>(reader: &mut R, timeout: Duration) -> Result<Self>
    where
        R: AsyncRead + Unpin,
    {
        tokio::time::timeout(timeout, Self::recv(reader)).await?
    }
}

impl std::fmt::Display for KvMessage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.msg_type)?;
        if let Some(key) = &self.key {
            write!(f, " key={}", key)?;
        }
        if let Some(value) = &self.value {
            write!(f, " value_len={}", value.len())?;
        }
        if let Some(message) = &self.message {
            write!(f, " message={:?}", message)?;
        }
        Ok(())
    }
}
