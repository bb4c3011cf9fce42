//! Client library for the coordinator's client API
//!
//! Each call opens one connection, sends one request and reads one reply.

use crate::common::message::SUCCESS;
use crate::common::{net, validate_key, validate_value, Error, KvMessage, MsgType, Result};
use std::time::Duration;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone)]
pub struct KvClient {
    addr: String,
    timeout: Duration,
}

impl KvClient {
    /// Client for the coordinator at `addr` (`host:port`).
    pub fn new(addr: impl Into<String>) -> Self {
        Self {
            addr: addr.into(),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Bound on each connect, send and receive.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }

    pub async fn get(&self, key: &str) -> Result<String> {
        validate_key(key)?;
        let reply = self.request(&KvMessage::get(key)).await?;
        match reply.value {
            Some(value) => Ok(value),
            None => Err(reply.to_error()),
        }
    }

    pub async fn put(&self, key: &str, value: &str) -> Result<()> {
        validate_key(key)?;
        validate_value(value)?;
        self.expect_success(&KvMessage::put(key, value)).await
    }

    pub async fn del(&self, key: &str) -> Result<()> {
        validate_key(key)?;
        self.expect_success(&KvMessage::del(key)).await
    }

    async fn expect_success(&self, request: &KvMessage) -> Result<()> {
        let reply = self.request(request).await?;
        match reply.message.as_deref() {
            Some(SUCCESS) => Ok(()),
            _ => Err(reply.to_error()),
        }
    }

    async fn request(&self, request: &KvMessage) -> Result<KvMessage> {
        let reply = net::exchange(&self.addr, request, self.timeout).await?;
        if !reply.is(MsgType::Resp) {
            return Err(Error::InvalidFormat);
        }
        Ok(reply)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    /// Serve `replies` in order, one per connection.
    async fn fake_coordinator(replies: Vec<KvMessage>) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        tokio::spawn(async move {
            for reply in replies {
                let (mut sock, _) = listener.accept().await.unwrap();
                KvMessage::recv(&mut sock).await.unwrap();
                reply.send(&mut sock).await.unwrap();
            }
        });
        addr
    }

    #[tokio::test]
    async fn test_put_get_del() {
        let addr = fake_coordinator(vec![
            KvMessage::with_message(MsgType::Resp, SUCCESS),
            KvMessage::value_resp("k", "v"),
            KvMessage::error_resp(&Error::NoSuchKey),
        ])
        .await;
        let client = KvClient::new(addr);

        client.put("k", "v").await.unwrap();
        assert_eq!(client.get("k").await.unwrap(), "v");
        assert!(matches!(client.del("k").await, Err(Error::NoSuchKey)));
    }

    #[tokio::test]
    async fn test_abort_reason_surfaces() {
        let addr = fake_coordinator(vec![KvMessage::with_message(MsgType::Resp, "disk full")]).await;
        let client = KvClient::new(addr);

        let err = client.put("k", "v").await.unwrap_err();
        assert_eq!(err.to_string(), "disk full");
    }

    #[tokio::test]
    async fn test_invalid_input_never_sent() {
        let client = KvClient::new("127.0.0.1:1").with_timeout(Duration::from_millis(50));
        assert!(matches!(client.get("").await, Err(Error::InvalidKey)));
        assert!(matches!(
            client.put(&"k".repeat(300), "v").await,
            Err(Error::OversizedKey)
        ));
    }
}
