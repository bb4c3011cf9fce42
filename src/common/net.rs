//! One-shot request/response exchanges over TCP
//!
//! Every exchange uses a fresh connection that is closed once the reply has
//! been read, whatever the outcome.

use crate::common::{Error, KvMessage, Result};
use std::io::ErrorKind;
use std::time::Duration;
use tokio::net::TcpStream;

/// Connect to `addr` within `timeout`.
pub async fn connect(addr: &str, timeout: Duration) -> Result<TcpStream> {
    match tokio::time::timeout(timeout, TcpStream::connect(addr)).await {
        Err(_) => Err(Error::SocketTimeout),
        Ok(Err(e)) if e.kind() == ErrorKind::InvalidInput => {
            tracing::debug!("Cannot create socket for {}: {}", addr, e);
            Err(Error::CouldNotCreateSocket)
        }
        Ok(Err(e)) => {
            tracing::debug!("Cannot connect to {}: {}", addr, e);
            Err(Error::CouldNotConnect)
        }
        Ok(Ok(stream)) => Ok(stream),
    }
}

/// Send `request` to `addr` and wait for the reply, each step bounded by
/// `timeout`.
pub async fn exchange(addr: &str, request: &KvMessage, timeout: Duration) -> Result<KvMessage> {
    let mut stream = connect(addr, timeout).await?;
    tokio::time::timeout(timeout, request.send(&mut stream)).await??;
    KvMessage::recv_timeout(&mut stream, timeout).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::MsgType;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn test_exchange_round_trip() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();

        tokio::spawn(async move {
            let (mut sock, _) = listener.accept().await.unwrap();
            let req = KvMessage::recv(&mut sock).await.unwrap();
            assert!(req.is(MsgType::Put));
            KvMessage::new(MsgType::Ready).send(&mut sock).await.unwrap();
        });

        let reply = exchange(&addr, &KvMessage::put("k", "v"), Duration::from_secs(5))
            .await
            .unwrap();
        assert!(reply.is(MsgType::Ready));
    }

    #[tokio::test]
    async fn test_exchange_refused() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        drop(listener);

        let res = exchange(&addr, &KvMessage::get("k"), Duration::from_secs(5)).await;
        assert!(res.unwrap_err().is_retryable());
    }

    #[tokio::test]
    async fn test_exchange_silent_peer_times_out() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();

        let _server = tokio::spawn(async move {
            let (sock, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(10)).await;
            drop(sock);
        });

        let res = exchange(&addr, &KvMessage::get("k"), Duration::from_millis(100)).await;
        assert!(matches!(res, Err(Error::SocketTimeout)));
    }
}
