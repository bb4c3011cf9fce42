//! Error types for tpckv
//!
//! Every protocol-level variant displays as the exact text carried in the
//! `message` field of an `ABORT` or `RESP` envelope, so a failure raised on a
//! replica can be reconstructed on the coordinator with [`Error::from_wire`].

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    // === Validation Errors ===
    #[error("Data Error: Null or empty key")]
    InvalidKey,

    #[error("Data Error: Null or empty value")]
    InvalidValue,

    #[error("Oversized key")]
    OversizedKey,

    #[error("Oversized value")]
    OversizedValue,

    // === Storage Errors ===
    #[error("Data Error: Key does not exist")]
    NoSuchKey,

    #[error("Recovery log error: {0}")]
    Log(String),

    // === Network Errors ===
    #[error("Network Error: Socket timeout")]
    SocketTimeout,

    #[error("Network Error: Could not create socket")]
    CouldNotCreateSocket,

    #[error("Network Error: Could not connect")]
    CouldNotConnect,

    // === Protocol Errors ===
    #[error("Data Error: Invalid format")]
    InvalidFormat,

    #[error("Data Error: Parser error")]
    ParserError,

    /// Abort text sent by a replica that does not name a known variant.
    #[error("{0}")]
    Aborted(String),

    // === I/O Errors ===
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // === Config Errors ===
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // === Generic ===
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Is this a transport failure worth retrying?
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::SocketTimeout | Error::CouldNotConnect | Error::CouldNotCreateSocket | Error::Io(_)
        )
    }

    /// Rebuild an error from the text a peer put on the wire.
    pub fn from_wire(text: &str) -> Self {
        let known = [
            Error::InvalidKey,
            Error::InvalidValue,
            Error::OversizedKey,
            Error::OversizedValue,
            Error::NoSuchKey,
            Error::SocketTimeout,
            Error::CouldNotCreateSocket,
            Error::CouldNotConnect,
            Error::InvalidFormat,
            Error::ParserError,
        ];

        known
            .into_iter()
            .find(|e| e.to_string() == text)
            .unwrap_or_else(|| Error::Aborted(text.to_string()))
    }
}

impl From<&str> for Error {
    fn from(s: &str) -> Self {
        Error::Other(s.to_string())
    }
}

impl From<String> for Error {
    fn from(s: String) -> Self {
        Error::Other(s)
    }
}

impl From<serde_json::Error> for Error {
    fn from(_: serde_json::Error) -> Self {
        Error::ParserError
    }
}

impl From<tokio::time::error::Elapsed> for Error {
    fn from(_: tokio::time::error::Elapsed) -> Self {
        Error::SocketTimeout
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_wire_known() {
        let text = Error::NoSuchKey.to_string();
        assert!(matches!(Error::from_wire(&text), Error::NoSuchKey));

        let text = Error::OversizedValue.to_string();
        assert!(matches!(Error::from_wire(&text), Error::OversizedValue));
    }

    #[test]
    fn test_from_wire_unknown() {
        match Error::from_wire("disk on fire") {
            Error::Aborted(msg) => assert_eq!(msg, "disk on fire"),
            other => panic!("Expected Aborted, got {:?}", other),
        }
    }

    #[test]
    fn test_retryable() {
        assert!(Error::SocketTimeout.is_retryable());
        assert!(Error::CouldNotConnect.is_retryable());
        assert!(!Error::NoSuchKey.is_retryable());
        assert!(!Error::InvalidFormat.is_retryable());
    }
}
