//! # Transport
//!
//! How a `DiffuserClient` reaches a peer's `DiffuserService`. A transport
//! carries one encoded request frame out and hands back one encoded reply
//! frame; sequencing and decoding belong to the client.

use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// Refused, reset, or closed mid-frame.
    ConnectionLost(String),
    Timeout,
    /// Frame length over `tcp::MAX_FRAME_LEN`.
    PayloadTooLarge(usize),
    Io(String),
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ConnectionLost(msg) => write!(f, "peer connection lost: {}", msg),
            Self::Timeout => write!(f, "peer did not answer in time"),
            Self::PayloadTooLarge(n) => write!(f, "frame of {} bytes exceeds the frame limit", n),
            Self::Io(msg) => write!(f, "transport i/o: {}", msg),
        }
    }
}

impl std::error::Error for TransportError {}

impl From<std::io::Error> for TransportError {
    fn from(e: std::io::Error) -> Self {
        match e.kind() {
            std::io::ErrorKind::ConnectionRefused
            | std::io::ErrorKind::ConnectionReset
            | std::io::ErrorKind::ConnectionAborted
            | std::io::ErrorKind::BrokenPipe
            | std::io::ErrorKind::UnexpectedEof => Self::ConnectionLost(e.to_string()),
            std::io::ErrorKind::TimedOut => Self::Timeout,
            _ => Self::Io(e.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, TransportError>;

/// One request frame out, one reply frame back.
///
/// Implementations never look inside `payload`; a reply that fails to decode
/// is the client's problem, not the transport's.
#[async_trait::async_trait]
pub trait Transport: Send + Sync + 'static {
    async fn call(&self, payload: &[u8]) -> Result<Vec<u8>>;
}
