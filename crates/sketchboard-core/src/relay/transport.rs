//! Transport contract used by the relay.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Errors produced by transports.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("transport is not connected")]
    NotConnected,
    #[error("invalid endpoint: {0}")]
    InvalidEndpoint(String),
    #[error("connect failed: {0}")]
    Connect(String),
    #[error("send failed: {0}")]
    Send(String),
    #[error("receive failed: {0}")]
    Receive(String),
    #[error("connection closed by peer")]
    Closed,
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// The physical channel a frame travelled on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    /// WebSocket, one JSON object per text message.
    WebSocket,
    /// Newline-delimited JSON over a byte stream.
    Stream,
}

impl TransportKind {
    /// Payload flag marking events received over this transport.
    pub fn origin_tag(&self) -> &'static str {
        match self {
            TransportKind::WebSocket => "from_wsocket",
            TransportKind::Stream => "from_wtrans",
        }
    }
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportKind::WebSocket => f.write_str("websocket"),
            TransportKind::Stream => f.write_str("stream"),
        }
    }
}

/// A bidirectional text-frame channel.
///
/// `next_frame` must be cancel safe: the relay polls it inside `select!` and
/// a dropped call must not lose a partially received frame.
#[allow(async_fn_in_trait)]
pub trait Transport {
    fn kind(&self) -> TransportKind;

    fn is_open(&self) -> bool;

    async fn connect(&mut self) -> Result<(), TransportError>;

    /// Close the channel. Closing a closed transport is a no-op.
    async fn disconnect(&mut self) -> Result<(), TransportError>;

    /// Write one frame.
    async fn send(&mut self, frame: &str) -> Result<(), TransportError>;

    /// Next complete inbound frame, or `None` once the peer closed the channel.
    async fn next_frame(&mut self) -> Option<Result<String, TransportError>>;
}
