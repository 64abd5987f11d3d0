//! Client-facing side of a session, split into its two directions.
//!
//! The bridge only needs to read text frames from a client and write text
//! frames back; the WebSocket endpoint (and tests) provide implementations.

use async_trait::async_trait;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    /// The client went away, cleanly or not.
    #[error("transport closed")]
    Closed,
    /// The client sent a frame that is not UTF-8 text.
    #[error("non-text frame")]
    NonText,
    #[error("transport error: {0}")]
    Io(String),
}

/// Why the server is closing a socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// Ordinary end of session.
    Normal,
    /// The broker could not be reached during session setup.
    BrokerUnavailable,
    /// The relay is shutting down.
    GoingAway,
}

impl CloseReason {
    /// WebSocket close code (RFC 6455 section 7.4.1).
    pub fn code(self) -> u16 {
        match self {
            CloseReason::Normal => 1000,
            CloseReason::GoingAway => 1001,
            CloseReason::BrokerUnavailable => 1011,
        }
    }

    pub fn description(self) -> &'static str {
        match self {
            CloseReason::Normal => "session ended",
            CloseReason::GoingAway => "server shutting down",
            CloseReason::BrokerUnavailable => "broker unavailable",
        }
    }
}

/// Write half of a client connection.
#[async_trait]
pub trait ClientSink: Send {
    async fn send_text(&mut self, text: String) -> Result<(), TransportError>;

    /// Best-effort close; errors are ignored because the peer may already be gone.
    async fn close(&mut self, reason: CloseReason);
}

/// Read half of a client connection.
#[async_trait]
pub trait ClientSource: Send {
    /// Wait for the next text frame.  Must be cancel-safe.
    async fn recv_text(&mut self) -> Result<String, TransportError>;
}
