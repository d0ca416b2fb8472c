//! Transport-agnostic frames.
//!
//! The session never sees a WebSocket directly. The accept layer adapts
//! whatever duplex connection it negotiated into a `Stream` of inbound
//! frames and a `Sink` of outbound frames. Keepalive traffic (ping/pong)
//! stays inside the adapter.

/// A single unit of traffic on a duplex connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// UTF-8 text, expected to carry one JSON object
    Text(String),
    /// Raw bytes; the relay does not route these
    Binary(Vec<u8>),
    /// Graceful close, in either direction
    Close,
}

impl Frame {
    /// Create a text frame.
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text(text.into())
    }
}
