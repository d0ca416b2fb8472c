//! Error types for the relay core.

use thiserror::Error;

/// Relay errors.
///
/// Routing conditions (an unreachable target, a failed forward) are not
/// errors at this level: they are reported per message and the session
/// carries on. Only the variants below end a session or refuse one.
#[derive(Debug, Error)]
pub enum RelayError {
    /// The claimed identity cannot be used for routing
    #[error("Invalid identity: {0}")]
    InvalidIdentity(String),

    /// Inbound frame failed structural decoding
    #[error("Decode error: {0}")]
    Decode(String),

    /// The underlying duplex connection failed
    #[error("Transport error: {0}")]
    Transport(String),
}

impl RelayError {
    /// Create a new invalid identity error.
    pub fn invalid_identity(msg: impl Into<String>) -> Self {
        Self::InvalidIdentity(msg.into())
    }

    /// Create a new decode error.
    pub fn decode(msg: impl Into<String>) -> Self {
        Self::Decode(msg.into())
    }

    /// Create a new transport error.
    pub fn transport(msg: impl Into<String>) -> Self {
        Self::Transport(msg.into())
    }
}

impl From<serde_json::Error> for RelayError {
    fn from(err: serde_json::Error) -> Self {
        Self::Decode(err.to_string())
    }
}
