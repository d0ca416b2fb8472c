//! # parley-relay
//!
//! Core of the Parley signaling relay.
//!
//! Clients connect under a name of their choosing and exchange JSON
//! messages addressed to each other by that name. The relay is the
//! rendezvous point peers use to trade connection-negotiation data (SDP
//! offers and answers, ICE candidates) before they talk directly; it
//! never looks inside a payload.
//!
//! ## Architecture
//!
//! - **Registry**: process-wide map from identity to the live connection
//!   claiming it, with compare-and-delete removal
//! - **Relay Session**: one task per connection that registers, routes
//!   inbound messages by `target`, and deregisters on the way out
//! - **Transport**: sessions read a `Stream` and write a `Sink` of
//!   [`Frame`]s, so the accept layer can be any duplex transport
//!
//! The HTTP/WebSocket accept layer lives in `parley-server`.

pub mod identity;
pub mod message;
pub mod metrics;
pub mod registry;
pub mod session;
pub mod status;
pub mod transport;

mod error;

pub use error::RelayError;
pub use identity::Identity;
pub use message::{Envelope, RelayMessage};
pub use registry::{ConnectionHandle, ConnectionId, ConnectionRegistry, SendResult};
pub use session::{
    CloseReason, DuplicatePolicy, MalformedPolicy, RelaySession, SessionConfig, SessionOutcome,
    SessionState,
};
pub use status::RelayStatus;
pub use transport::Frame;
