//! Connection Registry for message routing.
//!
//! This module provides the process-wide mapping from identity to the open
//! connection currently claiming it. Every relay session shares one
//! registry through an `Arc`.
//!
//! ## Architecture
//!
//! Each session registers a handle wrapping the sender half of its
//! outbound channel. Other sessions look the handle up by identity and
//! queue messages on it without waiting for the recipient.
//!
//! ```text
//! RelaySession (alice) <-> ConnectionRegistry <-> RelaySession (bob)
//!        |                        |                       |
//!        v                        v                       v
//!   mpsc::Sender          RwLock<HashMap<Identity,   mpsc::Sender
//!                          ConnectionHandle>>
//! ```
//!
//! Handles carry a [`ConnectionId`] so that removal is a compare-and-delete:
//! a session that disconnects late can never evict a newer connection that
//! claimed the same identity.

mod connection_registry;

pub use connection_registry::{
    ConnectionHandle, ConnectionId, ConnectionRegistry, SendResult,
};
