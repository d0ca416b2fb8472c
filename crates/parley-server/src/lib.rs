//! # parley-server
//!
//! HTTP and WebSocket front end for the Parley signaling relay.
//!
//! - `GET /ws/{user_id}` upgrades to a WebSocket and runs a relay session
//!   for that identity
//! - `GET /` reports who is online
//! - `GET /health` is a liveness check for load balancers

pub mod config;
pub mod server;
pub mod telemetry;

pub use config::{ConfigError, LogFormat, ServerConfig};
