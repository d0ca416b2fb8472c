//! Relay metrics for observability.
//!
//! Uses the global OpenTelemetry meter provider. Until the host
//! application installs one, every instrument is a no-op.

use opentelemetry::metrics::{Counter, Meter, UpDownCounter};
use std::sync::OnceLock;

static METER: OnceLock<Meter> = OnceLock::new();

fn meter() -> &'static Meter {
    METER.get_or_init(|| opentelemetry::global::meter("parley-relay"))
}

// ============================================================================
// Counters (Cumulative)
// ============================================================================

/// Counter for sessions that reached the active state.
pub fn sessions_opened() -> Counter<u64> {
    meter()
        .u64_counter("relay.sessions.opened")
        .with_description("Total relay sessions registered")
        .with_unit("session")
        .build()
}

/// Counter for messages forwarded to a registered target.
pub fn messages_forwarded() -> Counter<u64> {
    meter()
        .u64_counter("relay.messages.forwarded")
        .with_description("Total messages forwarded to their target")
        .with_unit("message")
        .build()
}

/// Counter for messages whose target was not registered.
pub fn messages_undeliverable() -> Counter<u64> {
    meter()
        .u64_counter("relay.messages.undeliverable")
        .with_description("Total messages addressed to an identity that is not online")
        .with_unit("message")
        .build()
}

/// Counter for forwards that found the target but could not queue the message.
pub fn forward_failures() -> Counter<u64> {
    meter()
        .u64_counter("relay.messages.forward_failures")
        .with_description("Total forwards dropped because the target channel was full or closed")
        .with_unit("message")
        .build()
}

/// Counter for inbound frames that failed structural decoding.
pub fn malformed_frames() -> Counter<u64> {
    meter()
        .u64_counter("relay.frames.malformed")
        .with_description("Total inbound frames that were not a JSON object")
        .with_unit("frame")
        .build()
}

// ============================================================================
// Up/Down Counters (Current State)
// ============================================================================

/// Up/down counter for identities currently registered.
pub fn connections_active() -> UpDownCounter<i64> {
    meter()
        .i64_up_down_counter("relay.connections.active")
        .with_description("Current number of registered identities")
        .with_unit("connection")
        .build()
}
