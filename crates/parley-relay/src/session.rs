//! Relay sessions.
//!
//! One session owns one accepted connection for its whole life:
//!
//! ```text
//! Connecting --register--> Active --close/error/shutdown--> Closing --unregister--> Closed
//! ```
//!
//! While active, the session waits for the next inbound frame, decodes it,
//! and hands it to whichever connection the registry holds for its
//! `target`. Writes to the client happen on a separate task fed by the
//! session's outbound channel, so forwarding never waits on a recipient.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use futures::future::FusedFuture;
use futures::{FutureExt, Sink, SinkExt, Stream, StreamExt};
use opentelemetry::KeyValue;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn, Instrument};

use crate::message::{Envelope, RelayMessage};
use crate::registry::{ConnectionHandle, ConnectionId, ConnectionRegistry, SendResult};
use crate::transport::Frame;
use crate::{metrics, Identity, RelayError};

/// Default capacity of a session's outbound channel.
pub const DEFAULT_OUTBOUND_CAPACITY: usize = 256;

/// How long teardown waits for queued writes to reach the client.
const WRITER_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// What to do with the connection an identity is taken from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DuplicatePolicy {
    /// Leave the displaced connection open; it stays unreachable until it
    /// disconnects by itself.
    #[default]
    Orphan,
    /// Ask the displaced connection to close.
    Evict,
}

/// What to do with an inbound frame that is not a JSON object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MalformedPolicy {
    /// End the session.
    #[default]
    Close,
    /// Tell the sender and keep the session.
    Report,
}

/// Per-session settings shared by every connection on a server.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Capacity of each connection's outbound channel
    pub outbound_capacity: usize,
    /// Policy for an identity claimed by a second connection
    pub duplicate_policy: DuplicatePolicy,
    /// Policy for frames that fail structural decoding
    pub malformed_policy: MalformedPolicy,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            outbound_capacity: DEFAULT_OUTBOUND_CAPACITY,
            duplicate_policy: DuplicatePolicy::default(),
            malformed_policy: MalformedPolicy::default(),
        }
    }
}

/// Lifecycle state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Connecting,
    Active,
    Closing,
    Closed,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionState::Connecting => write!(f, "connecting"),
            SessionState::Active => write!(f, "active"),
            SessionState::Closing => write!(f, "closing"),
            SessionState::Closed => write!(f, "closed"),
        }
    }
}

/// Why a session left the active state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseReason {
    /// The client sent a close frame
    PeerClosed,
    /// The inbound stream ended without a close frame
    StreamEnded,
    /// The transport reported an error
    Transport(String),
    /// A frame failed to decode under [`MalformedPolicy::Close`]
    Malformed(String),
    /// The server is shutting down
    Shutdown,
    /// A newer connection claimed the identity under [`DuplicatePolicy::Evict`]
    Evicted,
    /// Writing to the client failed
    OutboundClosed(String),
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CloseReason::PeerClosed => write!(f, "peer closed"),
            CloseReason::StreamEnded => write!(f, "stream ended"),
            CloseReason::Transport(e) => write!(f, "transport error: {}", e),
            CloseReason::Malformed(e) => write!(f, "malformed message: {}", e),
            CloseReason::Shutdown => write!(f, "server shutdown"),
            CloseReason::Evicted => write!(f, "evicted by newer connection"),
            CloseReason::OutboundClosed(e) => write!(f, "outbound failed: {}", e),
        }
    }
}

impl From<RelayError> for CloseReason {
    fn from(err: RelayError) -> Self {
        match err {
            RelayError::Transport(e) => CloseReason::Transport(e),
            RelayError::Decode(e) | RelayError::InvalidIdentity(e) => CloseReason::Malformed(e),
        }
    }
}

/// Summary of a finished session.
#[derive(Debug, Clone)]
pub struct SessionOutcome {
    pub identity: Identity,
    pub connection_id: ConnectionId,
    pub reason: CloseReason,
    /// Messages queued on a recipient's connection
    pub forwarded: u64,
    /// Messages whose target was not online
    pub undeliverable: u64,
}

/// How the writer task finished.
#[derive(Debug)]
enum WriterExit {
    /// Every sender was dropped
    Drained,
    /// The sink rejected a frame
    SinkFailed(String),
}

#[derive(Debug, Default)]
struct Counters {
    forwarded: u64,
    undeliverable: u64,
}

/// Keeps a registry entry alive for as long as the session holds it.
///
/// Dropping the guard performs the compare-and-delete, so teardown runs
/// exactly once whether the session returns normally or is cancelled.
struct Registration {
    registry: Arc<ConnectionRegistry>,
    identity: Identity,
    id: ConnectionId,
}

impl Drop for Registration {
    fn drop(&mut self) {
        let removed = self.registry.unregister(self.identity.as_str(), self.id);
        info!(
            identity = %self.identity,
            removed,
            remaining = self.registry.connection_count(),
            "Session deregistered"
        );
    }
}

/// The per-connection control loop.
pub struct RelaySession {
    identity: Identity,
    registry: Arc<ConnectionRegistry>,
    config: SessionConfig,
    shutdown: CancellationToken,
    state: SessionState,
}

impl RelaySession {
    /// Create a session for an accepted connection claiming `identity`.
    pub fn new(identity: Identity, registry: Arc<ConnectionRegistry>, config: SessionConfig) -> Self {
        Self {
            identity,
            registry,
            config,
            shutdown: CancellationToken::new(),
            state: SessionState::Connecting,
        }
    }

    /// End the session when `token` is cancelled.
    pub fn with_shutdown(mut self, token: CancellationToken) -> Self {
        self.shutdown = token;
        self
    }

    /// The identity this session claimed.
    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    /// Current lifecycle state.
    pub fn state(&self) -> SessionState {
        self.state
    }

    fn transition(&mut self, next: SessionState) {
        debug!(from = %self.state, to = %next, "Session state transition");
        self.state = next;
    }

    /// Drive the connection until it closes.
    ///
    /// `inbound` yields frames read from the client; `outbound` accepts
    /// frames to write to it. The session registers itself, sends the
    /// welcome, routes messages, and deregisters before returning.
    pub async fn run<St, E, Si>(mut self, mut inbound: St, outbound: Si) -> SessionOutcome
    where
        St: Stream<Item = Result<Frame, E>> + Unpin + Send,
        E: fmt::Display + Send,
        Si: Sink<Frame> + Unpin + Send + 'static,
        Si::Error: fmt::Display + Send,
    {
        let (handle, rx) =
            ConnectionHandle::channel(self.identity.clone(), self.config.outbound_capacity);
        let connection_id = handle.id();
        let span = info_span!(
            "relay_session",
            identity = %self.identity,
            connection_id = %connection_id
        );

        async move {
            let writer = tokio::spawn(write_outbound(rx, outbound).in_current_span());
            let abort_writer = writer.abort_handle();
            let mut writer = writer.fuse();

            let registration = self.activate(&handle);

            let mut counters = Counters::default();
            let reason = self
                .pump(&mut inbound, &handle, &mut writer, &mut counters)
                .await;

            self.transition(SessionState::Closing);
            info!(reason = %reason, "Session closing");
            drop(registration);
            drop(handle);

            if reason == CloseReason::Evicted {
                // The displaced client may have stopped reading entirely.
                abort_writer.abort();
            } else if !writer.is_terminated() {
                if tokio::time::timeout(WRITER_DRAIN_TIMEOUT, &mut writer)
                    .await
                    .is_err()
                {
                    warn!("Outbound writer did not drain in time, abandoning it");
                }
            }

            self.transition(SessionState::Closed);
            SessionOutcome {
                identity: self.identity,
                connection_id,
                reason,
                forwarded: counters.forwarded,
                undeliverable: counters.undeliverable,
            }
        }
        .instrument(span)
        .await
    }

    /// Connecting -> Active: register and greet.
    fn activate(&mut self, handle: &ConnectionHandle) -> Registration {
        let displaced = self.registry.register(handle.clone());
        let registration = Registration {
            registry: Arc::clone(&self.registry),
            identity: self.identity.clone(),
            id: handle.id(),
        };
        self.transition(SessionState::Active);
        metrics::sessions_opened().add(1, &[]);

        let online = self.registry.snapshot();
        info!(total = online.len(), online = ?online, "Client connected");

        if let Some(displaced) = displaced {
            match self.config.duplicate_policy {
                DuplicatePolicy::Orphan => {
                    info!(displaced = %displaced.id(), "Previous connection orphaned");
                }
                DuplicatePolicy::Evict => {
                    displaced.evict();
                    info!(displaced = %displaced.id(), "Previous connection evicted");
                }
            }
        }

        self.reply(handle, RelayMessage::welcome(self.identity.clone(), online));
        registration
    }

    /// The Active loop. Returns once the session must close.
    async fn pump<St, E>(
        &self,
        inbound: &mut St,
        handle: &ConnectionHandle,
        writer: &mut futures::future::Fuse<JoinHandle<WriterExit>>,
        counters: &mut Counters,
    ) -> CloseReason
    where
        St: Stream<Item = Result<Frame, E>> + Unpin,
        E: fmt::Display,
    {
        loop {
            let frame = tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => return CloseReason::Shutdown,
                _ = handle.evicted() => {
                    info!("Evicted by a newer connection");
                    return CloseReason::Evicted;
                }
                exit = &mut *writer => {
                    return match exit {
                        Ok(WriterExit::SinkFailed(e)) => CloseReason::OutboundClosed(e),
                        Ok(WriterExit::Drained) => {
                            CloseReason::OutboundClosed("channel drained".to_string())
                        }
                        Err(e) => CloseReason::OutboundClosed(e.to_string()),
                    };
                }
                frame = inbound.next() => frame,
            };

            let decoded = match frame {
                None => return CloseReason::StreamEnded,
                Some(Err(e)) => {
                    let err = RelayError::transport(e.to_string());
                    warn!(error = %err, "Closing session");
                    return CloseReason::from(err);
                }
                Some(Ok(Frame::Close)) => {
                    info!("Client disconnected");
                    return CloseReason::PeerClosed;
                }
                Some(Ok(Frame::Binary(bytes))) => Err(RelayError::decode(format!(
                    "binary frames are not supported ({} bytes)",
                    bytes.len()
                ))),
                Some(Ok(Frame::Text(text))) => Envelope::decode(&text),
            };

            match decoded {
                Ok(envelope) => self.route(envelope, handle, counters),
                Err(e) => {
                    metrics::malformed_frames().add(1, &[]);
                    match self.config.malformed_policy {
                        MalformedPolicy::Close => {
                            warn!(error = %e, "Malformed message, closing session");
                            return CloseReason::from(e);
                        }
                        MalformedPolicy::Report => {
                            warn!(error = %e, "Malformed message, reporting to sender");
                            self.reply(handle, RelayMessage::malformed(&e));
                        }
                    }
                }
            }
        }
    }

    /// Forward an envelope to its target, or tell the sender it is not online.
    fn route(&self, mut envelope: Envelope, own: &ConnectionHandle, counters: &mut Counters) {
        let kind = envelope.kind().unwrap_or_default().to_string();
        let Some(target) = envelope.target().map(str::to_string) else {
            let label = envelope.target_label();
            warn!(kind = %kind, target = %label, "Message has no routable target");
            self.undeliverable(own, &label, counters);
            return;
        };
        debug!(kind = %kind, target = %target, "Routing message");

        envelope.stamp_sender(&self.identity);
        match self
            .registry
            .send_to(&target, envelope.into_value())
        {
            SendResult::Sent => {
                counters.forwarded += 1;
                metrics::messages_forwarded().add(1, &[KeyValue::new("type", kind.clone())]);
                debug!(kind = %kind, target = %target, "Forwarded message");
            }
            SendResult::NotConnected => {
                warn!(
                    target = %target,
                    online = self.registry.connection_count(),
                    "Target not online"
                );
                self.undeliverable(own, &target, counters);
            }
            failed => {
                warn!(kind = %kind, target = %target, result = ?failed, "Failed to forward message");
            }
        }
    }

    fn undeliverable(&self, own: &ConnectionHandle, target: &str, counters: &mut Counters) {
        counters.undeliverable += 1;
        metrics::messages_undeliverable().add(1, &[]);
        self.reply(own, RelayMessage::not_online(target));
    }

    /// Queue a relay-generated message for this session's own client.
    fn reply(&self, own: &ConnectionHandle, message: RelayMessage) {
        let kind = message.kind();
        let result = own.try_deliver(message.into_value());
        if !result.is_sent() {
            warn!(kind, result = ?result, "Failed to queue relay message for client");
        }
    }
}

/// Drain the outbound channel into the client sink.
async fn write_outbound<Si>(mut rx: mpsc::Receiver<Value>, mut sink: Si) -> WriterExit
where
    Si: Sink<Frame> + Unpin,
    Si::Error: fmt::Display,
{
    let exit = loop {
        match rx.recv().await {
            Some(value) => {
                if let Err(e) = sink.send(Frame::Text(value.to_string())).await {
                    warn!(error = %e, "Failed to write to client");
                    break WriterExit::SinkFailed(e.to_string());
                }
            }
            None => break WriterExit::Drained,
        }
    };
    if let Err(e) = sink.close().await {
        debug!(error = %e, "Failed to close client sink");
    }
    exit
}
