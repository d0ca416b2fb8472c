//! Relay over WebSocket.
//!
//! Each upgraded socket becomes one [`RelaySession`]. The socket is split
//! and adapted to the session's [`Frame`] stream and sink; pings and pongs
//! are answered by the WebSocket layer and never reach the session.

use std::sync::Arc;

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Path, State,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use futures::{future, SinkExt, StreamExt};
use parley_relay::{Frame, Identity, RelaySession};
use tracing::{info, warn};

use crate::server::AppState;

/// Create the WebSocket router
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/ws/:user_id", get(websocket_handler))
        .with_state(state)
}

/// GET /ws/{user_id}
///
/// Upgrades the connection and relays messages for `user_id`.
async fn websocket_handler(
    ws: WebSocketUpgrade,
    Path(user_id): Path<String>,
    State(state): State<Arc<AppState>>,
) -> Response {
    let identity = match Identity::new(user_id) {
        Ok(identity) => identity,
        Err(e) => {
            warn!(error = %e, "Rejecting WebSocket connection");
            return (StatusCode::BAD_REQUEST, e.to_string()).into_response();
        }
    };

    info!(identity = %identity, "WebSocket connection request");
    let sessions = state.sessions.clone();
    ws.on_upgrade(move |socket| sessions.track_future(handle_socket(socket, identity, state)))
}

/// Run a relay session over an upgraded socket.
async fn handle_socket(socket: WebSocket, identity: Identity, state: Arc<AppState>) {
    let (sender, receiver) = socket.split();

    let inbound = receiver.filter_map(|msg| future::ready(inbound_frame(msg)));
    let outbound =
        sender.with(|frame: Frame| future::ready(Ok::<_, axum::Error>(outbound_message(frame))));

    let session = RelaySession::new(
        identity,
        Arc::clone(&state.registry),
        state.session_config.clone(),
    )
    .with_shutdown(state.shutdown.clone());

    let outcome = session.run(inbound, outbound).await;

    info!(
        identity = %outcome.identity,
        connection_id = %outcome.connection_id,
        reason = %outcome.reason,
        forwarded = outcome.forwarded,
        undeliverable = outcome.undeliverable,
        "WebSocket connection closed"
    );
}

/// Map a WebSocket message to a relay frame. Control frames yield `None`.
fn inbound_frame(msg: Result<Message, axum::Error>) -> Option<Result<Frame, axum::Error>> {
    match msg {
        Ok(Message::Text(text)) => Some(Ok(Frame::Text(text))),
        Ok(Message::Binary(data)) => Some(Ok(Frame::Binary(data))),
        Ok(Message::Close(_)) => Some(Ok(Frame::Close)),
        Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => None,
        Err(e) => Some(Err(e)),
    }
}

fn outbound_message(frame: Frame) -> Message {
    match frame {
        Frame::Text(text) => Message::Text(text),
        Frame::Binary(data) => Message::Binary(data),
        Frame::Close => Message::Close(None),
    }
}
