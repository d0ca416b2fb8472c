//! Status and health endpoints.

use std::sync::Arc;

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Json},
    routing::get,
    Router,
};
use parley_relay::RelayStatus;
use serde_json::json;

use crate::server::AppState;

/// Create the status router
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(status_handler))
        .route("/health", get(health_handler))
        .with_state(state)
}

/// GET /
///
/// Who is online right now, taken from one registry snapshot.
async fn status_handler(State(state): State<Arc<AppState>>) -> Json<RelayStatus> {
    Json(RelayStatus::from_registry(&state.registry))
}

/// GET /health
///
/// Liveness check for load balancers.
async fn health_handler() -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(json!({
            "status": "healthy",
            "service": "parley-server",
            "version": env!("CARGO_PKG_VERSION"),
        })),
    )
}
