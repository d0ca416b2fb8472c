use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use axum::Router;
use parley_relay::{ConnectionRegistry, SessionConfig};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tower_http::{
    cors::CorsLayer,
    trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer},
};
use tracing::{info, warn, Level};

use crate::config::ServerConfig;

mod routes;

/// How long `serve` waits for open relay sessions after the listener stops.
const SESSION_DRAIN_TIMEOUT: Duration = Duration::from_secs(10);

/// Server application state
pub struct AppState {
    /// Live connections, shared by every relay session
    pub registry: Arc<ConnectionRegistry>,
    /// Settings handed to each new relay session
    pub session_config: SessionConfig,
    /// Cancelled when the server begins shutting down
    pub shutdown: CancellationToken,
    /// Every relay session spawned by the WebSocket route
    pub sessions: TaskTracker,
}

impl AppState {
    pub fn new(session_config: SessionConfig, shutdown: CancellationToken) -> Self {
        Self {
            registry: Arc::new(ConnectionRegistry::new()),
            session_config,
            shutdown,
            sessions: TaskTracker::new(),
        }
    }
}

/// Start the HTTP server and run until SIGINT or SIGTERM.
pub async fn start(config: ServerConfig) -> Result<()> {
    let listener = TcpListener::bind(config.bind_addr).await?;

    let shutdown = CancellationToken::new();
    let signal_token = shutdown.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        signal_token.cancel();
    });

    serve(listener, config, shutdown).await
}

/// Serve on an already-bound listener until `shutdown` is cancelled.
///
/// Cancelling the token also ends every open relay session. The server
/// waits up to [`SESSION_DRAIN_TIMEOUT`] for those sessions to deregister
/// before returning.
pub async fn serve(
    listener: TcpListener,
    config: ServerConfig,
    shutdown: CancellationToken,
) -> Result<()> {
    let state = Arc::new(AppState::new(config.session.clone(), shutdown));
    serve_state(listener, state, &config.cors_origins).await
}

async fn serve_state(
    listener: TcpListener,
    state: Arc<AppState>,
    cors_origins: &[String],
) -> Result<()> {
    let app = create_router(state.clone(), cors_origins);

    let addr = listener.local_addr()?;
    info!("Starting Axum HTTP server on {}", addr);

    let shutdown = state.shutdown.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown.cancelled().await;
            info!("HTTP server received shutdown signal, draining connections");
        })
        .await?;

    // Upgraded sockets outlive the HTTP connections axum drains.
    state.sessions.close();
    if tokio::time::timeout(SESSION_DRAIN_TIMEOUT, state.sessions.wait())
        .await
        .is_err()
    {
        warn!(
            open = state.sessions.len(),
            "Relay sessions did not finish in time"
        );
    }

    info!(
        remaining = state.registry.connection_count(),
        "HTTP server stopped"
    );
    Ok(())
}

/// Create the Axum router with all routes and middleware
fn create_router(state: Arc<AppState>, cors_origins: &[String]) -> Router {
    Router::new()
        .merge(routes::status::router(state.clone()))
        .merge(routes::websocket::router(state))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        )
        .layer(configure_cors(cors_origins))
}

/// Configure CORS layer.
///
/// With an explicit origin list only those origins are allowed. Otherwise
/// falls back to permissive CORS.
fn configure_cors(origins: &[String]) -> CorsLayer {
    use tower_http::cors::AllowOrigin;

    if origins.is_empty() {
        return CorsLayer::permissive();
    }

    let allowed: Vec<_> = origins.iter().filter_map(|o| o.parse().ok()).collect();
    if allowed.is_empty() {
        warn!("PARLEY_CORS_ORIGINS set but no valid origins parsed, falling back to permissive CORS");
        CorsLayer::permissive()
    } else {
        info!(origins = ?allowed, "Configured CORS with explicit allowed origins");
        CorsLayer::new()
            .allow_origin(AllowOrigin::list(allowed))
            .allow_methods(tower_http::cors::Any)
            .allow_headers(tower_http::cors::Any)
    }
}

/// Wait for SIGINT or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to register SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received SIGINT, initiating graceful shutdown"),
        _ = terminate => info!("Received SIGTERM, initiating graceful shutdown"),
    }
}
