//! HTTP server setup and routing
//!
//! Sets up the Axum HTTP server with control endpoints and SSE.

use crate::error::{Error, Result};
use crate::state::SharedState;
use crate::sync::SyncEngineHandle;
use axum::{
    routing::{get, post},
    Router,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

/// Shared application context passed to all handlers
///
/// **Note:** AppContext implements Clone, which gives us `FromRef<AppContext>`
/// for free via Axum's blanket implementation.
#[derive(Clone)]
pub struct AppContext {
    pub shared: Arc<SharedState>,
    pub engine: SyncEngineHandle,
}

/// Build the router with all routes attached
///
/// Kept separate from [`run`] so tests can drive it with `tower::oneshot`.
pub fn router(ctx: AppContext) -> Router {
    Router::new()
        // Health endpoint
        .route("/health", get(super::handlers::health))
        // Sync control
        .route("/status", get(super::handlers::status))
        .route("/sync/start", post(super::handlers::sync_start))
        .route("/sync/stop", post(super::handlers::sync_stop))
        // Diagnostics
        .route(
            "/diagnostics/latency",
            get(super::handlers::latency_diagnostics),
        )
        // SSE event stream
        .route("/events", get(super::sse::event_stream))
        // Build information
        .route("/build_info", get(super::handlers::get_build_info))
        // Attach application context
        .with_state(ctx)
        // Enable CORS for local access
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

/// Run the HTTP API server until `shutdown` resolves
pub async fn run(
    port: u16,
    ctx: AppContext,
    shutdown: impl std::future::Future<Output = ()> + Send + 'static,
) -> Result<()> {
    let app = router(ctx);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    info!("Starting HTTP server on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| Error::Http(format!("Failed to bind to {}: {}", addr, e)))?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await
        .map_err(|e| Error::Http(format!("Server error: {}", e)))?;

    Ok(())
}
