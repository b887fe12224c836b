//! HTTP request handlers
//!
//! Implements REST API endpoints for sync control and diagnostics.

use crate::api::server::AppContext;
use crate::state::StatusSnapshot;
use crate::sync::latency::LatencyReport;
use crate::sync::CyclePhase;
use axum::{extract::State, http::StatusCode, Json};
use serde::Serialize;
use tracing::{error, info};

// ============================================================================
// Request/Response Types
// ============================================================================

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    status: String,
    module: String,
    version: String,
}

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    status: String,
}

#[derive(Debug, Serialize)]
pub struct PhaseResponse {
    status: String,
    phase: CyclePhase,
}

#[derive(Debug, Serialize)]
pub struct BuildInfo {
    pub version: String,
    pub git_hash: String,
    pub build_timestamp: String,
    pub build_profile: String,
}

// ============================================================================
// Health Endpoint
// ============================================================================

/// GET /health - Health check endpoint
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        module: "cuesync".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

// ============================================================================
// Sync Control Endpoints
// ============================================================================

/// GET /status - Current engine snapshot
pub async fn status(State(ctx): State<AppContext>) -> Json<StatusSnapshot> {
    Json(ctx.shared.snapshot().await)
}

/// POST /sync/start - Begin a sync session
///
/// No-op returning the current phase when a session is already active.
/// Responds 503 when the capture device or matcher cannot be acquired.
pub async fn sync_start(
    State(ctx): State<AppContext>,
) -> Result<Json<PhaseResponse>, (StatusCode, Json<StatusResponse>)> {
    match ctx.engine.start().await {
        Ok(phase) => {
            info!(%phase, "Sync start accepted");
            Ok(Json(PhaseResponse {
                status: "ok".to_string(),
                phase,
            }))
        }
        Err(e) => {
            error!("Sync start failed: {}", e);
            Err((
                StatusCode::SERVICE_UNAVAILABLE,
                Json(StatusResponse {
                    status: format!("error: {}", e),
                }),
            ))
        }
    }
}

/// POST /sync/stop - End the session from any state
pub async fn sync_stop(
    State(ctx): State<AppContext>,
) -> Result<Json<PhaseResponse>, (StatusCode, Json<StatusResponse>)> {
    match ctx.engine.stop().await {
        Ok(phase) => {
            info!("Sync stop accepted");
            Ok(Json(PhaseResponse {
                status: "ok".to_string(),
                phase,
            }))
        }
        Err(e) => {
            error!("Sync stop failed: {}", e);
            Err((
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(StatusResponse {
                    status: format!("error: {}", e),
                }),
            ))
        }
    }
}

// ============================================================================
// Diagnostics Endpoints
// ============================================================================

/// GET /diagnostics/latency - Latency history and seek health
pub async fn latency_diagnostics(State(ctx): State<AppContext>) -> Json<LatencyReport> {
    Json(ctx.shared.snapshot().await.latency)
}

/// GET /build_info - Build identification for diagnostics
pub async fn get_build_info() -> Json<BuildInfo> {
    Json(BuildInfo {
        version: env!("CARGO_PKG_VERSION").to_string(),
        git_hash: env!("GIT_HASH").to_string(),
        build_timestamp: env!("BUILD_TIMESTAMP").to_string(),
        build_profile: env!("BUILD_PROFILE").to_string(),
    })
}
