//! Health, readiness, and service information endpoints.
//!
//! # Endpoints
//!
//! - `GET /` - Service information and active limits
//! - `GET /health` - Liveness with annotator status
//! - `GET /ready` - Readiness probe
//!
//! # Health vs Readiness
//!
//! - **Health** (`/health`): Returns 200 even if degraded, includes details
//! - **Readiness** (`/ready`): Returns 503 until the annotator is ready

use std::collections::BTreeMap;

use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;
use chrono::Utc;
use tracing::instrument;

use crate::models::{HealthResponse, LimitsInfo, ServiceInfo};
use crate::state::AppState;

/// Health check endpoint.
///
/// Always returns 200 OK with status details in the body.
///
/// # Response Body
///
/// ```json
/// {
///   "status": "healthy",
///   "model_loaded": true,
///   "backend": "frame",
///   "version": "0.1.0",
///   "timestamp": "2024-01-15T10:30:00Z"
/// }
/// ```
#[instrument(skip(state))]
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let model_loaded = state.inference.is_ready();

    Json(HealthResponse {
        status: if model_loaded { "healthy" } else { "degraded" },
        model_loaded,
        backend: state.inference.backend_name().to_string(),
        version: env!("CARGO_PKG_VERSION"),
        timestamp: Utc::now(),
    })
}

/// Readiness check endpoint for orchestrator probes.
#[instrument(skip(state))]
pub async fn readiness_check(State(state): State<AppState>) -> Result<StatusCode, StatusCode> {
    if state.inference.is_ready() {
        Ok(StatusCode::OK)
    } else {
        Err(StatusCode::SERVICE_UNAVAILABLE)
    }
}

/// Service information with the limits currently in force.
#[instrument(skip(state))]
pub async fn service_info(State(state): State<AppState>) -> Json<ServiceInfo> {
    let config = &state.config;

    let endpoints = BTreeMap::from([
        ("/predict-image", "Annotate an uploaded image (multipart field `file`)"),
        ("/health", "Service and annotator status"),
        ("/ready", "Readiness probe"),
        ("/security-stats", "Admission statistics (requires API key)"),
    ]);

    Json(ServiceInfo {
        name: env!("CARGO_PKG_NAME"),
        version: env!("CARGO_PKG_VERSION"),
        endpoints,
        limits: LimitsInfo {
            max_requests_per_window: config.max_requests_per_window,
            window_seconds: config.rate_limit_window.as_secs(),
            max_failed_attempts: config.max_failed_attempts,
            block_duration_seconds: config.block_duration.as_secs(),
            max_file_size_bytes: config.max_file_size,
            max_image_width: config.max_image_width,
            max_image_height: config.max_image_height,
        },
        api_key_configured: config.auth_enabled(),
    })
}
