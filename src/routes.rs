//! Application routing configuration with middleware stack.
//!
//! # Middleware Stack (outermost first)
//!
//! ```text
//! Request
//!    │
//!    ▼
//! ┌──────────────────┐
//! │   Request ID     │ ← Sets / propagates X-Request-Id
//! └────────┬─────────┘
//!          │
//!          ▼
//! ┌──────────────────┐
//! │     Tracing      │ ← HTTP request/response logging
//! └────────┬─────────┘
//!          │
//!          ▼
//! ┌──────────────────┐
//! │   Host Filter    │ ← 400 if Host not in ALLOWED_HOSTS
//! └────────┬─────────┘
//!          │
//!          ▼
//! ┌──────────────────┐
//! │      CORS        │ ← Cross-origin headers
//! └────────┬─────────┘
//!          │
//!          ▼
//! ┌──────────────────┐
//! │ Trusted Proxies  │ ← Extension read by ClientIdentity
//! └────────┬─────────┘
//!          │
//!          ▼
//! ┌──────────────────┐
//! │   Body Limit     │ ← MAX_FILE_SIZE plus multipart framing
//! └────────┬─────────┘
//!          │
//!          ▼
//!      Handler (RequestGate runs inside /predict-image)
//! ```
//!
//! Rate limiting and blocking are not layers: their order relative to the
//! API key and upload checks matters, so the handler drives the gate.

use std::sync::Arc;

use axum::extract::{DefaultBodyLimit, Request};
use axum::routing::{get, post};
use axum::{Extension, Router};
use tower_http::cors::{Any, CorsLayer};
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::handlers;
use crate::middleware::{AllowedHosts, TrustedProxies, filter_host};
use crate::state::AppState;

/// Allowance for multipart boundaries and part headers on top of the file.
pub const MULTIPART_OVERHEAD: usize = 64 * 1024;

/// Build the application router with all routes and middleware configured.
///
/// The router expects to be served with
/// `into_make_service_with_connect_info::<SocketAddr>()` so that the peer
/// address is available for client identity.
pub fn build_router(state: AppState) -> Router {
    let config = state.config.clone();

    let cors = build_cors_layer(&config.cors_allowed_origins);

    let allowed_hosts = Arc::new(AllowedHosts::new(&config.allowed_hosts));
    if !allowed_hosts.allows_any() {
        info!(hosts = ?config.allowed_hosts, "Host filter enabled");
    }

    let trusted_proxies = TrustedProxies::new(&config.trusted_proxies);
    if trusted_proxies.is_enabled() {
        info!(ranges = config.trusted_proxies.len(), "Trusted proxy validation enabled");
    } else {
        info!("No TRUSTED_PROXIES set, forwarding headers are trusted verbatim");
    }

    let body_limit = config.max_file_size.saturating_add(MULTIPART_OVERHEAD);
    info!(max_body_bytes = body_limit, "Request body size limit configured");

    info!(
        quota = config.max_requests_per_window,
        window_secs = config.rate_limit_window.as_secs(),
        max_failed_attempts = config.max_failed_attempts,
        block_secs = config.block_duration.as_secs(),
        api_key = config.auth_enabled(),
        "Admission policy configured"
    );

    Router::new()
        .route("/", get(handlers::service_info))
        .route("/health", get(handlers::health_check))
        .route("/ready", get(handlers::readiness_check))
        .route("/security-stats", get(handlers::security_stats))
        .route("/predict-image", post(handlers::predict_image))
        // Applied bottom to top: the last layer sees the request first
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(Extension(trusted_proxies))
        .layer(cors)
        .layer(axum::middleware::from_fn_with_state(allowed_hosts, filter_host))
        .layer(TraceLayer::new_for_http().make_span_with(|request: &Request| {
            let request_id = request
                .headers()
                .get("x-request-id")
                .and_then(|v| v.to_str().ok())
                .unwrap_or("-");
            tracing::info_span!(
                "http",
                method = %request.method(),
                path = %request.uri().path(),
                request_id = %request_id,
            )
        }))
        .layer(PropagateRequestIdLayer::x_request_id())
        .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
        .with_state(state)
}

/// Build CORS layer from configuration.
///
/// `*` allows any origin. Entries that are not valid header values are
/// skipped.
fn build_cors_layer(allowed_origins: &[String]) -> CorsLayer {
    let allow_any = allowed_origins.iter().any(|o| o == "*");

    if allow_any {
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any)
    } else {
        let origins: Vec<_> = allowed_origins
            .iter()
            .filter_map(|o| o.parse().ok())
            .collect();

        CorsLayer::new()
            .allow_origin(origins)
            .allow_methods(Any)
            .allow_headers(Any)
    }
}
