use std::time::Instant;

use axum::Json;
use axum::extract::State;
use axum::http::HeaderMap;
use tracing::instrument;

use crate::error::AppResult;
use crate::middleware::API_KEY_HEADER;
use crate::models::SecurityStatsResponse;
use crate::state::AppState;

/// Admission statistics. Requires `X-API-Key`.
///
/// # Response Body
///
/// ```json
/// {
///   "active_rate_limits": 3,
///   "blocked_ips": 1,
///   "failed_attempts_count": 2,
///   "total_monitored_ips": 4,
///   "security_features": ["Sliding-window rate limiting", "..."],
///   "uptime_seconds": 3600
/// }
/// ```
#[instrument(skip_all)]
pub async fn security_stats(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> AppResult<Json<SecurityStatsResponse>> {
    state.gate.require_credential(headers.get(API_KEY_HEADER))?;

    Ok(Json(SecurityStatsResponse {
        stats: state.gate.stats(Instant::now()),
        uptime_seconds: state.uptime_seconds(),
    }))
}
