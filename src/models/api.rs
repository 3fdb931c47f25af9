use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Health check response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// `healthy` when the annotator is ready, `degraded` otherwise
    pub status: &'static str,
    /// Whether the inference backend is initialized
    pub model_loaded: bool,
    /// Annotator backend name (`frame`, `remote`, ...)
    pub backend: String,
    /// Service version
    pub version: &'static str,
    /// Current timestamp
    pub timestamp: DateTime<Utc>,
}

/// Counters over the in-memory admission state.
#[derive(Debug, Clone, Serialize)]
pub struct SecurityStats {
    /// Identities with at least one request inside the current window
    pub active_rate_limits: usize,
    /// Identities with an unexpired block
    pub blocked_ips: usize,
    /// Identities with a nonzero failure counter
    pub failed_attempts_count: usize,
    /// Distinct identities across all tables
    pub total_monitored_ips: usize,
    pub security_features: Vec<&'static str>,
}

/// `/security-stats` body.
#[derive(Debug, Serialize)]
pub struct SecurityStatsResponse {
    #[serde(flatten)]
    pub stats: SecurityStats,
    pub uptime_seconds: u64,
}

/// Active limits, as shown on the service info page.
#[derive(Debug, Serialize)]
pub struct LimitsInfo {
    pub max_requests_per_window: usize,
    pub window_seconds: u64,
    pub max_failed_attempts: u32,
    pub block_duration_seconds: u64,
    pub max_file_size_bytes: usize,
    pub max_image_width: u32,
    pub max_image_height: u32,
}

/// `GET /` body.
#[derive(Debug, Serialize)]
pub struct ServiceInfo {
    pub name: &'static str,
    pub version: &'static str,
    /// Path to description
    pub endpoints: BTreeMap<&'static str, &'static str>,
    pub limits: LimitsInfo,
    /// Whether an API key is configured; it stays optional for uploads
    pub api_key_configured: bool,
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn stats() -> SecurityStats {
        SecurityStats {
            active_rate_limits: 3,
            blocked_ips: 1,
            failed_attempts_count: 2,
            total_monitored_ips: 4,
            security_features: vec!["Magic number verification"],
        }
    }

    #[test]
    fn test_security_stats_response_is_flat() {
        let response = SecurityStatsResponse {
            stats: stats(),
            uptime_seconds: 12,
        };

        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json["active_rate_limits"], 3);
        assert_eq!(json["blocked_ips"], 1);
        assert_eq!(json["failed_attempts_count"], 2);
        assert_eq!(json["total_monitored_ips"], 4);
        assert_eq!(json["uptime_seconds"], 12);
        assert!(json.get("stats").is_none());
    }

    #[test]
    fn test_health_response_serialization() {
        let response = HealthResponse {
            status: "healthy",
            model_loaded: true,
            backend: "frame".to_string(),
            version: "0.1.0",
            timestamp: Utc::now(),
        };

        let json = serde_json::to_string(&response).expect("Serialization should succeed");
        assert!(json.contains("\"status\":\"healthy\""));
        assert!(json.contains("\"model_loaded\":true"));
    }
}
