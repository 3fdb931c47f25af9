//! Admission orchestration.
//!
//! [`RequestGate`] owns every piece of per-client state and applies the
//! checks in a fixed order, short-circuiting on the first failure:
//!
//! ```text
//!  identity ─► blocked? ─► window admit ─► API key ─► content type
//!                 │            │              │            │
//!               429          429*           403          400*
//!
//!  ─► byte size ─► signature + patterns ─► dimensions ─► inference
//!        │                 │                   │             │
//!      413               400*                413           500
//!
//!  * increments the client's failure counter
//! ```
//!
//! A blocked client never touches its request window. A successful
//! inference resets the failure counter; an inference failure does not.
//!
//! Every method takes `now` explicitly so that tests can drive time.

use std::collections::HashSet;
use std::time::{Duration, Instant};

use axum::http::HeaderValue;
use tracing::debug;

use crate::config::Config;
use crate::error::{AppError, AppResult};
use crate::metrics;
use crate::middleware::{AbuseTracker, Admission, ApiKeyGate, Credential, SlidingWindowLimiter};
use crate::models::SecurityStats;
use crate::validation::{ImageDimensions, PayloadValidator, UploadPolicy, decode_dimensions};

/// Features reported by `/security-stats`.
const SECURITY_FEATURES: [&str; 7] = [
    "Sliding-window rate limiting",
    "Progressive client blocking",
    "Upload content-type check",
    "Magic number verification",
    "Active content scan",
    "Size and dimension limits",
    "Security response headers",
];

/// Entries removed by one [`RequestGate::reap`] pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReapReport {
    pub windows: usize,
    pub abuse_records: usize,
}

/// Per-request admission decisions over shared client state.
#[derive(Debug)]
pub struct RequestGate {
    limiter: SlidingWindowLimiter,
    abuse: AbuseTracker,
    validator: PayloadValidator,
    policy: UploadPolicy,
    api_key: ApiKeyGate,
}

impl RequestGate {
    pub fn new(
        limiter: SlidingWindowLimiter,
        abuse: AbuseTracker,
        policy: UploadPolicy,
        api_key: ApiKeyGate,
    ) -> Self {
        Self {
            limiter,
            abuse,
            validator: PayloadValidator::new(),
            policy,
            api_key,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(
            SlidingWindowLimiter::new(config.max_requests_per_window, config.rate_limit_window),
            AbuseTracker::new(config.max_failed_attempts, config.block_duration),
            config.upload_policy(),
            ApiKeyGate::new(config.api_key.clone()),
        )
    }

    pub fn limiter(&self) -> &SlidingWindowLimiter {
        &self.limiter
    }

    pub fn abuse(&self) -> &AbuseTracker {
        &self.abuse
    }

    pub fn policy(&self) -> &UploadPolicy {
        &self.policy
    }

    // =========================================================================
    // Pipeline Steps
    // =========================================================================

    /// Block check followed by the rate limit.
    pub fn admit(&self, identity: &str, now: Instant) -> AppResult<Admission> {
        if self.abuse.is_blocked(identity, now) {
            let retry_after_secs = self
                .abuse
                .remaining_block(identity, now)
                .map_or(1, ceil_secs);
            return Err(self.reject(identity, AppError::Blocked { retry_after_secs }, now));
        }

        let admission = self.limiter.admit(identity, now);
        if !admission.allowed {
            let err = AppError::RateLimited {
                limit: self.limiter.max_requests(),
                window_secs: self.limiter.window().as_secs(),
            };
            return Err(self.reject(identity, err, now));
        }

        debug!(
            client = %identity,
            in_window = admission.current_count,
            "Request admitted"
        );
        Ok(admission)
    }

    /// Optional API key. Never touches abuse state.
    pub fn check_credential(&self, provided: Option<&HeaderValue>) -> AppResult<Credential> {
        self.api_key.check(provided)
    }

    /// Mandatory API key for operator endpoints.
    pub fn require_credential(&self, provided: Option<&HeaderValue>) -> AppResult<()> {
        self.api_key.require(provided)
    }

    /// The declared content type must start with `image/`.
    pub fn check_content_type(
        &self,
        identity: &str,
        content_type: Option<&str>,
        now: Instant,
    ) -> AppResult<()> {
        let is_image = content_type.is_some_and(|ct| {
            ct.get(..6)
                .is_some_and(|prefix| prefix.eq_ignore_ascii_case("image/"))
        });

        if is_image {
            return Ok(());
        }

        let err = AppError::UnsupportedContentType(content_type.map(str::to_owned));
        Err(self.reject(identity, err, now))
    }

    /// Raw size limit, applied before any content inspection.
    pub fn check_size(&self, identity: &str, size: usize, now: Instant) -> AppResult<()> {
        if self.policy.size_allowed(size) {
            return Ok(());
        }

        let err = AppError::PayloadTooLarge {
            size,
            max: self.policy.max_file_size,
        };
        Err(self.reject(identity, err, now))
    }

    /// Size, content validation and dimension limits on a complete upload.
    pub fn inspect(&self, identity: &str, bytes: &[u8], now: Instant) -> AppResult<ImageDimensions> {
        self.check_size(identity, bytes.len(), now)?;

        let signature = self
            .validator
            .validate(bytes)
            .map_err(|failure| self.reject(identity, AppError::InvalidPayload(failure), now))?;

        let dims = decode_dimensions(bytes)
            .map_err(|failure| self.reject(identity, AppError::InvalidPayload(failure), now))?;

        if !self.policy.dimensions_allowed(dims) {
            let err = AppError::DimensionTooLarge {
                width: dims.width,
                height: dims.height,
                max_width: self.policy.max_width,
                max_height: self.policy.max_height,
            };
            return Err(self.reject(identity, err, now));
        }

        debug!(
            client = %identity,
            format = %signature,
            width = dims.width,
            height = dims.height,
            "Upload passed inspection"
        );
        Ok(dims)
    }

    /// Record a completed request; resets the failure counter.
    pub fn record_success(&self, identity: &str) {
        self.abuse.report_success(identity);
        metrics::record_admission("accepted");
    }

    /// Apply failure accounting for `err` and hand it back.
    ///
    /// Only errors for which [`AppError::counts_as_failure`] holds reach the
    /// abuse tracker.
    pub fn reject(&self, identity: &str, err: AppError, now: Instant) -> AppError {
        if err.counts_as_failure() {
            let report = self.abuse.report_failure(identity, now);
            if report.newly_blocked {
                metrics::record_block();
            }
            debug!(
                client = %identity,
                failures = report.failures,
                reason = err.kind(),
                "Failure recorded"
            );
        }
        metrics::record_admission(err.kind());
        err
    }

    // =========================================================================
    // Operator View and Housekeeping
    // =========================================================================

    pub fn stats(&self, now: Instant) -> SecurityStats {
        let monitored: HashSet<String> = self
            .limiter
            .tracked_identities()
            .into_iter()
            .chain(self.abuse.tracked_identities())
            .collect();

        SecurityStats {
            active_rate_limits: self.limiter.active_identities(now),
            blocked_ips: self.abuse.blocked_identities(now),
            failed_attempts_count: self.abuse.failing_identities(),
            total_monitored_ips: monitored.len(),
            security_features: SECURITY_FEATURES.to_vec(),
        }
    }

    /// Drop empty request windows and idle abuse records without a block.
    pub fn reap(&self, now: Instant, idle_ttl: Duration) -> ReapReport {
        let report = ReapReport {
            windows: self.limiter.evict_idle(now),
            abuse_records: self.abuse.evict_idle(now, idle_ttl),
        };
        metrics::set_tracked_identities("windows", self.limiter.tracked_len());
        metrics::set_tracked_identities("abuse", self.abuse.tracked_len());
        report
    }
}

/// Whole seconds, rounded up.
fn ceil_secs(d: Duration) -> u64 {
    let secs = d.as_secs();
    if d.subsec_nanos() > 0 {
        secs.saturating_add(1)
    } else {
        secs
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn secs(n: u64) -> Duration {
        Duration::from_secs(n)
    }

    fn gate(quota: usize, max_failures: u32) -> RequestGate {
        RequestGate::new(
            SlidingWindowLimiter::new(quota, secs(60)),
            AbuseTracker::new(max_failures, secs(300)),
            UploadPolicy {
                max_file_size: 64 * 1024,
                max_width: 100,
                max_height: 100,
            },
            ApiKeyGate::new(Some("secret".to_string())),
        )
    }

    fn png(width: u32, height: u32) -> Vec<u8> {
        let mut out = Cursor::new(Vec::new());
        image::RgbImage::new(width, height)
            .write_to(&mut out, image::ImageFormat::Png)
            .unwrap();
        out.into_inner()
    }

    #[test]
    fn test_rate_limit_counts_as_failure() {
        let gate = gate(2, 5);
        let t0 = Instant::now();

        gate.admit("x", t0).unwrap();
        gate.admit("x", t0 + secs(10)).unwrap();

        let err = gate.admit("x", t0 + secs(20)).unwrap_err();
        assert!(matches!(
            err,
            AppError::RateLimited {
                limit: 2,
                window_secs: 60
            }
        ));
        assert_eq!(gate.abuse().failure_count("x"), 1);

        let later = gate.admit("x", t0 + secs(65)).unwrap();
        assert_eq!(later.current_count, 2);
    }

    #[test]
    fn test_blocked_client_skips_limiter() {
        let gate = gate(10, 1);
        let t0 = Instant::now();

        gate.check_content_type("y", Some("text/plain"), t0)
            .unwrap_err();

        let err = gate.admit("y", t0 + secs(100)).unwrap_err();
        assert!(matches!(
            err,
            AppError::Blocked {
                retry_after_secs: 200
            }
        ));
        assert_eq!(gate.limiter().current_count("y", t0 + secs(100)), 0);
        // A blocked request is not itself a failure
        assert_eq!(gate.abuse().failure_count("y"), 1);
    }

    #[test]
    fn test_content_type_check() {
        let gate = gate(10, 5);
        let t0 = Instant::now();

        assert!(gate.check_content_type("a", Some("image/png"), t0).is_ok());
        assert!(gate.check_content_type("a", Some("IMAGE/JPEG"), t0).is_ok());
        assert!(matches!(
            gate.check_content_type("a", None, t0),
            Err(AppError::UnsupportedContentType(None))
        ));
        assert!(gate.check_content_type("a", Some("img"), t0).is_err());
        assert_eq!(gate.abuse().failure_count("a"), 2);
    }

    #[test]
    fn test_oversize_not_counted() {
        let gate = gate(10, 5);
        let t0 = Instant::now();

        let err = gate.check_size("a", 64 * 1024 + 1, t0).unwrap_err();
        assert!(matches!(err, AppError::PayloadTooLarge { .. }));
        assert_eq!(gate.abuse().failure_count("a"), 0);
    }

    #[test]
    fn test_inspect_accepts_valid_png() {
        let gate = gate(10, 5);
        let dims = gate.inspect("a", &png(20, 10), Instant::now()).unwrap();
        assert_eq!(dims, ImageDimensions { width: 20, height: 10 });
    }

    #[test]
    fn test_inspect_rejects_script_in_png() {
        let gate = gate(10, 5);
        let mut bytes = png(4, 4);
        bytes.extend_from_slice(b"javascript:alert(1)");

        let err = gate.inspect("a", &bytes, Instant::now()).unwrap_err();
        assert!(matches!(err, AppError::InvalidPayload(_)));
        assert_eq!(gate.abuse().failure_count("a"), 1);
    }

    #[test]
    fn test_dimension_limit_not_counted() {
        let gate = gate(10, 5);
        let err = gate.inspect("a", &png(101, 10), Instant::now()).unwrap_err();
        assert!(matches!(
            err,
            AppError::DimensionTooLarge {
                width: 101,
                height: 10,
                ..
            }
        ));
        assert_eq!(gate.abuse().failure_count("a"), 0);
    }

    #[test]
    fn test_wrong_key_not_counted() {
        let gate = gate(10, 5);
        let err = gate
            .check_credential(Some(&HeaderValue::from_static("wrong")))
            .unwrap_err();
        assert!(matches!(err, AppError::InvalidCredential));
        assert_eq!(gate.abuse().tracked_len(), 0);
    }

    #[test]
    fn test_success_resets_failures() {
        let gate = gate(10, 5);
        let t0 = Instant::now();

        for _ in 0..3 {
            gate.inspect("a", b"not an image", t0).unwrap_err();
        }
        assert_eq!(gate.abuse().failure_count("a"), 3);

        gate.record_success("a");
        assert_eq!(gate.abuse().failure_count("a"), 0);
    }

    #[test]
    fn test_stats() {
        let gate = gate(1, 2);
        let t0 = Instant::now();

        gate.admit("a", t0).unwrap();
        gate.admit("a", t0).unwrap_err();
        gate.admit("a", t0).unwrap_err(); // second failure blocks "a"
        gate.check_content_type("b", None, t0).unwrap_err();

        let stats = gate.stats(t0);
        assert_eq!(stats.active_rate_limits, 1);
        assert_eq!(stats.blocked_ips, 1);
        assert_eq!(stats.failed_attempts_count, 2);
        assert_eq!(stats.total_monitored_ips, 2);
        assert!(!stats.security_features.is_empty());
    }

    #[test]
    fn test_reap() {
        let gate = gate(5, 5);
        let t0 = Instant::now();

        gate.admit("a", t0).unwrap();
        gate.check_content_type("b", None, t0).unwrap_err();

        let report = gate.reap(t0 + secs(61), secs(30));
        assert_eq!(
            report,
            ReapReport {
                windows: 1,
                abuse_records: 1
            }
        );
        assert_eq!(gate.stats(t0 + secs(61)).total_monitored_ips, 0);
    }

    #[test]
    fn test_ceil_secs() {
        assert_eq!(ceil_secs(Duration::from_millis(1500)), 2);
        assert_eq!(ceil_secs(secs(3)), 3);
    }
}
