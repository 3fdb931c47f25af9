//! Admission behaviour over simulated time.
//!
//! These drive [`RequestGate`] directly with explicit instants, so windows and
//! blocks can be crossed without sleeping.
#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::io::Cursor;
use std::time::{Duration, Instant};

use axum::http::HeaderValue;

use inference_gate::RequestGate;
use inference_gate::error::AppError;
use inference_gate::middleware::{AbuseTracker, ApiKeyGate, SlidingWindowLimiter};
use inference_gate::validation::{
    IMAGE_SIGNATURES, PayloadValidator, UploadPolicy, ValidationFailure,
};

fn secs(n: u64) -> Duration {
    Duration::from_secs(n)
}

fn gate(quota: usize, max_failures: u32) -> RequestGate {
    RequestGate::new(
        SlidingWindowLimiter::new(quota, secs(60)),
        AbuseTracker::new(max_failures, secs(300)),
        UploadPolicy::default(),
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

// ============================================================================
// Rate Window
// ============================================================================

#[test]
fn test_quota_within_one_window() {
    let gate = gate(10, 100);
    let t0 = Instant::now();

    for i in 0..10 {
        assert!(gate.admit("a", t0 + Duration::from_millis(i)).is_ok());
    }
    let err = gate.admit("a", t0 + secs(1)).unwrap_err();
    assert!(matches!(err, AppError::RateLimited { limit: 10, window_secs: 60 }));
}

#[test]
fn test_window_slides_rather_than_resets() {
    // Requests at t=0, 10, 20 with a quota of 3; t=30 is refused, t=65 is
    // admitted because the t=0 entry has aged out.
    let gate = gate(3, 100);
    let t0 = Instant::now();

    for t in [0, 10, 20] {
        assert!(gate.admit("a", t0 + secs(t)).is_ok());
    }
    assert!(gate.admit("a", t0 + secs(30)).is_err());

    let admission = gate.admit("a", t0 + secs(65)).unwrap();
    assert_eq!(admission.current_count, 3);

    // t=10 and t=20 are still in the window
    assert!(gate.admit("a", t0 + secs(66)).is_err());
}

#[test]
fn test_rejected_requests_do_not_consume_quota() {
    let gate = gate(1, 100);
    let t0 = Instant::now();

    assert!(gate.admit("a", t0).is_ok());
    for t in 1..20 {
        assert!(gate.admit("a", t0 + secs(t)).is_err());
    }
    assert!(gate.admit("a", t0 + secs(60)).is_ok());
}

#[test]
fn test_identities_are_independent() {
    let gate = gate(1, 100);
    let t0 = Instant::now();

    assert!(gate.admit("a", t0).is_ok());
    assert!(gate.admit("a", t0).is_err());
    assert!(gate.admit("b", t0).is_ok());
}

// ============================================================================
// Blocking
// ============================================================================

#[test]
fn test_five_failures_block_for_duration() {
    let gate = gate(100, 5);
    let t0 = Instant::now();

    for _ in 0..5 {
        let err = gate.check_content_type("a", Some("text/plain"), t0).unwrap_err();
        assert!(matches!(err, AppError::UnsupportedContentType(_)));
    }

    // Still blocked at t+100 with the remainder reported
    match gate.admit("a", t0 + secs(100)).unwrap_err() {
        AppError::Blocked { retry_after_secs } => assert_eq!(retry_after_secs, 200),
        other => panic!("expected Blocked, got {other:?}"),
    }

    // Block expired at t+301 and the counter starts again
    assert!(gate.admit("a", t0 + secs(301)).is_ok());
    assert_eq!(gate.abuse().failure_count("a"), 0);
}

#[test]
fn test_five_invalid_payloads_block_for_duration() {
    let gate = gate(100, 5);
    let t0 = Instant::now();
    let mut bytes = png(4, 4);
    bytes.extend_from_slice(b"javascript:alert(1)");

    for _ in 0..5 {
        assert!(matches!(
            gate.inspect("a", &bytes, t0),
            Err(AppError::InvalidPayload(ValidationFailure::SuspiciousPattern { .. }))
        ));
    }

    assert!(matches!(
        gate.admit("a", t0 + secs(100)),
        Err(AppError::Blocked { retry_after_secs: 200 })
    ));

    assert!(gate.admit("a", t0 + secs(301)).is_ok());
    assert_eq!(gate.abuse().failure_count("a"), 0);
}

#[test]
fn test_spaced_failures_survive_reaping() {
    // One failure a minute with a reap pass in between; the idle TTL equals
    // the block duration, the shortest the configuration accepts.
    let gate = gate(100, 5);
    let t0 = Instant::now();

    for i in 0..5 {
        let now = t0 + secs(61 * i);
        gate.reap(now, secs(300));
        let _ = gate.check_content_type("a", Some("text/html"), now);
    }

    assert!(matches!(
        gate.admit("a", t0 + secs(61 * 5)),
        Err(AppError::Blocked { .. })
    ));
}

#[test]
fn test_blocked_requests_skip_window() {
    let gate = gate(100, 1);
    let t0 = Instant::now();

    assert!(gate.admit("a", t0).is_ok());
    let _ = gate.check_content_type("a", None, t0);
    for t in 1..10 {
        assert!(gate.admit("a", t0 + secs(t)).is_err());
    }
    assert_eq!(gate.limiter().current_count("a", t0 + secs(10)), 1);
}

#[test]
fn test_rate_limit_denials_lead_to_block() {
    let gate = gate(1, 3);
    let t0 = Instant::now();

    assert!(gate.admit("a", t0).is_ok());
    for t in 1..=3 {
        assert!(matches!(
            gate.admit("a", t0 + secs(t)),
            Err(AppError::RateLimited { .. })
        ));
    }
    assert!(matches!(
        gate.admit("a", t0 + secs(4)),
        Err(AppError::Blocked { .. })
    ));
}

#[test]
fn test_success_resets_failures() {
    let gate = gate(100, 3);
    let t0 = Instant::now();

    for _ in 0..2 {
        let _ = gate.check_content_type("a", Some("video/mp4"), t0);
    }
    gate.record_success("a");

    // Two more failures do not reach the threshold of three
    for _ in 0..2 {
        let _ = gate.check_content_type("a", Some("video/mp4"), t0);
    }
    assert!(gate.admit("a", t0).is_ok());
}

#[test]
fn test_oversize_and_dimension_rejections_not_counted() {
    let gate = RequestGate::new(
        SlidingWindowLimiter::new(100, secs(60)),
        AbuseTracker::new(1, secs(300)),
        UploadPolicy {
            max_file_size: 1_000_000,
            max_width: 8,
            max_height: 8,
        },
        ApiKeyGate::new(None),
    );
    let t0 = Instant::now();

    assert!(matches!(
        gate.check_size("a", 2_000_000, t0),
        Err(AppError::PayloadTooLarge { .. })
    ));
    assert!(matches!(
        gate.inspect("a", &png(16, 4), t0),
        Err(AppError::DimensionTooLarge { width: 16, height: 4, .. })
    ));
    assert!(gate.admit("a", t0).is_ok());
}

// ============================================================================
// Payload Inspection
// ============================================================================

#[test]
fn test_png_with_script_rejected() {
    let gate = gate(100, 100);
    let mut bytes = png(4, 4);
    bytes.extend_from_slice(b"<script>");

    let err = gate.inspect("a", &bytes, Instant::now()).unwrap_err();
    assert!(matches!(
        err,
        AppError::InvalidPayload(ValidationFailure::SuspiciousPattern { pattern: "<script" })
    ));
    assert_eq!(gate.abuse().failure_count("a"), 1);
}

#[test]
fn test_unknown_signature_rejected() {
    let gate = gate(100, 100);

    let err = gate
        .inspect("a", b"MZ\x90\x00 not an image", Instant::now())
        .unwrap_err();
    assert!(matches!(
        err,
        AppError::InvalidPayload(ValidationFailure::UnrecognizedSignature)
    ));
}

#[test]
fn test_valid_png_reports_dimensions() {
    let gate = gate(100, 100);

    let dims = gate.inspect("a", &png(12, 7), Instant::now()).unwrap();
    assert_eq!((dims.width, dims.height), (12, 7));
    assert_eq!(gate.abuse().failure_count("a"), 0);
}

#[test]
fn test_every_signature_prefix_recognised() {
    let validator = PayloadValidator::new();

    for (magic, signature) in IMAGE_SIGNATURES {
        let mut bytes = magic.to_vec();
        bytes.extend_from_slice(b"\x00\x01\x02\x03");
        assert_eq!(validator.validate(&bytes), Ok(signature));
    }
}

// ============================================================================
// Credentials
// ============================================================================

#[test]
fn test_wrong_key_rejected_regardless_of_state() {
    let gate = gate(100, 100);
    let wrong = HeaderValue::from_static("guess");

    assert!(matches!(
        gate.check_credential(Some(&wrong)),
        Err(AppError::InvalidCredential)
    ));

    // A clean history does not help and the failure is not counted
    gate.record_success("a");
    assert!(gate.check_credential(Some(&wrong)).is_err());
    assert_eq!(gate.abuse().failure_count("a"), 0);

    let right = HeaderValue::from_static("secret");
    assert!(gate.check_credential(Some(&right)).is_ok());
    assert!(gate.check_credential(None).is_ok());
}

#[test]
fn test_stats_union_of_tables() {
    let gate = gate(100, 1);
    let t0 = Instant::now();

    assert!(gate.admit("a", t0).is_ok());
    let _ = gate.check_content_type("a", None, t0);
    let _ = gate.check_content_type("b", None, t0);

    let stats = gate.stats(t0);
    assert_eq!(stats.active_rate_limits, 1);
    assert_eq!(stats.blocked_ips, 2);
    assert_eq!(stats.total_monitored_ips, 2);
}
