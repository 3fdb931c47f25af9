//! Prometheus metrics for the admission layer.
//!
//! Metrics are exposed on a dedicated listener (`METRICS_PORT`, default 9090).
//! Recording is a no-op until [`init_metrics`] installs the exporter, so the
//! library and its tests can call the `record_*` functions freely.
//!
//! # Available Metrics
//!
//! ## Counters
//! - `gate_admission_decisions_total` - Final outcome per upload request (label: outcome)
//! - `gate_blocks_total` - Blocks started by the abuse tracker
//!
//! ## Histograms
//! - `gate_inference_duration_seconds` - Annotator call duration (label: status)
//!
//! ## Gauges
//! - `gate_tracked_identities` - Identities held in memory (label: table)

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use tracing::{error, info};

/// Metric names as constants for consistency.
pub mod names {
    pub const ADMISSION_DECISIONS_TOTAL: &str = "gate_admission_decisions_total";
    pub const BLOCKS_TOTAL: &str = "gate_blocks_total";
    pub const INFERENCE_DURATION_SECONDS: &str = "gate_inference_duration_seconds";
    pub const TRACKED_IDENTITIES: &str = "gate_tracked_identities";
}

/// Initialize the Prometheus metrics exporter.
///
/// Installs the global recorder, starts the HTTP listener on `metrics_addr`
/// and registers metric descriptions.
pub fn init_metrics(metrics_addr: SocketAddr) -> Result<(), String> {
    PrometheusBuilder::new()
        .with_http_listener(metrics_addr)
        .install()
        .map_err(|e| format!("Failed to install Prometheus exporter: {e}"))?;

    describe_counter!(
        names::ADMISSION_DECISIONS_TOTAL,
        "Upload requests by final admission outcome"
    );
    describe_counter!(
        names::BLOCKS_TOTAL,
        "Number of client blocks started after repeated failures"
    );
    describe_histogram!(
        names::INFERENCE_DURATION_SECONDS,
        "Duration of annotator calls in seconds"
    );
    describe_gauge!(
        names::TRACKED_IDENTITIES,
        "Client identities currently held in memory, per table"
    );

    info!(addr = %metrics_addr, "Prometheus metrics endpoint started");
    Ok(())
}

/// Try to initialize metrics, logging any errors but not failing.
pub fn try_init_metrics(metrics_addr: SocketAddr) {
    if let Err(e) = init_metrics(metrics_addr) {
        error!(error = %e, "Failed to initialize metrics, continuing without metrics");
    }
}

/// Record the final outcome of an upload request (`accepted` or an error kind).
pub fn record_admission(outcome: &'static str) {
    counter!(names::ADMISSION_DECISIONS_TOTAL, "outcome" => outcome).increment(1);
}

pub fn record_block() {
    counter!(names::BLOCKS_TOTAL).increment(1);
}

/// Record an annotator call duration. `status` is `ok`, `error` or `timeout`.
pub fn record_inference_duration(status: &'static str, duration_secs: f64) {
    histogram!(names::INFERENCE_DURATION_SECONDS, "status" => status).record(duration_secs);
}

/// Set the size of one identity table (`windows` or `abuse`).
pub fn set_tracked_identities(table: &'static str, count: usize) {
    gauge!(names::TRACKED_IDENTITIES, "table" => table).set(count as f64);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metric_names_share_prefix() {
        for name in [
            names::ADMISSION_DECISIONS_TOTAL,
            names::BLOCKS_TOTAL,
            names::INFERENCE_DURATION_SECONDS,
            names::TRACKED_IDENTITIES,
        ] {
            assert!(name.starts_with("gate_"), "{name}");
        }
    }

    #[test]
    fn test_recording_without_exporter_is_noop() {
        record_admission("accepted");
        record_block();
        record_inference_duration("ok", 0.25);
        set_tracked_identities("windows", 3);
    }
}
