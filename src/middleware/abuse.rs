//! Failure counting and temporary blocking.
//!
//! [`AbuseTracker`] combines the per-identity failure counter and the block
//! registry. Both live in one record per identity so that
//! increment-then-maybe-block is a single critical section.
//!
//! # Lifecycle
//!
//! ```text
//!   report_failure          failures == max_failed_attempts
//!   ──────────────► counting ─────────────────────────────► blocked
//!        ▲             │                                       │
//!        │             │ report_success                        │ block_duration elapsed,
//!        │             ▼                                       │ observed by is_blocked
//!        └──────── failures = 0 ◄──────────────────────────────┘
//! ```
//!
//! A block is active while `now - blocked_at < block_duration`. The first
//! [`AbuseTracker::is_blocked`] call after that removes the block and
//! zeroes the counter.

use std::time::{Duration, Instant};

use dashmap::DashMap;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy)]
struct AbuseRecord {
    /// Consecutive failures since the last success or block expiry.
    failures: u32,
    /// Start of the active block, if any.
    blocked_at: Option<Instant>,
    /// Last failure or block check; used for idle eviction.
    last_seen: Instant,
}

impl AbuseRecord {
    fn new(now: Instant) -> Self {
        Self {
            failures: 0,
            blocked_at: None,
            last_seen: now,
        }
    }

    fn block_active(&self, now: Instant, duration: Duration) -> bool {
        self.blocked_at
            .is_some_and(|start| now.saturating_duration_since(start) < duration)
    }

    /// Clear an expired block. Returns true if one was cleared.
    fn expire_block(&mut self, now: Instant, duration: Duration) -> bool {
        match self.blocked_at {
            Some(start) if now.saturating_duration_since(start) >= duration => {
                self.blocked_at = None;
                self.failures = 0;
                true
            }
            _ => false,
        }
    }
}

/// Result of [`AbuseTracker::report_failure`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FailureReport {
    /// Counter value after this failure.
    pub failures: u32,
    /// True if this failure started a new block.
    pub newly_blocked: bool,
}

/// Per-identity failure counter and block registry.
#[derive(Debug)]
pub struct AbuseTracker {
    records: DashMap<String, AbuseRecord>,
    max_failed_attempts: u32,
    block_duration: Duration,
}

impl AbuseTracker {
    pub fn new(max_failed_attempts: u32, block_duration: Duration) -> Self {
        Self {
            records: DashMap::new(),
            max_failed_attempts,
            block_duration,
        }
    }

    /// Count a failed or rejected request.
    ///
    /// Reaching `max_failed_attempts` starts a block at `now`. The counter is
    /// left as is; it resets on success or when the block expires.
    pub fn report_failure(&self, identity: &str, now: Instant) -> FailureReport {
        let mut entry = self
            .records
            .entry(identity.to_owned())
            .or_insert_with(|| AbuseRecord::new(now));
        let record = entry.value_mut();

        record.expire_block(now, self.block_duration);
        record.failures = record.failures.saturating_add(1);
        record.last_seen = now;

        let newly_blocked =
            record.failures >= self.max_failed_attempts && record.blocked_at.is_none();
        if newly_blocked {
            record.blocked_at = Some(now);
            warn!(
                client = %identity,
                failures = record.failures,
                block_secs = self.block_duration.as_secs(),
                "Client blocked after repeated failures"
            );
        }

        FailureReport {
            failures: record.failures,
            newly_blocked,
        }
    }

    /// Reset the failure counter after a successful request.
    pub fn report_success(&self, identity: &str) {
        if let Some(mut record) = self.records.get_mut(identity) {
            record.failures = 0;
        }
    }

    /// Whether `identity` is blocked at `now`.
    ///
    /// An expired block is removed here and the counter reset.
    pub fn is_blocked(&self, identity: &str, now: Instant) -> bool {
        let Some(mut record) = self.records.get_mut(identity) else {
            return false;
        };
        record.last_seen = now;

        if record.expire_block(now, self.block_duration) {
            info!(client = %identity, "Block expired");
            return false;
        }
        record.blocked_at.is_some()
    }

    /// Time left on `identity`'s block, or `None` if not blocked.
    pub fn remaining_block(&self, identity: &str, now: Instant) -> Option<Duration> {
        let record = self.records.get(identity)?;
        let start = record.blocked_at?;
        self.block_duration
            .checked_sub(now.saturating_duration_since(start))
            .filter(|left| !left.is_zero())
    }

    pub fn failure_count(&self, identity: &str) -> u32 {
        self.records.get(identity).map_or(0, |r| r.failures)
    }

    /// Identities with an unexpired block at `now`.
    pub fn blocked_identities(&self, now: Instant) -> usize {
        self.records
            .iter()
            .filter(|r| r.block_active(now, self.block_duration))
            .count()
    }

    /// Identities with a nonzero failure counter.
    pub fn failing_identities(&self) -> usize {
        self.records.iter().filter(|r| r.failures > 0).count()
    }

    pub fn tracked_identities(&self) -> Vec<String> {
        self.records.iter().map(|r| r.key().clone()).collect()
    }

    pub fn tracked_len(&self) -> usize {
        self.records.len()
    }

    /// Drop records without an active block that have been idle for `idle_ttl`.
    pub fn evict_idle(&self, now: Instant, idle_ttl: Duration) -> usize {
        let before = self.records.len();
        self.records.retain(|_, record| {
            record.block_active(now, self.block_duration)
                || now.saturating_duration_since(record.last_seen) < idle_ttl
        });
        before.saturating_sub(self.records.len())
    }
}
