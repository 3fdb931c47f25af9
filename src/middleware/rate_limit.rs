//! Per-identity sliding-window rate limiting.
//!
//! # Algorithm
//!
//! Each identity owns a log of the instants at which it was admitted. On
//! every check:
//!
//! 1. Drop every timestamp at least `window` old
//! 2. If `max_requests` timestamps remain, deny and record nothing
//! 3. Otherwise record `now` and allow
//!
//! Unlike a token bucket there is no refill rate: an identity gets exactly
//! `max_requests` admissions in any window-long span.
//!
//! # Concurrency
//!
//! Windows live in a [`DashMap`]. The prune-then-append sequence runs while
//! holding the entry's shard lock, so two requests for the same identity
//! cannot both take the last slot, while identities in other shards proceed
//! in parallel.
//!
//! # Configuration
//!
//! - `MAX_REQUESTS_PER_MINUTE`: quota per window (default 10)
//! - `RATE_LIMIT_WINDOW_SECS`: window length (default 60)

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use dashmap::DashMap;

/// Timestamps of recent admitted requests for one identity.
#[derive(Debug, Default)]
struct RequestWindow {
    hits: VecDeque<Instant>,
}

impl RequestWindow {
    /// Remove timestamps that have left the window ending at `now`.
    fn prune(&mut self, now: Instant, window: Duration) {
        // Concurrent callers may record slightly out of order, so no pop_front shortcut
        self.hits
            .retain(|hit| now.saturating_duration_since(*hit) < window);
    }

    fn active_at(&self, now: Instant, window: Duration) -> bool {
        self.hits
            .iter()
            .any(|hit| now.saturating_duration_since(*hit) < window)
    }
}

/// Decision returned by [`SlidingWindowLimiter::admit`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Admission {
    pub allowed: bool,
    /// Timestamps in the window after this decision.
    pub current_count: usize,
}

/// Sliding-window log limiter keyed by client identity.
#[derive(Debug)]
pub struct SlidingWindowLimiter {
    windows: DashMap<String, RequestWindow>,
    max_requests: usize,
    window: Duration,
}

impl SlidingWindowLimiter {
    pub fn new(max_requests: usize, window: Duration) -> Self {
        Self {
            windows: DashMap::new(),
            max_requests,
            window,
        }
    }

    pub fn max_requests(&self) -> usize {
        self.max_requests
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// Check and, when allowed, record a request for `identity` at `now`.
    ///
    /// A denial leaves the window untouched. Reporting it to the abuse
    /// tracker is the caller's job.
    pub fn admit(&self, identity: &str, now: Instant) -> Admission {
        let mut entry = self.windows.entry(identity.to_owned()).or_default();
        let window = entry.value_mut();
        window.prune(now, self.window);

        if window.hits.len() >= self.max_requests {
            return Admission {
                allowed: false,
                current_count: window.hits.len(),
            };
        }

        window.hits.push_back(now);
        Admission {
            allowed: true,
            current_count: window.hits.len(),
        }
    }

    /// Timestamps currently inside `identity`'s window, without recording.
    pub fn current_count(&self, identity: &str, now: Instant) -> usize {
        self.windows
            .get(identity)
            .map(|w| {
                w.hits
                    .iter()
                    .filter(|hit| now.saturating_duration_since(**hit) < self.window)
                    .count()
            })
            .unwrap_or(0)
    }

    /// Identities with at least one request inside their window.
    pub fn active_identities(&self, now: Instant) -> usize {
        self.windows
            .iter()
            .filter(|entry| entry.value().active_at(now, self.window))
            .count()
    }

    /// Every identity that currently has a window entry.
    pub fn tracked_identities(&self) -> Vec<String> {
        self.windows.iter().map(|entry| entry.key().clone()).collect()
    }

    pub fn tracked_len(&self) -> usize {
        self.windows.len()
    }

    /// Drop windows that are empty after pruning. Returns how many were removed.
    ///
    /// An empty window admits exactly like a missing one, so this never
    /// changes a future decision.
    pub fn evict_idle(&self, now: Instant) -> usize {
        let before = self.windows.len();
        self.windows.retain(|_, window| {
            window.prune(now, self.window);
            !window.hits.is_empty()
        });
        before.saturating_sub(self.windows.len())
    }
}
