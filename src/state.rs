//! Shared application state for Axum handlers.
//!
//! - **Gate**: all per-client admission state behind [`RequestGate`]
//! - **Inference**: the deadline-bound annotator
//! - **Configuration**: runtime configuration access
//!
//! # Thread Safety
//!
//! Gate tables are sharded maps with per-entry locking, so the state is
//! shared by `Arc` without any outer lock.
//!
//! # Structured Concurrency
//!
//! The idle-identity reaper is managed with `tokio_util::task::TaskTracker`
//! and `CancellationToken`. Call `shutdown()` to stop it before exit.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::time::interval;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info};

use crate::config::Config;
use crate::error::AppResult;
use crate::gate::RequestGate;
use crate::inference::{ImageAnnotator, InferenceService};

/// Shared application state for Axum handlers.
///
/// # Lifecycle
///
/// The reaper is spawned when the state is created, so construction must
/// happen inside a Tokio runtime. Call `shutdown()` before dropping:
///
/// ```rust,ignore
/// let state = AppState::new(config)?;
/// // ... serve ...
/// state.shutdown().await;
/// ```
#[derive(Clone)]
pub struct AppState {
    /// Application configuration
    pub config: Arc<Config>,
    /// Admission decisions and per-client state
    pub gate: Arc<RequestGate>,
    /// Annotator behind the gate
    pub inference: InferenceService,
    /// Timestamp when the application started
    pub started_at: Instant,
    /// Tracks spawned background tasks for graceful shutdown
    task_tracker: TaskTracker,
    /// Cancellation token for signaling background tasks to stop
    cancellation_token: CancellationToken,
}

impl AppState {
    /// Build state with the annotator selected by configuration.
    pub fn new(config: Config) -> AppResult<Self> {
        let inference = InferenceService::from_config(&config)?;
        Ok(Self::with_inference(config, inference))
    }

    /// Build state around a specific annotator.
    pub fn with_annotator(config: Config, annotator: Arc<dyn ImageAnnotator>) -> Self {
        let inference = InferenceService::new(annotator, config.inference_timeout);
        Self::with_inference(config, inference)
    }

    fn with_inference(config: Config, inference: InferenceService) -> Self {
        let gate = Arc::new(RequestGate::from_config(&config));

        let state = Self {
            config: Arc::new(config),
            gate,
            inference,
            started_at: Instant::now(),
            task_tracker: TaskTracker::new(),
            cancellation_token: CancellationToken::new(),
        };

        state.spawn_reaper_task();

        state
    }

    /// Spawn the idle-identity reaper.
    ///
    /// Only the gate is moved into the task, not the whole state.
    fn spawn_reaper_task(&self) {
        let gate = self.gate.clone();
        let every = self.config.reaper_interval;
        let idle_ttl = self.config.identity_idle_ttl;
        let cancel = self.cancellation_token.clone();

        self.task_tracker.spawn(async move {
            let mut ticker = interval(every);
            ticker.tick().await; // Skip the first immediate tick

            loop {
                tokio::select! {
                    biased;

                    _ = cancel.cancelled() => {
                        debug!("Reaper task received cancellation signal");
                        break;
                    }
                    _ = ticker.tick() => {
                        reap_once(&gate, idle_ttl);
                    }
                }
            }

            debug!("Reaper task shutting down");
        });
    }

    /// Gracefully shutdown all background tasks.
    ///
    /// 1. Signals all tasks to stop via cancellation token
    /// 2. Closes the task tracker (prevents new tasks)
    /// 3. Waits for all tasks to complete
    pub async fn shutdown(&self) {
        info!("Initiating graceful shutdown of background tasks");

        self.cancellation_token.cancel();
        self.task_tracker.close();
        self.task_tracker.wait().await;

        info!("All background tasks have completed");
    }

    /// Get the application uptime in seconds.
    pub fn uptime_seconds(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }
}

fn reap_once(gate: &RequestGate, idle_ttl: Duration) {
    let report = gate.reap(Instant::now(), idle_ttl);
    if report.windows > 0 || report.abuse_records > 0 {
        debug!(
            windows = report.windows,
            abuse_records = report.abuse_records,
            "Evicted idle identities"
        );
    }
}
