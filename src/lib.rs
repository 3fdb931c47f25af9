//! # Inference Gate
//!
//! Admission layer in front of an expensive image inference endpoint:
//!
//! - **Rate Limiting**: sliding-window log per client identity
//! - **Abuse Blocking**: repeated failures escalate to a temporary block
//! - **Payload Screening**: magic numbers, active-content scan, size and
//!   pixel limits before any decode-heavy work
//! - **Observability**: request IDs, structured logging, Prometheus metrics
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      Axum HTTP Server                       │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Layers (Request ID → Trace → Host Filter → CORS)           │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Handlers (predict-image, health, security-stats)           │
//! ├─────────────────────────────────────────────────────────────┤
//! │  RequestGate                                                │
//! │    SlidingWindowLimiter · AbuseTracker · PayloadValidator   │
//! ├─────────────────────────────────────────────────────────────┤
//! │  InferenceService (frame or remote annotator, with timeout) │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::net::SocketAddr;
//! use inference_gate::{AppState, Config, build_router};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::from_env()?;
//!     let state = AppState::new(config)?;
//!     let app = build_router(state);
//!
//!     let listener = tokio::net::TcpListener::bind("0.0.0.0:8000").await?;
//!     axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>()).await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Deployment
//!
//! Client identity is taken from `X-Forwarded-For` / `X-Real-IP` when
//! present. Run behind a proxy that overwrites those headers, or set
//! `TRUSTED_PROXIES`.

pub mod config;
pub mod error;
pub mod gate;
pub mod handlers;
pub mod inference;
pub mod metrics;
pub mod middleware;
pub mod models;
pub mod routes;
pub mod state;
pub mod utils;
pub mod validation;

// Re-exports for convenience
pub use config::Config;
pub use error::{AppError, AppResult};
pub use gate::RequestGate;
pub use inference::{AnnotationError, ImageAnnotator, InferenceService};
pub use routes::build_router;
pub use state::AppState;
pub use validation::{PayloadValidator, ValidationFailure};
