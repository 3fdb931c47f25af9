//! Request admission building blocks.
//!
//! - **Identity**: resolves the key all per-client state is tracked under
//! - **Rate Limiting**: sliding-window log per identity
//! - **Abuse Tracking**: failure counting and temporary blocks
//! - **API Key**: optional shared-secret check, constant-time comparison
//! - **Host Filter**: `ALLOWED_HOSTS` enforcement before routing
//!
//! The stateful pieces are composed by [`crate::gate::RequestGate`], which
//! owns the ordering between them.
//!
//! # Architecture
//!
//! ```text
//! Request → Host Filter → Router → ClientIdentity → RequestGate → Handler
//!               ↓                                       ↓
//!          400 bad host                     429 / 403 / 400 / 413
//! ```

pub mod abuse;
pub mod auth;
pub mod host;
pub mod ip;
pub mod rate_limit;

pub use abuse::{AbuseTracker, FailureReport};
pub use auth::{API_KEY_HEADER, ApiKeyGate, Credential};
pub use host::{AllowedHosts, filter_host};
pub use ip::{CidrRange, ClientIdentity, TrustedProxies, UNKNOWN_IP, resolve_identity};
pub use rate_limit::{Admission, SlidingWindowLimiter};
