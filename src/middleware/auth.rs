//! Optional API key check.
//!
//! The key is a shared secret compared for equality, nothing more. It is not
//! a token protocol and gives no cryptographic guarantees beyond avoiding an
//! early-exit comparison.
//!
//! # Behaviour
//!
//! On `POST /predict-image` the key is optional:
//!
//! | Header `X-API-Key`           | Result                          |
//! |------------------------------|---------------------------------|
//! | missing or empty             | [`Credential::Absent`], proceed |
//! | equal to `API_KEY`           | [`Credential::Verified`]        |
//! | anything else                | 403 `invalid_credential`        |
//!
//! `GET /security-stats` requires it via [`ApiKeyGate::require`].
//!
//! With no `API_KEY` configured the optional check is disabled and the
//! required check always fails.
//!
//! A wrong key is not fed to the abuse tracker.

use std::sync::Arc;

use axum::http::HeaderValue;
use subtle::ConstantTimeEq;
use tracing::{debug, warn};

use crate::error::{AppError, AppResult};

/// Header carrying the API key.
pub const API_KEY_HEADER: &str = "x-api-key";

/// Outcome of a passed credential check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Credential {
    /// No key was sent, or the gate is disabled.
    Absent,
    /// A key was sent and matched.
    Verified,
}

/// Shared-secret check for the `X-API-Key` header.
#[derive(Clone, Default)]
pub struct ApiKeyGate {
    expected: Option<Arc<str>>,
}

impl std::fmt::Debug for ApiKeyGate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiKeyGate")
            .field("enabled", &self.is_enabled())
            .finish()
    }
}

impl ApiKeyGate {
    /// `None` (or an empty key) disables the optional check.
    pub fn new(api_key: Option<String>) -> Self {
        Self {
            expected: api_key.filter(|k| !k.is_empty()).map(Arc::from),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.expected.is_some()
    }

    /// Optional check: only a present, non-matching key is rejected.
    pub fn check(&self, provided: Option<&HeaderValue>) -> AppResult<Credential> {
        let Some(expected) = self.expected.as_deref() else {
            return Ok(Credential::Absent);
        };

        match provided.filter(|v| !v.is_empty()) {
            None => Ok(Credential::Absent),
            Some(value) if constant_time_eq(value.as_bytes(), expected.as_bytes()) => {
                debug!("API key verified");
                Ok(Credential::Verified)
            }
            Some(_) => {
                warn!("Invalid API key provided");
                Err(AppError::InvalidCredential)
            }
        }
    }

    /// Mandatory check for operator endpoints.
    pub fn require(&self, provided: Option<&HeaderValue>) -> AppResult<()> {
        if self.expected.is_none() {
            warn!("Operator endpoint requested but no API_KEY is configured");
            return Err(AppError::InvalidCredential);
        }

        match self.check(provided)? {
            Credential::Verified => Ok(()),
            Credential::Absent => Err(AppError::InvalidCredential),
        }
    }
}

/// Byte comparison without early exit on the first mismatch.
fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    a.ct_eq(b).into()
}
