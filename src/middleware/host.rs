//! `Host` header allow list.
//!
//! Configured from `ALLOWED_HOSTS`. Entries are matched case-insensitively
//! against the `Host` header with any port removed:
//!
//! - `*` accepts every request, including ones without a `Host` header
//! - `*.example.com` accepts any subdomain of `example.com` (not the apex)
//! - anything else must match exactly
//!
//! Rejected requests get 400 before routing, so they never touch admission
//! state.

use std::sync::Arc;

use axum::extract::{Request, State};
use axum::http::header::HOST;
use axum::middleware::Next;
use axum::response::Response;
use tracing::debug;

use crate::error::AppError;

/// Parsed `ALLOWED_HOSTS`.
#[derive(Debug, Clone, Default)]
pub struct AllowedHosts {
    any: bool,
    exact: Vec<String>,
    suffixes: Vec<String>,
}

impl AllowedHosts {
    pub fn new(entries: &[String]) -> Self {
        let mut hosts = Self::default();
        for entry in entries {
            let entry = entry.trim().to_ascii_lowercase();
            if entry == "*" {
                hosts.any = true;
            } else if let Some(domain) = entry.strip_prefix("*.") {
                hosts.suffixes.push(format!(".{domain}"));
            } else if !entry.is_empty() {
                hosts.exact.push(entry);
            }
        }
        hosts
    }

    pub fn allows_any(&self) -> bool {
        self.any
    }

    /// Whether a raw `Host` header value is acceptable.
    pub fn allows(&self, host_header: Option<&str>) -> bool {
        if self.any {
            return true;
        }
        let Some(raw) = host_header else {
            return false;
        };

        let host = strip_port(raw.trim()).to_ascii_lowercase();
        self.exact.iter().any(|h| *h == host)
            || self.suffixes.iter().any(|suffix| host.ends_with(suffix.as_str()))
    }
}

/// Remove a trailing `:port`, keeping IPv6 literals in brackets intact.
fn strip_port(host: &str) -> &str {
    if host.starts_with('[') {
        return match host.find(']') {
            Some(end) => host.get(..=end).unwrap_or(host),
            None => host,
        };
    }

    match host.rsplit_once(':') {
        Some((name, port)) if !port.is_empty() && port.bytes().all(|b| b.is_ascii_digit()) => {
            name
        }
        _ => host,
    }
}

/// Middleware rejecting requests whose `Host` is not in the allow list.
pub async fn filter_host(
    State(allowed): State<Arc<AllowedHosts>>,
    request: Request,
    next: Next,
) -> Result<Response, AppError> {
    if allowed.allows_any() {
        return Ok(next.run(request).await);
    }

    let host = request
        .headers()
        .get(HOST)
        .and_then(|v| v.to_str().ok())
        .or_else(|| request.uri().authority().map(|a| a.as_str()));

    if allowed.allows(host) {
        Ok(next.run(request).await)
    } else {
        debug!(host = ?host, "Rejected request with disallowed Host header");
        Err(AppError::InvalidHost(host.unwrap_or("<none>").to_string()))
    }
}
