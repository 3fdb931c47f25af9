use axum::http::{HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use thiserror::Error;

use crate::validation::ValidationFailure;

/// Application-wide error types with appropriate HTTP status codes.
///
/// # Admission Rejections
///
/// The first group of variants are the outcomes of the admission pipeline.
/// [`AppError::counts_as_failure`] decides which of them move the client
/// toward a block:
///
/// | Variant                  | Status | Counted |
/// |--------------------------|--------|---------|
/// | `Blocked`                | 429    | no      |
/// | `RateLimited`            | 429    | yes     |
/// | `InvalidCredential`      | 403    | no      |
/// | `UnsupportedContentType` | 400    | yes     |
/// | `PayloadTooLarge`        | 413    | no      |
/// | `InvalidPayload`         | 400    | yes     |
/// | `DimensionTooLarge`      | 413    | no      |
/// | `MalformedUpload`        | 400    | yes     |
/// | `UpstreamFailure`        | 500    | no      |
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Client temporarily blocked ({retry_after_secs}s remaining)")]
    Blocked { retry_after_secs: u64 },

    #[error("Rate limit exceeded: {limit} requests per {window_secs}s")]
    RateLimited { limit: usize, window_secs: u64 },

    #[error("Invalid API key")]
    InvalidCredential,

    #[error("Unsupported content type: {}", .0.as_deref().unwrap_or("<none>"))]
    UnsupportedContentType(Option<String>),

    #[error("Payload too large: {size} bytes (max {max})")]
    PayloadTooLarge { size: usize, max: usize },

    #[error("Invalid payload: {0}")]
    InvalidPayload(ValidationFailure),

    #[error("Image too large: {width}x{height} (max {max_width}x{max_height})")]
    DimensionTooLarge {
        width: u32,
        height: u32,
        max_width: u32,
        max_height: u32,
    },

    #[error("Malformed upload: {0}")]
    MalformedUpload(String),

    #[error("Invalid host header: {0}")]
    InvalidHost(String),

    #[error("Inference failed: {0}")]
    UpstreamFailure(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Internal server error: {0}")]
    Internal(String),
}

impl AppError {
    /// Whether this rejection increments the client's failure counter.
    pub fn counts_as_failure(&self) -> bool {
        matches!(
            self,
            AppError::RateLimited { .. }
                | AppError::UnsupportedContentType(_)
                | AppError::InvalidPayload(_)
                | AppError::MalformedUpload(_)
        )
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::Blocked { .. } | AppError::RateLimited { .. } => {
                StatusCode::TOO_MANY_REQUESTS
            }
            AppError::InvalidCredential => StatusCode::FORBIDDEN,
            AppError::PayloadTooLarge { .. } | AppError::DimensionTooLarge { .. } => {
                StatusCode::PAYLOAD_TOO_LARGE
            }
            AppError::UnsupportedContentType(_)
            | AppError::InvalidPayload(_)
            | AppError::MalformedUpload(_)
            | AppError::InvalidHost(_) => StatusCode::BAD_REQUEST,
            AppError::UpstreamFailure(_) | AppError::ConfigError(_) | AppError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Stable machine-readable code used in the `error` field.
    pub fn kind(&self) -> &'static str {
        match self {
            AppError::Blocked { .. } => "blocked",
            AppError::RateLimited { .. } => "rate_limited",
            AppError::InvalidCredential => "invalid_credential",
            AppError::UnsupportedContentType(_) => "unsupported_content_type",
            AppError::PayloadTooLarge { .. } => "payload_too_large",
            AppError::InvalidPayload(_) => "invalid_payload",
            AppError::DimensionTooLarge { .. } => "dimension_too_large",
            AppError::MalformedUpload(_) => "malformed_upload",
            AppError::InvalidHost(_) => "invalid_host",
            AppError::UpstreamFailure(_) => "upstream_failure",
            AppError::ConfigError(_) => "config_error",
            AppError::Internal(_) => "internal_error",
        }
    }

    /// Message safe to show to clients.
    fn public_message(&self) -> String {
        match self {
            AppError::Blocked { .. } => {
                "Client temporarily blocked due to suspicious activity".to_string()
            }
            AppError::RateLimited { limit, window_secs } => {
                format!("Rate limit exceeded. Maximum {limit} requests per {window_secs} seconds")
            }
            AppError::InvalidCredential => "Invalid API key".to_string(),
            AppError::UnsupportedContentType(_) => "The uploaded file must be an image".to_string(),
            AppError::PayloadTooLarge { max, .. } => {
                format!("File too large. Maximum {max} bytes")
            }
            AppError::InvalidPayload(_) => "Invalid or suspicious image file".to_string(),
            AppError::DimensionTooLarge {
                max_width,
                max_height,
                ..
            } => format!("Image too large. Maximum {max_width}x{max_height} pixels"),
            AppError::MalformedUpload(reason) => format!("Malformed upload: {reason}"),
            AppError::InvalidHost(_) => "Invalid host header".to_string(),
            // Never expose upstream or internal details to clients
            AppError::UpstreamFailure(_) => {
                "Image processing failed. Please try again later.".to_string()
            }
            AppError::ConfigError(_) => {
                "Service configuration error. Please contact support.".to_string()
            }
            AppError::Internal(_) => {
                "An internal error occurred. Please contact support if the issue persists."
                    .to_string()
            }
        }
    }
}

/// Error response body for API endpoints.
#[derive(Serialize)]
struct ErrorResponse {
    error: &'static str,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();

        // Full detail stays in the server log
        if status.is_server_error() {
            tracing::error!(error = %self, "Request failed");
        } else {
            tracing::warn!(error = %self, "Request rejected");
        }

        let body = ErrorResponse {
            error: self.kind(),
            message: self.public_message(),
        };
        let mut response = (status, axum::Json(body)).into_response();

        match &self {
            AppError::Blocked { retry_after_secs } => {
                response
                    .headers_mut()
                    .insert(header::RETRY_AFTER, HeaderValue::from(*retry_after_secs));
            }
            AppError::RateLimited { limit, window_secs } => {
                let headers = response.headers_mut();
                headers.insert(header::RETRY_AFTER, HeaderValue::from(*window_secs));
                headers.insert("x-ratelimit-limit", HeaderValue::from(*limit));
            }
            _ => {}
        }

        response
    }
}

/// Convenience type alias for Results with AppError.
pub type AppResult<T> = Result<T, AppError>;
