//! Application configuration loaded from environment variables.
//!
//! # Configuration Hierarchy
//!
//! All configuration is loaded from environment variables with defaults
//! suitable for development. In production, configure via environment
//! variables or a `.env` file.
//!
//! # Admission Policy
//!
//! - `MAX_REQUESTS_PER_MINUTE`: quota per window (default: 10)
//! - `RATE_LIMIT_WINDOW_SECS`: window length (default: 60)
//! - `MAX_FAILED_ATTEMPTS`: failures before a block (default: 5)
//! - `BLOCK_DURATION`: block length in seconds (default: 300)
//!
//! # Upload Limits
//!
//! - `MAX_FILE_SIZE`: bytes (default: 10 MiB)
//! - `MAX_IMAGE_WIDTH` / `MAX_IMAGE_HEIGHT`: pixels (default: 4000)
//!
//! # Security
//!
//! - `API_KEY`: optional shared secret; required for `/security-stats`
//! - `ALLOWED_HOSTS`: comma-separated `Host` allow list (default: `*`)
//! - `CORS_ORIGINS`: comma-separated origins (default: `*`)
//! - `TRUSTED_PROXIES`: CIDR ranges allowed to set forwarding headers
//!
//! # Inference
//!
//! - `INFERENCE_URL`: remote annotator endpoint; unset uses the built-in one
//! - `INFERENCE_TIMEOUT_SECS`: per-call deadline (default: 30)

use std::env;
use std::time::Duration;

use crate::error::{AppError, AppResult};
use crate::validation::UploadPolicy;

/// Application configuration loaded from environment variables.
///
/// # Example
///
/// ```rust,ignore
/// let config = Config::from_env()?;
/// println!("Server will listen on {}", config.server_addr());
/// ```
#[derive(Debug, Clone)]
pub struct Config {
    // =========================================================================
    // Server Configuration
    // =========================================================================
    /// Server host address (default: "0.0.0.0")
    pub host: String,

    /// Server port (default: 8000)
    pub port: u16,

    // =========================================================================
    // Admission Policy
    // =========================================================================
    /// Admitted requests per window per client (default: 10)
    pub max_requests_per_window: usize,

    /// Sliding window length (default: 60 seconds)
    pub rate_limit_window: Duration,

    /// Consecutive failures that trigger a block (default: 5)
    pub max_failed_attempts: u32,

    /// How long a block lasts (default: 300 seconds)
    pub block_duration: Duration,

    // =========================================================================
    // Upload Limits
    // =========================================================================
    /// Maximum upload size in bytes (default: 10MB)
    pub max_file_size: usize,

    /// Maximum image width in pixels (default: 4000)
    pub max_image_width: u32,

    /// Maximum image height in pixels (default: 4000)
    pub max_image_height: u32,

    // =========================================================================
    // Security Configuration
    // =========================================================================
    /// Shared secret checked against `X-API-Key`. `None` disables the
    /// optional check and locks `/security-stats`.
    pub api_key: Option<String>,

    /// Accepted `Host` header values without port; `*` accepts any.
    pub allowed_hosts: Vec<String>,

    /// Comma-separated list of allowed CORS origins
    /// Use "*" to allow all origins (not recommended for production)
    pub cors_allowed_origins: Vec<String>,

    /// Proxy networks whose forwarding headers are honoured.
    ///
    /// Format: Comma-separated CIDR notation (e.g., "10.0.0.0/8,172.16.0.0/12")
    /// Default: Empty (headers trusted verbatim; deploy behind a proxy that
    /// overwrites them)
    pub trusted_proxies: Vec<String>,

    // =========================================================================
    // Inference Configuration
    // =========================================================================
    /// Remote annotator endpoint. `None` selects the built-in annotator.
    pub inference_url: Option<String>,

    /// Deadline for one annotation call (default: 30 seconds)
    pub inference_timeout: Duration,

    // =========================================================================
    // Housekeeping
    // =========================================================================
    /// Abuse records idle this long without an active block are evicted
    /// (default: 4 x block duration)
    pub identity_idle_ttl: Duration,

    /// Interval between reaper passes (default: 60 seconds)
    pub reaper_interval: Duration,

    // =========================================================================
    // Observability Configuration
    // =========================================================================
    /// Port for Prometheus metrics endpoint (default: 9090, 0 = disabled)
    pub metrics_port: u16,
}

impl Config {
    /// Load configuration from environment variables with defaults.
    ///
    /// # Errors
    ///
    /// Returns `AppError::ConfigError` if any value fails to parse or the
    /// resulting configuration is inconsistent.
    pub fn from_env() -> AppResult<Self> {
        // Load an .env file if present (ignore errors if not found)
        let _ = dotenvy::dotenv();

        let block_duration = Duration::from_secs(Self::parse_env("BLOCK_DURATION", 300)?);

        let config = Self {
            // Server
            host: env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            port: Self::parse_env("PORT", 8000)?,

            // Admission policy
            max_requests_per_window: Self::parse_env("MAX_REQUESTS_PER_MINUTE", 10)?,
            rate_limit_window: Duration::from_secs(Self::parse_env("RATE_LIMIT_WINDOW_SECS", 60)?),
            max_failed_attempts: Self::parse_env("MAX_FAILED_ATTEMPTS", 5)?,
            block_duration,

            // Upload limits
            max_file_size: Self::parse_env("MAX_FILE_SIZE", 10 * 1024 * 1024)?, // 10MB
            max_image_width: Self::parse_env("MAX_IMAGE_WIDTH", 4000)?,
            max_image_height: Self::parse_env("MAX_IMAGE_HEIGHT", 4000)?,

            // Security
            api_key: env::var("API_KEY").ok().filter(|k| !k.is_empty()),
            allowed_hosts: Self::parse_list("ALLOWED_HOSTS", "*"),
            cors_allowed_origins: Self::parse_list("CORS_ORIGINS", "*"),
            trusted_proxies: Self::parse_list("TRUSTED_PROXIES", ""),

            // Inference
            inference_url: env::var("INFERENCE_URL").ok().filter(|u| !u.is_empty()),
            inference_timeout: Duration::from_secs(Self::parse_env("INFERENCE_TIMEOUT_SECS", 30)?),

            // Housekeeping
            identity_idle_ttl: Duration::from_secs(Self::parse_env(
                "IDENTITY_IDLE_TTL_SECS",
                block_duration.as_secs().saturating_mul(4),
            )?),
            reaper_interval: Duration::from_secs(Self::parse_env("REAPER_INTERVAL_SECS", 60)?),

            // Observability
            metrics_port: Self::parse_env("METRICS_PORT", 9090)?,
        };

        // Validate configuration before returning
        config.validate()?;

        Ok(config)
    }

    /// Validate configuration values for consistency and correctness.
    ///
    /// # Errors
    ///
    /// Returns `AppError::ConfigError` if validation fails.
    pub fn validate(&self) -> AppResult<()> {
        let positive = [
            ("MAX_REQUESTS_PER_MINUTE", self.max_requests_per_window as u64),
            ("RATE_LIMIT_WINDOW_SECS", self.rate_limit_window.as_secs()),
            ("MAX_FAILED_ATTEMPTS", u64::from(self.max_failed_attempts)),
            ("BLOCK_DURATION", self.block_duration.as_secs()),
            ("MAX_FILE_SIZE", self.max_file_size as u64),
            ("MAX_IMAGE_WIDTH", u64::from(self.max_image_width)),
            ("MAX_IMAGE_HEIGHT", u64::from(self.max_image_height)),
            ("INFERENCE_TIMEOUT_SECS", self.inference_timeout.as_secs()),
            ("REAPER_INTERVAL_SECS", self.reaper_interval.as_secs()),
        ];

        if let Some((name, _)) = positive.iter().find(|(_, value)| *value == 0) {
            return Err(AppError::ConfigError(format!(
                "{name} must be greater than 0"
            )));
        }

        // Shorter than a block and the reaper forgets failures between requests
        if self.identity_idle_ttl < self.block_duration {
            return Err(AppError::ConfigError(format!(
                "IDENTITY_IDLE_TTL_SECS ({}) must be at least BLOCK_DURATION ({})",
                self.identity_idle_ttl.as_secs(),
                self.block_duration.as_secs()
            )));
        }

        if self.allowed_hosts.is_empty() {
            return Err(AppError::ConfigError(
                "ALLOWED_HOSTS must list at least one host (use * for any)".to_string(),
            ));
        }

        Ok(())
    }

    /// Get the full server address for binding.
    pub fn server_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Size and dimension limits for uploads.
    pub fn upload_policy(&self) -> UploadPolicy {
        UploadPolicy {
            max_file_size: self.max_file_size,
            max_width: self.max_image_width,
            max_height: self.max_image_height,
        }
    }

    /// Check if API key authentication is enabled.
    pub fn auth_enabled(&self) -> bool {
        self.api_key.is_some()
    }

    /// Check if Prometheus metrics export is enabled.
    pub fn metrics_enabled(&self) -> bool {
        self.metrics_port > 0
    }

    /// Get the metrics endpoint address.
    ///
    /// Returns `None` if metrics are disabled (port = 0).
    pub fn metrics_addr(&self) -> Option<std::net::SocketAddr> {
        if self.metrics_enabled() {
            Some(std::net::SocketAddr::from((
                [0, 0, 0, 0],
                self.metrics_port,
            )))
        } else {
            None
        }
    }

    /// Parse an environment variable into the specified type with a default value.
    fn parse_env<T>(name: &str, default: T) -> AppResult<T>
    where
        T: std::str::FromStr,
        T::Err: std::fmt::Display,
    {
        match env::var(name) {
            Ok(val) => val
                .trim()
                .parse()
                .map_err(|e| AppError::ConfigError(format!("Invalid {name}: {e}"))),
            Err(_) => Ok(default),
        }
    }

    /// Parse a comma-separated list, dropping blank entries.
    fn parse_list(name: &str, default: &str) -> Vec<String> {
        split_list(&env::var(name).unwrap_or_else(|_| default.to_string()))
    }
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

/// Default configuration for testing and development.
///
/// Production deployments should use `Config::from_env()` instead.
impl Default for Config {
    fn default() -> Self {
        Self {
            // Server
            host: "0.0.0.0".to_string(),
            port: 8000,
            // Admission policy
            max_requests_per_window: 10,
            rate_limit_window: Duration::from_secs(60),
            max_failed_attempts: 5,
            block_duration: Duration::from_secs(300),
            // Upload limits
            max_file_size: 10 * 1024 * 1024, // 10MB
            max_image_width: 4000,
            max_image_height: 4000,
            // Security
            api_key: None,
            allowed_hosts: vec!["*".to_string()],
            cors_allowed_origins: vec!["*".to_string()],
            trusted_proxies: vec![], // Empty = trust forwarding headers verbatim
            // Inference
            inference_url: None,
            inference_timeout: Duration::from_secs(30),
            // Housekeeping
            identity_idle_ttl: Duration::from_secs(1200),
            reaper_interval: Duration::from_secs(60),
            // Observability
            metrics_port: 9090,
        }
    }
}
