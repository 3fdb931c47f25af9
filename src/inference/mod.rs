//! The expensive step behind the gate.
//!
//! An [`ImageAnnotator`] takes a validated image buffer and returns an
//! annotated image. [`InferenceService`] wraps one with a deadline and maps
//! every failure to [`AppError::UpstreamFailure`].
//!
//! Backends:
//!
//! - [`FrameAnnotator`]: built in, runs on the blocking pool
//! - [`RemoteAnnotator`]: forwards the bytes to `INFERENCE_URL`

mod frame;
mod remote;

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use thiserror::Error;
use tracing::{error, info};

use crate::config::Config;
use crate::error::{AppError, AppResult};
use crate::metrics;

pub use frame::FrameAnnotator;
pub use remote::RemoteAnnotator;

#[derive(Debug, Error)]
pub enum AnnotationError {
    #[error("image processing failed: {0}")]
    Image(#[from] image::ImageError),

    #[error("backend request failed: {0}")]
    Backend(String),

    #[error("annotation task aborted: {0}")]
    Task(String),
}

/// Produces an annotated image from a validated upload.
#[async_trait]
pub trait ImageAnnotator: Send + Sync {
    /// Short backend name for health output and logs.
    fn name(&self) -> &str;

    fn is_ready(&self) -> bool;

    async fn annotate(&self, image: Vec<u8>) -> Result<Vec<u8>, AnnotationError>;
}

/// Deadline-bound access to the configured annotator.
#[derive(Clone)]
pub struct InferenceService {
    annotator: Arc<dyn ImageAnnotator>,
    timeout: Duration,
}

impl std::fmt::Debug for InferenceService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InferenceService")
            .field("backend", &self.annotator.name())
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl InferenceService {
    pub fn new(annotator: Arc<dyn ImageAnnotator>, timeout: Duration) -> Self {
        Self { annotator, timeout }
    }

    /// Remote backend when `INFERENCE_URL` is set, built-in otherwise.
    pub fn from_config(config: &Config) -> AppResult<Self> {
        let annotator: Arc<dyn ImageAnnotator> = match &config.inference_url {
            Some(url) => {
                info!(url = %url, "Using remote inference backend");
                Arc::new(RemoteAnnotator::new(url, config.inference_timeout)?)
            }
            None => {
                info!("Using built-in frame annotator");
                Arc::new(FrameAnnotator::new())
            }
        };
        Ok(Self::new(annotator, config.inference_timeout))
    }

    pub fn backend_name(&self) -> &str {
        self.annotator.name()
    }

    pub fn is_ready(&self) -> bool {
        self.annotator.is_ready()
    }

    /// Run the annotator under the configured deadline.
    ///
    /// On timeout the annotator future is dropped; admission state already
    /// committed for the request is left as is.
    pub async fn annotate(&self, image: Vec<u8>) -> AppResult<Vec<u8>> {
        let start = Instant::now();
        let result = tokio::time::timeout(self.timeout, self.annotator.annotate(image)).await;
        let elapsed = start.elapsed().as_secs_f64();

        match result {
            Ok(Ok(annotated)) => {
                metrics::record_inference_duration("ok", elapsed);
                Ok(annotated)
            }
            Ok(Err(e)) => {
                metrics::record_inference_duration("error", elapsed);
                error!(backend = self.annotator.name(), error = %e, "Annotation failed");
                Err(AppError::UpstreamFailure(e.to_string()))
            }
            Err(_) => {
                metrics::record_inference_duration("timeout", elapsed);
                error!(
                    backend = self.annotator.name(),
                    timeout_secs = self.timeout.as_secs(),
                    "Annotation timed out"
                );
                Err(AppError::UpstreamFailure(format!(
                    "annotation exceeded {:?}",
                    self.timeout
                )))
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    struct Echo;

    #[async_trait]
    impl ImageAnnotator for Echo {
        fn name(&self) -> &str {
            "echo"
        }

        fn is_ready(&self) -> bool {
            true
        }

        async fn annotate(&self, image: Vec<u8>) -> Result<Vec<u8>, AnnotationError> {
            Ok(image)
        }
    }

    struct Broken;

    #[async_trait]
    impl ImageAnnotator for Broken {
        fn name(&self) -> &str {
            "broken"
        }

        fn is_ready(&self) -> bool {
            false
        }

        async fn annotate(&self, _image: Vec<u8>) -> Result<Vec<u8>, AnnotationError> {
            Err(AnnotationError::Backend("model exploded".to_string()))
        }
    }

    struct Slow;

    #[async_trait]
    impl ImageAnnotator for Slow {
        fn name(&self) -> &str {
            "slow"
        }

        fn is_ready(&self) -> bool {
            true
        }

        async fn annotate(&self, image: Vec<u8>) -> Result<Vec<u8>, AnnotationError> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(image)
        }
    }

    #[tokio::test]
    async fn test_annotate_passes_through() {
        let service = InferenceService::new(Arc::new(Echo), Duration::from_secs(1));
        assert_eq!(service.annotate(vec![1, 2, 3]).await.unwrap(), vec![1, 2, 3]);
        assert_eq!(service.backend_name(), "echo");
        assert!(service.is_ready());
    }

    #[tokio::test]
    async fn test_backend_error_is_upstream_failure() {
        let service = InferenceService::new(Arc::new(Broken), Duration::from_secs(1));
        let err = service.annotate(vec![]).await.unwrap_err();
        assert!(matches!(err, AppError::UpstreamFailure(msg) if msg.contains("model exploded")));
    }

    #[tokio::test]
    async fn test_timeout_is_upstream_failure() {
        let service = InferenceService::new(Arc::new(Slow), Duration::from_millis(20));
        let err = service.annotate(vec![]).await.unwrap_err();
        assert!(matches!(err, AppError::UpstreamFailure(_)));
    }

    #[test]
    fn test_from_config_defaults_to_frame() {
        let service = InferenceService::from_config(&Config::default()).unwrap();
        assert_eq!(service.backend_name(), "frame");
    }
}
