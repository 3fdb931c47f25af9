use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use tracing::debug;

use super::{AnnotationError, ImageAnnotator};
use crate::error::{AppError, AppResult};

/// Forwards validated uploads to an external inference server.
///
/// The request body is the raw image; a 2xx response body is taken as the
/// annotated image.
#[derive(Debug, Clone)]
pub struct RemoteAnnotator {
    client: reqwest::Client,
    url: String,
}

impl RemoteAnnotator {
    pub fn new(url: &str, timeout: Duration) -> AppResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AppError::ConfigError(format!("Invalid INFERENCE_URL client: {e}")))?;

        Ok(Self {
            client,
            url: url.to_string(),
        })
    }
}

#[async_trait]
impl ImageAnnotator for RemoteAnnotator {
    fn name(&self) -> &str {
        "remote"
    }

    fn is_ready(&self) -> bool {
        true
    }

    async fn annotate(&self, image: Vec<u8>) -> Result<Vec<u8>, AnnotationError> {
        let size = image.len();
        let response = self
            .client
            .post(&self.url)
            .header(CONTENT_TYPE, "application/octet-stream")
            .body(image)
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            .map_err(|e| AnnotationError::Backend(e.to_string()))?;

        let body = response
            .bytes()
            .await
            .map_err(|e| AnnotationError::Backend(e.to_string()))?;

        debug!(sent = size, received = body.len(), "Remote annotation complete");
        Ok(body.to_vec())
    }
}
