//! Guarded image inference endpoint.
//!
//! # Endpoint
//!
//! - `POST /predict-image` - multipart upload, field name `file`
//!
//! # Check Order
//!
//! 1. Client identity (`X-Forwarded-For`, `X-Real-IP`, peer address)
//! 2. Active block (429)
//! 3. Sliding-window rate limit (429)
//! 4. Optional `X-API-Key` (403)
//! 5. Part content type starts with `image/` (400)
//! 6. Upload size, enforced while streaming (413)
//! 7. Signature and active-content scan (400)
//! 8. Pixel dimensions (413)
//! 9. Annotation (500 on failure)
//!
//! The multipart body is not read until steps 1-4 have passed.
//!
//! The built-in annotator always returns PNG. A remote backend may answer in
//! another format, so the response is labelled from the output's magic number.

use std::time::Instant;

use axum::extract::multipart::{Field, MultipartError, MultipartRejection};
use axum::extract::{Multipart, State};
use axum::http::header::{CONTENT_DISPOSITION, CONTENT_TYPE, X_CONTENT_TYPE_OPTIONS, X_FRAME_OPTIONS};
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use tracing::{info, instrument};

use crate::error::{AppError, AppResult};
use crate::gate::RequestGate;
use crate::middleware::{API_KEY_HEADER, ClientIdentity};
use crate::state::AppState;
use crate::validation::detect_signature;

/// Multipart field carrying the image.
pub const UPLOAD_FIELD: &str = "file";

/// Run an upload through the gate and return the annotated image.
///
/// # Success Response
///
/// `200 OK`, `Content-Type: image/png`,
/// `Content-Disposition: inline; filename=detections.png` (or the detected
/// format of the annotator output),
/// `X-Content-Type-Options: nosniff`, `X-Frame-Options: DENY`.
#[instrument(skip_all, fields(client = %identity))]
pub async fn predict_image(
    State(state): State<AppState>,
    identity: ClientIdentity,
    headers: HeaderMap,
    multipart: Result<Multipart, MultipartRejection>,
) -> AppResult<impl IntoResponse> {
    let gate = &state.gate;
    let client = identity.as_str();

    gate.admit(client, Instant::now())?;
    gate.check_credential(headers.get(API_KEY_HEADER))?;

    let mut multipart = multipart.map_err(|rejection| {
        gate.reject(
            client,
            AppError::MalformedUpload(rejection.body_text()),
            Instant::now(),
        )
    })?;

    let upload = read_upload(gate, client, &mut multipart).await?;
    let dims = gate.inspect(client, &upload, Instant::now())?;

    let annotated = match state.inference.annotate(upload).await {
        Ok(annotated) => annotated,
        Err(err) => return Err(gate.reject(client, err, Instant::now())),
    };

    gate.record_success(client);
    info!(
        width = dims.width,
        height = dims.height,
        output_bytes = annotated.len(),
        "Prediction served"
    );

    let (content_type, disposition) = output_labels(&annotated);

    Ok((
        StatusCode::OK,
        [
            (CONTENT_TYPE, content_type.to_string()),
            (CONTENT_DISPOSITION, disposition),
            (X_CONTENT_TYPE_OPTIONS, "nosniff".to_string()),
            (X_FRAME_OPTIONS, "DENY".to_string()),
        ],
        annotated,
    ))
}

/// Find the `file` field, check its content type, and read it under the
/// size limit.
async fn read_upload(
    gate: &RequestGate,
    client: &str,
    multipart: &mut Multipart,
) -> AppResult<Vec<u8>> {
    loop {
        let field = multipart
            .next_field()
            .await
            .map_err(|e| multipart_failure(gate, client, e))?;

        let Some(field) = field else {
            let err = AppError::MalformedUpload(format!("missing `{UPLOAD_FIELD}` field"));
            return Err(gate.reject(client, err, Instant::now()));
        };

        if field.name() != Some(UPLOAD_FIELD) {
            continue;
        }

        gate.check_content_type(client, field.content_type(), Instant::now())?;
        return read_field(gate, client, field).await;
    }
}

async fn read_field(gate: &RequestGate, client: &str, mut field: Field<'_>) -> AppResult<Vec<u8>> {
    let mut buf = Vec::new();

    while let Some(chunk) = field
        .chunk()
        .await
        .map_err(|e| multipart_failure(gate, client, e))?
    {
        // Stop reading as soon as the limit is crossed
        gate.check_size(client, buf.len().saturating_add(chunk.len()), Instant::now())?;
        buf.extend_from_slice(&chunk);
    }

    Ok(buf)
}

/// A body cut off by the request body limit is an oversize upload, anything
/// else is broken framing.
fn multipart_failure(gate: &RequestGate, client: &str, e: MultipartError) -> AppError {
    let err = if e.status() == StatusCode::PAYLOAD_TOO_LARGE {
        AppError::PayloadTooLarge {
            size: gate.policy().max_file_size.saturating_add(1),
            max: gate.policy().max_file_size,
        }
    } else {
        AppError::MalformedUpload(e.body_text())
    };
    gate.reject(client, err, Instant::now())
}

/// Content type and disposition for annotator output. Unrecognised bytes are
/// served as an opaque download.
fn output_labels(image: &[u8]) -> (&'static str, String) {
    match detect_signature(image) {
        Some(signature) => (
            signature.mime_type(),
            format!("inline; filename=detections.{}", signature.extension()),
        ),
        None => (
            "application/octet-stream",
            "attachment; filename=detections.bin".to_string(),
        ),
    }
}
