use std::sync::Arc;

use axum::extract::multipart::{MultipartError, MultipartRejection};
use axum::extract::{Multipart, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde_json::json;

use crate::core::errors::{ApiError, PipelineError};
use crate::state::AppState;

const FILE_FIELD: &str = "file";

/// Accepts a multipart upload with the document in the `file` field and makes
/// it the current document. Replies with the storage path in plain text.
pub async fn upload(
    State(state): State<Arc<AppState>>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<String, ApiError> {
    let mut multipart = multipart.map_err(|rejection| {
        ApiError::from(PipelineError::Upload(rejection.body_text()))
    })?;

    while let Some(field) = multipart.next_field().await.map_err(multipart_error)? {
        if field.name() != Some(FILE_FIELD) {
            continue;
        }

        let file_name = field
            .file_name()
            .map(str::to_string)
            .ok_or_else(|| PipelineError::Upload("the file field has no file name".to_string()))?;
        let bytes = field.bytes().await.map_err(multipart_error)?;

        let document = state.pipeline.upload(&file_name, &bytes).await?;
        return Ok(format!("{} upload successfully.", document.storage_path()));
    }

    Err(PipelineError::Upload(format!(
        "no file attached (expected multipart field '{}')",
        FILE_FIELD
    ))
    .into())
}

pub async fn current_document(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    match state.pipeline.current_document().await {
        Some(document) => Json(json!({
            "state": "document_ready",
            "path": document.storage_path(),
            "file_name": document.file_name,
            "size_bytes": document.size_bytes,
            "sha256": document.sha256,
            "version": document.version,
            "uploaded_at": document.uploaded_at,
        })),
        None => Json(json!({ "state": "no_document" })),
    }
}

fn multipart_error(err: MultipartError) -> ApiError {
    if err.status() == StatusCode::PAYLOAD_TOO_LARGE {
        ApiError::PayloadTooLarge(err.body_text())
    } else {
        PipelineError::Upload(err.body_text()).into()
    }
}
