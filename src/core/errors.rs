use axum::{http::StatusCode, response::IntoResponse, Json};
use serde_json::json;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("bad request: {0}")]
    BadRequest(String),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("payload too large: {0}")]
    PayloadTooLarge(String),
    #[error("unprocessable entity: {0}")]
    UnprocessableEntity(String),
    #[error("bad gateway: {0}")]
    BadGateway(String),
    #[error("gateway timeout: {0}")]
    GatewayTimeout(String),
    #[error("internal error: {0}")]
    Internal(String),
}

impl ApiError {
    pub fn internal<E: std::fmt::Display>(err: E) -> Self {
        ApiError::Internal(err.to_string())
    }

    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::PayloadTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            ApiError::UnprocessableEntity(_) => StatusCode::UNPROCESSABLE_ENTITY,
            ApiError::BadGateway(_) => StatusCode::BAD_GATEWAY,
            ApiError::GatewayTimeout(_) => StatusCode::GATEWAY_TIMEOUT,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        let status = self.status();
        let message = match self {
            ApiError::BadRequest(msg)
            | ApiError::Conflict(msg)
            | ApiError::PayloadTooLarge(msg)
            | ApiError::UnprocessableEntity(msg)
            | ApiError::BadGateway(msg)
            | ApiError::GatewayTimeout(msg)
            | ApiError::Internal(msg) => msg,
        };

        if status.is_server_error() {
            tracing::error!(%status, "{}", message);
        } else {
            tracing::warn!(%status, "{}", message);
        }

        let body = Json(json!({ "error": message }));
        (status, body).into_response()
    }
}

/// Failures of the document-to-answer pipeline.
///
/// None of these are recovered internally; each one ends the request and is
/// mapped to a response by the HTTP layer.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("upload rejected: {0}")]
    Upload(String),

    #[error("no document has been uploaded yet")]
    NoDocument,

    #[error("failed to extract text from '{path}': {message}")]
    Extraction { path: String, message: String },

    #[error("embedding service error: {0}")]
    EmbeddingService(String),

    #[error("generation service error: {0}")]
    GenerationService(String),

    #[error("{service} request timed out after {secs}s")]
    Timeout { service: &'static str, secs: u64 },

    #[error("invalid question: {0}")]
    InvalidQuestion(String),

    #[error("vector index error: {0}")]
    Index(String),

    #[error("storage error: {0}")]
    Storage(#[from] std::io::Error),

    #[error("invalid configuration: {0}")]
    Config(String),
}

impl From<PipelineError> for ApiError {
    fn from(err: PipelineError) -> Self {
        let message = err.to_string();
        match err {
            PipelineError::Upload(_) | PipelineError::InvalidQuestion(_) => {
                ApiError::BadRequest(message)
            }
            PipelineError::NoDocument => ApiError::Conflict(message),
            PipelineError::Extraction { .. } => ApiError::UnprocessableEntity(message),
            PipelineError::EmbeddingService(_) | PipelineError::GenerationService(_) => {
                ApiError::BadGateway(message)
            }
            PipelineError::Timeout { .. } => ApiError::GatewayTimeout(message),
            PipelineError::Index(_) | PipelineError::Storage(_) | PipelineError::Config(_) => {
                ApiError::Internal(message)
            }
        }
    }
}
