use thiserror::Error;

use crate::core::errors::{ApiError, PipelineError};

#[derive(Debug, Error)]
pub enum InitializationError {
    #[error("Failed to load configuration: {0}")]
    Config(#[source] ApiError),

    #[error("Failed to initialize QA pipeline: {0}")]
    Pipeline(#[source] PipelineError),
}
