use async_trait::async_trait;

use super::types::ChatRequest;
use crate::core::errors::PipelineError;

#[async_trait]
pub trait ChatProvider: Send + Sync {
    /// return the provider name (e.g. "openai")
    fn name(&self) -> &str;

    /// chat completion (non-streaming); the returned text is passed through
    /// untouched, failures are `GenerationService` or `Timeout`
    async fn complete(&self, request: ChatRequest) -> Result<String, PipelineError>;
}
