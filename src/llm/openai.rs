//! OpenAI-compatible HTTP client used for both embeddings and chat
//! completions.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};

use super::provider::ChatProvider;
use super::types::ChatRequest;
use crate::core::config::settings::OpenAiSettings;
use crate::core::errors::PipelineError;
use crate::rag::Embedder;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Endpoint {
    Embeddings,
    ChatCompletions,
}

impl Endpoint {
    fn path(self) -> &'static str {
        match self {
            Endpoint::Embeddings => "embeddings",
            Endpoint::ChatCompletions => "chat/completions",
        }
    }

    fn label(self) -> &'static str {
        match self {
            Endpoint::Embeddings => "embeddings",
            Endpoint::ChatCompletions => "chat completion",
        }
    }

    fn error(self, message: String) -> PipelineError {
        match self {
            Endpoint::Embeddings => PipelineError::EmbeddingService(message),
            Endpoint::ChatCompletions => PipelineError::GenerationService(message),
        }
    }
}

struct CallFailure {
    error: PipelineError,
    retryable: bool,
}

impl CallFailure {
    fn fatal(error: PipelineError) -> Self {
        Self {
            error,
            retryable: false,
        }
    }
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Deserialize)]
struct EmbeddingData {
    #[serde(default)]
    index: Option<usize>,
    embedding: Vec<f32>,
}

#[derive(Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Deserialize)]
struct ChatChoiceMessage {
    content: Option<String>,
}

#[derive(Deserialize)]
struct ErrorResponse {
    error: ErrorDetail,
}

#[derive(Deserialize)]
struct ErrorDetail {
    message: String,
}

#[derive(Clone)]
pub struct OpenAiClient {
    client: Client,
    base_url: String,
    api_key: Option<String>,
    embedding_model: String,
    chat_model: String,
    timeout_secs: u64,
    retry_backoff: Duration,
}

impl OpenAiClient {
    pub fn from_settings(settings: &OpenAiSettings) -> Result<Self, PipelineError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(settings.request_timeout_secs))
            .build()
            .map_err(|err| PipelineError::Config(format!("failed to build HTTP client: {}", err)))?;

        Ok(Self {
            client,
            base_url: settings.base_url.trim_end_matches('/').to_string(),
            api_key: settings
                .api_key
                .as_deref()
                .map(str::trim)
                .filter(|key| !key.is_empty())
                .map(str::to_string),
            embedding_model: settings.embedding_model.clone(),
            chat_model: settings.chat_model.clone(),
            timeout_secs: settings.request_timeout_secs,
            retry_backoff: Duration::from_millis(settings.retry_backoff_ms),
        })
    }

    async fn post<T: DeserializeOwned>(
        &self,
        endpoint: Endpoint,
        body: &Value,
    ) -> Result<T, CallFailure> {
        let api_key = self.api_key.as_deref().ok_or_else(|| {
            CallFailure::fatal(endpoint.error(
                "missing API key (set OPENAI_API_KEY or openai.api_key)".to_string(),
            ))
        })?;

        let url = format!("{}/{}", self.base_url, endpoint.path());
        let response = self
            .client
            .post(&url)
            .bearer_auth(api_key)
            .json(body)
            .send()
            .await
            .map_err(|err| self.transport_failure(endpoint, err))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            let detail = serde_json::from_str::<ErrorResponse>(&text)
                .map(|e| e.error.message)
                .unwrap_or(text);
            tracing::error!(endpoint = endpoint.label(), %status, "OpenAI API error");

            let message = if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN
            {
                format!("authentication failed ({}): {}", status, detail)
            } else {
                format!("API returned {}: {}", status, detail)
            };
            return Err(CallFailure {
                error: endpoint.error(message),
                retryable: status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error(),
            });
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|err| self.transport_failure(endpoint, err))?;
        serde_json::from_slice::<T>(&bytes).map_err(|err| {
            tracing::error!(endpoint = endpoint.label(), error = %err, "failed to parse response");
            CallFailure::fatal(endpoint.error(format!("malformed response: {}", err)))
        })
    }

    fn transport_failure(&self, endpoint: Endpoint, err: reqwest::Error) -> CallFailure {
        if err.is_timeout() {
            return CallFailure::fatal(PipelineError::Timeout {
                service: endpoint.label(),
                secs: self.timeout_secs,
            });
        }
        tracing::error!(endpoint = endpoint.label(), error = %err, "request failed");
        CallFailure {
            error: endpoint.error(format!("request failed: {}", err)),
            retryable: true,
        }
    }
}

#[async_trait]
impl Embedder for OpenAiClient {
    fn name(&self) -> &str {
        "openai"
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, PipelineError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        tracing::debug!(
            batch_size = texts.len(),
            model = %self.embedding_model,
            "embedding batch"
        );

        let body = json!({
            "model": self.embedding_model,
            "input": texts,
        });

        let mut retried = false;
        let response: EmbeddingResponse = loop {
            match self.post(Endpoint::Embeddings, &body).await {
                Ok(response) => break response,
                Err(failure) if failure.retryable && !retried => {
                    retried = true;
                    tracing::warn!(
                        error = %failure.error,
                        backoff_ms = self.retry_backoff.as_millis() as u64,
                        "retrying embeddings request once"
                    );
                    tokio::time::sleep(self.retry_backoff).await;
                }
                Err(failure) => return Err(failure.error),
            }
        };

        into_ordered_vectors(response, texts.len())
    }
}

#[async_trait]
impl ChatProvider for OpenAiClient {
    fn name(&self) -> &str {
        "openai"
    }

    async fn complete(&self, request: ChatRequest) -> Result<String, PipelineError> {
        let mut body = json!({
            "model": self.chat_model,
            "messages": request.messages,
        });

        if let Some(obj) = body.as_object_mut() {
            if let Some(t) = request.temperature {
                obj.insert("temperature".to_string(), json!(t));
            }
        }

        let response: ChatCompletionResponse = self
            .post(Endpoint::ChatCompletions, &body)
            .await
            .map_err(|failure| failure.error)?;

        response
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| {
                PipelineError::GenerationService(
                    "malformed response: no message content".to_string(),
                )
            })
    }
}

fn into_ordered_vectors(
    response: EmbeddingResponse,
    expected: usize,
) -> Result<Vec<Vec<f32>>, PipelineError> {
    let mut data = response.data;
    if data.len() != expected {
        return Err(PipelineError::EmbeddingService(format!(
            "malformed response: {} embeddings for {} inputs",
            data.len(),
            expected
        )));
    }

    if data.iter().all(|item| item.index.is_some()) {
        data.sort_by_key(|item| item.index);
        let in_sequence = data
            .iter()
            .enumerate()
            .all(|(position, item)| item.index == Some(position));
        if !in_sequence {
            return Err(PipelineError::EmbeddingService(
                "malformed response: embedding indices do not match inputs".to_string(),
            ));
        }
    }

    Ok(data.into_iter().map(|item| item.embedding).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::types::ChatMessage;
    use axum::http::HeaderMap;
    use axum::routing::post;
    use axum::{Json, Router};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    async fn spawn_mock(router: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        format!("http://{}/v1", addr)
    }

    fn client_for(base_url: &str, api_key: Option<&str>) -> OpenAiClient {
        OpenAiClient::from_settings(&OpenAiSettings {
            base_url: base_url.to_string(),
            api_key: api_key.map(str::to_string),
            request_timeout_secs: 1,
            retry_backoff_ms: 10,
            ..Default::default()
        })
        .unwrap()
    }

    fn inputs(texts: &[&str]) -> Vec<String> {
        texts.iter().map(|t| t.to_string()).collect()
    }

    fn bearer(headers: &HeaderMap) -> Option<String> {
        headers
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
    }

    #[tokio::test]
    async fn embeddings_follow_response_indices() {
        let router = Router::new().route(
            "/v1/embeddings",
            post(|headers: HeaderMap, Json(body): Json<Value>| async move {
                if bearer(&headers).as_deref() != Some("Bearer sk-test") {
                    return (StatusCode::UNAUTHORIZED, Json(json!({})));
                }
                let count = body["input"].as_array().map(Vec::len).unwrap_or(0);
                let mut data: Vec<Value> = (0..count)
                    .map(|i| json!({ "index": i, "embedding": [i as f32, 1.0] }))
                    .collect();
                data.reverse();
                (StatusCode::OK, Json(json!({ "data": data })))
            }),
        );
        let base_url = spawn_mock(router).await;
        let client = client_for(&base_url, Some("sk-test"));

        let vectors = client.embed(&inputs(&["a", "b", "c"])).await.unwrap();

        assert_eq!(
            vectors,
            vec![vec![0.0, 1.0], vec![1.0, 1.0], vec![2.0, 1.0]]
        );
    }

    #[tokio::test]
    async fn missing_key_fails_without_network_call() {
        let client = client_for("http://127.0.0.1:9/v1", None);

        let err = client.embed(&inputs(&["a"])).await.unwrap_err();
        assert!(matches!(err, PipelineError::EmbeddingService(ref msg) if msg.contains("missing API key")));

        let err = client
            .complete(ChatRequest::new(vec![ChatMessage::user("hi")]))
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::GenerationService(_)));
    }

    #[tokio::test]
    async fn authentication_failure_is_not_retried() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let router = Router::new().route(
            "/v1/embeddings",
            post(move || {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    (
                        StatusCode::UNAUTHORIZED,
                        Json(json!({ "error": { "message": "Incorrect API key provided" } })),
                    )
                }
            }),
        );
        let base_url = spawn_mock(router).await;
        let client = client_for(&base_url, Some("sk-wrong"));

        let err = client.embed(&inputs(&["a"])).await.unwrap_err();

        assert!(
            matches!(err, PipelineError::EmbeddingService(ref msg) if msg.contains("Incorrect API key"))
        );
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn server_error_is_retried_once() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let router = Router::new().route(
            "/v1/embeddings",
            post(move || {
                let counter = counter.clone();
                async move {
                    if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                        return (StatusCode::SERVICE_UNAVAILABLE, Json(json!({})));
                    }
                    (
                        StatusCode::OK,
                        Json(json!({ "data": [{ "index": 0, "embedding": [0.5, 0.5] }] })),
                    )
                }
            }),
        );
        let base_url = spawn_mock(router).await;
        let client = client_for(&base_url, Some("sk-test"));

        let vectors = client.embed(&inputs(&["a"])).await.unwrap();

        assert_eq!(vectors, vec![vec![0.5, 0.5]]);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn wrong_embedding_count_is_malformed() {
        let router = Router::new().route(
            "/v1/embeddings",
            post(|| async {
                Json(json!({ "data": [{ "index": 0, "embedding": [1.0] }] }))
            }),
        );
        let base_url = spawn_mock(router).await;
        let client = client_for(&base_url, Some("sk-test"));

        let err = client.embed(&inputs(&["a", "b"])).await.unwrap_err();
        assert!(matches!(err, PipelineError::EmbeddingService(ref msg) if msg.contains("malformed")));
    }

    #[tokio::test]
    async fn chat_returns_message_content_unmodified() {
        let router = Router::new().route(
            "/v1/chat/completions",
            post(|Json(body): Json<Value>| async move {
                let model = body["model"].as_str().unwrap_or_default().to_string();
                let prompt = body["messages"][0]["content"].as_str().unwrap_or_default();
                Json(json!({
                    "choices": [{
                        "message": { "role": "assistant", "content": format!("  {} saw {} chars\n", model, prompt.len()) }
                    }]
                }))
            }),
        );
        let base_url = spawn_mock(router).await;
        let client = client_for(&base_url, Some("sk-test"));

        let text = client
            .complete(ChatRequest::new(vec![ChatMessage::user("hello")]))
            .await
            .unwrap();

        assert_eq!(text, "  gpt-3.5-turbo saw 5 chars\n");
    }

    #[tokio::test]
    async fn chat_body_carries_model_messages_and_temperature_only() {
        let router = Router::new().route(
            "/v1/chat/completions",
            post(|Json(body): Json<Value>| async move {
                let mut keys: Vec<String> = body
                    .as_object()
                    .map(|obj| obj.keys().cloned().collect())
                    .unwrap_or_default();
                keys.sort();
                Json(json!({
                    "choices": [{ "message": { "content": keys.join(",") } }]
                }))
            }),
        );
        let base_url = spawn_mock(router).await;
        let client = client_for(&base_url, Some("sk-test"));

        let bare = client
            .complete(ChatRequest::new(vec![ChatMessage::user("hi")]))
            .await
            .unwrap();
        assert_eq!(bare, "messages,model");

        let tuned = client
            .complete(ChatRequest::new(vec![ChatMessage::user("hi")]).with_temperature(Some(0.3)))
            .await
            .unwrap();
        assert_eq!(tuned, "messages,model,temperature");
    }

    #[tokio::test]
    async fn chat_failure_is_generation_error_without_retry() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let router = Router::new().route(
            "/v1/chat/completions",
            post(move || {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    (StatusCode::INTERNAL_SERVER_ERROR, Json(json!({})))
                }
            }),
        );
        let base_url = spawn_mock(router).await;
        let client = client_for(&base_url, Some("sk-test"));

        let err = client
            .complete(ChatRequest::new(vec![ChatMessage::user("hi")]))
            .await
            .unwrap_err();

        assert!(matches!(err, PipelineError::GenerationService(_)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn chat_without_content_is_malformed() {
        let router = Router::new().route(
            "/v1/chat/completions",
            post(|| async { Json(json!({ "choices": [] })) }),
        );
        let base_url = spawn_mock(router).await;
        let client = client_for(&base_url, Some("sk-test"));

        let err = client
            .complete(ChatRequest::new(vec![ChatMessage::user("hi")]))
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::GenerationService(ref msg) if msg.contains("malformed")));
    }

    #[tokio::test]
    async fn slow_service_surfaces_as_timeout() {
        let router = Router::new().route(
            "/v1/chat/completions",
            post(|| async {
                tokio::time::sleep(Duration::from_secs(3)).await;
                Json(json!({ "choices": [] }))
            }),
        );
        let base_url = spawn_mock(router).await;
        let client = client_for(&base_url, Some("sk-test"));

        let err = client
            .complete(ChatRequest::new(vec![ChatMessage::user("hi")]))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            PipelineError::Timeout {
                service: "chat completion",
                secs: 1
            }
        ));
    }
}
