use std::sync::Arc;

use axum::extract::{Query, State};
use axum::response::IntoResponse;
use axum::Json;
use serde::Deserialize;
use serde_json::json;

use crate::core::errors::{ApiError, PipelineError};
use crate::pipeline::Answer;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct ChatQuery {
    #[serde(default)]
    pub question: Option<String>,
}

async fn answer(state: &AppState, query: ChatQuery) -> Result<Answer, ApiError> {
    let question = query.question.ok_or_else(|| {
        PipelineError::InvalidQuestion("missing 'question' query parameter".to_string())
    })?;
    Ok(state.pipeline.ask(&question).await?)
}

/// Plain-text answer, the body the upload page renders.
pub async fn chat(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ChatQuery>,
) -> Result<String, ApiError> {
    Ok(answer(&state, query).await?.text)
}

/// Answer plus the scored segments it was grounded on.
pub async fn chat_json(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ChatQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let answer = answer(&state, query).await?;
    let sources = answer
        .sources
        .iter()
        .map(|scored| {
            json!({
                "position": scored.segment.position,
                "score": scored.score,
                "text": scored.segment.text,
            })
        })
        .collect::<Vec<_>>();

    Ok(Json(json!({
        "answer": answer.text,
        "document": answer.document.storage_path(),
        "version": answer.document.version,
        "sources": sources,
    })))
}
