use std::sync::Arc;

use async_trait::async_trait;
use futures_util::stream::{self, StreamExt, TryStreamExt};

use crate::core::errors::PipelineError;

/// Maps texts to fixed-dimension vectors.
///
/// Implementations return exactly one vector per input, in input order, and
/// report every provider failure as [`PipelineError::EmbeddingService`] (or
/// [`PipelineError::Timeout`]).
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Provider name used in logs.
    fn name(&self) -> &str;

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, PipelineError>;
}

/// Splits large inputs into provider-sized batches, keeps a bounded number of
/// them in flight, and checks the cardinality contract on the result.
#[derive(Clone)]
pub struct BatchEmbedder {
    inner: Arc<dyn Embedder>,
    batch_size: usize,
    concurrency: usize,
}

impl BatchEmbedder {
    pub fn new(inner: Arc<dyn Embedder>, batch_size: usize, concurrency: usize) -> Self {
        Self {
            inner,
            batch_size: batch_size.max(1),
            concurrency: concurrency.max(1),
        }
    }

    async fn embed_batch(&self, batch: &[String]) -> Result<Vec<Vec<f32>>, PipelineError> {
        let vectors = self.inner.embed(batch).await?;
        ensure_cardinality(self.inner.name(), batch.len(), &vectors)?;
        Ok(vectors)
    }
}

#[async_trait]
impl Embedder for BatchEmbedder {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, PipelineError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let batch_count = texts.len().div_ceil(self.batch_size);
        tracing::debug!(
            provider = self.inner.name(),
            texts = texts.len(),
            batches = batch_count,
            "embedding texts"
        );

        let batches: Vec<Vec<Vec<f32>>> =
            stream::iter(texts.chunks(self.batch_size).map(<[String]>::to_vec))
                .map(|batch| async move { self.embed_batch(&batch).await })
                .buffered(self.concurrency)
                .try_collect()
                .await?;

        let vectors: Vec<Vec<f32>> = batches.into_iter().flatten().collect();
        ensure_cardinality(self.inner.name(), texts.len(), &vectors)?;
        ensure_uniform_dimension(self.inner.name(), &vectors)?;
        Ok(vectors)
    }
}

fn ensure_cardinality(
    provider: &str,
    expected: usize,
    vectors: &[Vec<f32>],
) -> Result<(), PipelineError> {
    if vectors.len() != expected {
        return Err(PipelineError::EmbeddingService(format!(
            "{} returned {} vectors for {} inputs",
            provider,
            vectors.len(),
            expected
        )));
    }
    Ok(())
}

fn ensure_uniform_dimension(provider: &str, vectors: &[Vec<f32>]) -> Result<(), PipelineError> {
    let Some(first) = vectors.first() else {
        return Ok(());
    };
    let dimension = first.len();
    if dimension == 0 {
        return Err(PipelineError::EmbeddingService(format!(
            "{} returned an empty vector",
            provider
        )));
    }
    if vectors.iter().any(|vector| vector.len() != dimension) {
        return Err(PipelineError::EmbeddingService(format!(
            "{} returned vectors of inconsistent dimension",
            provider
        )));
    }
    Ok(())
}
