//! Document-to-answer orchestration.
//!
//! `upload` replaces the current document; `ask` snapshots it once, obtains
//! an index for that snapshot (cached per document version) and answers from
//! the top-K segments.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;
use tokio::sync::Mutex;

use crate::core::config::Settings;
use crate::core::errors::PipelineError;
use crate::document::{DocumentStore, FileTextExtractor, StoredDocument, TextExtractor};
use crate::llm::{ChatProvider, OpenAiClient};
use crate::rag::{
    AnswerGenerator, BatchEmbedder, Embedder, ScoredSegment, TextChunker, VectorIndex,
};

/// A generated answer and the context it was produced from.
#[derive(Debug, Clone, Serialize)]
pub struct Answer {
    pub text: String,
    pub document: StoredDocument,
    pub sources: Vec<ScoredSegment>,
}

struct CachedIndex {
    version: u64,
    index: Arc<VectorIndex>,
}

pub struct QaPipeline {
    documents: Arc<DocumentStore>,
    extractor: Arc<dyn TextExtractor>,
    chunker: TextChunker,
    embedder: Arc<dyn Embedder>,
    generator: AnswerGenerator,
    top_k: usize,
    cache_enabled: bool,
    cache: Mutex<Option<CachedIndex>>,
}

/// Injected collaborators of a [`QaPipeline`].
pub struct PipelineComponents {
    pub documents: Arc<DocumentStore>,
    pub extractor: Arc<dyn TextExtractor>,
    pub embedder: Arc<dyn Embedder>,
    pub chat: Arc<dyn ChatProvider>,
}

impl QaPipeline {
    pub fn new(
        components: PipelineComponents,
        settings: &Settings,
    ) -> Result<Self, PipelineError> {
        let rag = &settings.rag;
        let chunker = TextChunker::new(rag.chunk_size, rag.chunk_overlap)?;
        let embedder: Arc<dyn Embedder> = Arc::new(BatchEmbedder::new(
            components.embedder,
            rag.embedding_batch_size,
            rag.embedding_concurrency,
        ));

        Ok(Self {
            documents: components.documents,
            extractor: components.extractor,
            chunker,
            embedder,
            generator: AnswerGenerator::new(components.chat, settings.openai.temperature),
            top_k: rag.top_k,
            cache_enabled: rag.cache_index,
            cache: Mutex::new(None),
        })
    }

    /// Wires the OpenAI client and the `pdftotext` extractor.
    pub fn from_settings(
        settings: &Settings,
        uploads_dir: PathBuf,
    ) -> Result<Self, PipelineError> {
        let client = Arc::new(OpenAiClient::from_settings(&settings.openai)?);
        let components = PipelineComponents {
            documents: Arc::new(DocumentStore::new(uploads_dir)),
            extractor: Arc::new(FileTextExtractor::new(
                settings.extraction.pdftotext_path.clone(),
            )),
            embedder: client.clone(),
            chat: client,
        };
        Self::new(components, settings)
    }

    pub fn documents(&self) -> &DocumentStore {
        &self.documents
    }

    pub async fn current_document(&self) -> Option<StoredDocument> {
        self.documents.current().await
    }

    /// Stores the upload as the current document and drops any cached index.
    pub async fn upload(
        &self,
        file_name: &str,
        bytes: &[u8],
    ) -> Result<StoredDocument, PipelineError> {
        let document = self.documents.save(file_name, bytes).await?;
        self.cache.lock().await.take();
        Ok(document)
    }

    pub async fn ask(&self, question: &str) -> Result<Answer, PipelineError> {
        let question = question.trim();
        if question.is_empty() {
            return Err(PipelineError::InvalidQuestion(
                "question must not be empty".to_string(),
            ));
        }

        let document = self.documents.require_current().await?;
        let started = Instant::now();

        let index = self.index_for(&document).await?;

        let query_vector = self
            .embedder
            .embed(&[question.to_string()])
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| {
                PipelineError::EmbeddingService("no vector returned for the question".to_string())
            })?;
        let sources = index.query(&query_vector, self.top_k)?;

        let context: Vec<_> = sources.iter().map(|scored| scored.segment.clone()).collect();
        let text = self.generator.generate(question, &context).await?;

        tracing::info!(
            document = %document.path.display(),
            version = document.version,
            sources = sources.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "answered question"
        );

        Ok(Answer {
            text,
            document,
            sources,
        })
    }

    async fn index_for(
        &self,
        document: &StoredDocument,
    ) -> Result<Arc<VectorIndex>, PipelineError> {
        if self.cache_enabled {
            if let Some(cached) = self.cache.lock().await.as_ref() {
                if cached.version == document.version {
                    tracing::debug!(version = document.version, "using cached index");
                    return Ok(cached.index.clone());
                }
            }
        }

        let index = Arc::new(self.build_index(document).await?);

        if self.cache_enabled {
            let mut cache = self.cache.lock().await;
            // an upload that landed during the build makes this index stale
            let still_current = self
                .documents
                .current()
                .await
                .is_some_and(|current| current.version == document.version);
            if still_current {
                *cache = Some(CachedIndex {
                    version: document.version,
                    index: index.clone(),
                });
            }
        }

        Ok(index)
    }

    async fn build_index(
        &self,
        document: &StoredDocument,
    ) -> Result<VectorIndex, PipelineError> {
        let started = Instant::now();
        let text = self.extractor.extract(&document.path).await?;
        let segments = self.chunker.split(&text, &document.storage_path());

        let texts: Vec<String> = segments.iter().map(|segment| segment.text.clone()).collect();
        let vectors = self.embedder.embed(&texts).await?;
        let index = VectorIndex::from_pairs(segments, vectors)?;

        tracing::info!(
            document = %document.path.display(),
            version = document.version,
            segments = index.len(),
            dimension = index.dimension(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "built vector index"
        );
        Ok(index)
    }
}
