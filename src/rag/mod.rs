//! Retrieval-augmented answering over a single document.
//!
//! - `TextChunker`: splits extracted text into bounded segments
//! - `BatchEmbedder`: batches segment texts through an `Embedder`
//! - `VectorIndex`: brute-force cosine search over embedded segments
//! - `AnswerGenerator`: renders the grounded prompt and calls the chat model

pub mod answer;
pub mod chunker;
pub mod embedder;
pub mod index;

pub use answer::{AnswerGenerator, PROMPT_TEMPLATE};
pub use chunker::{Segment, TextChunker};
pub use embedder::{BatchEmbedder, Embedder};
pub use index::{ScoredSegment, VectorIndex};
