//! Text embedding providers.
//!
//! Chunks are embedded with [`EmbeddingIntent::Index`] during ingestion and
//! questions with [`EmbeddingIntent::Query`] during retrieval. Providers that
//! distinguish the two (prefixes for E5 models, task types for Gemini) map the
//! intent themselves.

pub mod fastembed;
pub mod gemini;

pub use self::fastembed::FastEmbedProvider;
pub use self::gemini::GeminiEmbedder;

use async_trait::async_trait;
use thiserror::Error;

use crate::types::EmbeddingIntent;

#[derive(Error, Debug)]
pub enum EmbeddingError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Embedding API returned {status}: {body}")]
    Api { status: u16, body: String },

    #[error("Expected {expected} embeddings, got {actual}")]
    CountMismatch { expected: usize, actual: usize },

    #[error("Embedding model error: {0}")]
    Model(String),

    #[error("Embedding task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

pub type EmbeddingResult<T> = Result<T, EmbeddingError>;

#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// One vector per input text, in input order.
    async fn embed(
        &self,
        texts: &[String],
        intent: EmbeddingIntent,
    ) -> EmbeddingResult<Vec<Vec<f32>>>;

    /// Length of every returned vector.
    fn dimension(&self) -> usize;

    /// Tag stamped on chunks embedded by this provider.
    fn model_version(&self) -> &str;
}

/// Fail unless the provider returned exactly one vector per input.
pub(crate) fn check_count(expected: usize, vectors: &[Vec<f32>]) -> EmbeddingResult<()> {
    if vectors.len() != expected {
        return Err(EmbeddingError::CountMismatch {
            expected,
            actual: vectors.len(),
        });
    }
    Ok(())
}
