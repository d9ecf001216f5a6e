//! Request-time retrieval: hybrid search and rank fusion.

pub mod fusion;
pub mod hybrid;

pub use fusion::{DEFAULT_TOP_N, RRF_K, reciprocal_rank_fusion};
pub use hybrid::{DEFAULT_TOP_K, HybridResults, HybridRetriever};

use thiserror::Error;

use crate::embedding::EmbeddingError;
use crate::storage::StorageError;
use crate::vector::VectorError;

#[derive(Error, Debug)]
pub enum RetrievalError {
    #[error("Failed to embed query: {0}")]
    QueryEmbedding(#[source] EmbeddingError),

    #[error("Embedding provider returned no vector for the query")]
    EmptyQueryEmbedding,

    #[error("Lexical search failed: {0}")]
    Lexical(#[source] StorageError),

    #[error("Vector search failed: {0}")]
    Vector(#[source] VectorError),

    #[error("Failed to check vector hits against stored chunks: {0}")]
    RowCheck(#[source] StorageError),
}

pub type RetrievalResult<T> = Result<T, RetrievalError>;
