//! Batch ingestion: bring every document without chunks to an indexed state.
//!
//! ```text
//! SELECT → FETCH → CHUNK → EMBED → WRITE (pages + chunks) → UPSERT → COMMIT
//!    │                        └────── per sub-batch of chunks ──────┘
//!    ▼
//! documents without chunks, paged by id cursor
//! ```
//!
//! Rows of a sub-batch become visible only when the vector upsert for that
//! sub-batch has succeeded. If the commit itself fails after the upsert, the
//! vectors stay in the index without rows; a later run reprocesses the
//! document under new embedding ids.

pub mod config;
pub mod pipeline;

pub use config::IngestConfig;
pub use pipeline::{DocumentOutcome, IngestStats, IngestionPipeline};

use thiserror::Error;

use crate::embedding::EmbeddingError;
use crate::storage::StorageError;
use crate::types::DocumentId;
use crate::vector::VectorError;

#[derive(Error, Debug)]
pub enum IngestError {
    #[error("Failed to prepare vector collection: {0}")]
    Collection(#[source] VectorError),

    #[error("Failed to select documents: {0}")]
    Selection(#[source] StorageError),

    #[error("Failed to fetch content of document {document_id}: {source}")]
    Fetch {
        document_id: DocumentId,
        source: StorageError,
    },

    #[error("Failed to embed chunks: {0}")]
    Embedding(#[from] EmbeddingError),

    #[error("Failed to write chunks: {0}")]
    Storage(#[from] StorageError),

    #[error("Failed to upsert vectors: {0}")]
    VectorWrite(#[source] VectorError),

    #[error("Ingestion cancelled")]
    Cancelled,
}

pub type IngestResult<T> = Result<T, IngestError>;
