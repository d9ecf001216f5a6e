//! Vector index: chunk embeddings keyed by embedding id, searched by cosine
//! similarity within a course.
//!
//! Backends:
//! - `MemoryVectorIndex`: brute-force search, optionally snapshotted to disk
//! - `QdrantIndex`: Qdrant over its REST API

pub mod memory;
pub mod qdrant;

pub use memory::MemoryVectorIndex;
pub use qdrant::QdrantIndex;

use async_trait::async_trait;
use thiserror::Error;

use crate::types::{Chunk, CourseId, RetrievedChunk};

/// Errors from vector index operations.
#[derive(Error, Debug)]
pub enum VectorError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Vector index returned {status}: {body}")]
    Api { status: u16, body: String },

    #[error("Collection '{0}' does not exist")]
    CollectionMissing(String),

    #[error("Vector dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("Invalid point payload: {0}")]
    Payload(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type VectorResult<T> = Result<T, VectorError>;

/// A vector and the chunk it belongs to.
///
/// The point is keyed by `chunk.embedding_id`.
#[derive(Debug, Clone, PartialEq)]
pub struct VectorPoint {
    pub vector: Vec<f32>,
    pub chunk: Chunk,
}

impl VectorPoint {
    pub fn new(vector: Vec<f32>, chunk: Chunk) -> Self {
        Self { vector, chunk }
    }

    pub fn id(&self) -> &str {
        &self.chunk.embedding_id
    }
}

#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// Create the collection if it does not exist. Idempotent.
    async fn ensure_collection(&self) -> VectorResult<()>;

    /// Drop and recreate the collection, discarding every point.
    async fn recreate_collection(&self) -> VectorResult<()>;

    /// Insert or replace points by embedding id.
    async fn upsert(&self, points: Vec<VectorPoint>) -> VectorResult<()>;

    /// Nearest neighbours of `vector` within `course_id`, most similar first.
    async fn search(
        &self,
        vector: &[f32],
        course_id: CourseId,
        limit: usize,
    ) -> VectorResult<Vec<RetrievedChunk>>;
}

/// Calculate cosine similarity between two vectors.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let dot_product: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let magnitude_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let magnitude_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if magnitude_a == 0.0 || magnitude_b == 0.0 {
        return 0.0;
    }

    dot_product / (magnitude_a * magnitude_b)
}
