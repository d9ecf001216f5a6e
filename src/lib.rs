pub mod answer;
pub mod cli;
pub mod config;
pub mod documents;
pub mod embedding;
pub mod generation;
pub mod ingest;
pub mod logging;
pub mod qa;
pub mod retrieval;
pub mod storage;
pub mod types;
pub mod utils;
pub mod vector;

pub use answer::{AnswerSynthesizer, NO_CONTEXT_MESSAGE, SynthesisError};
pub use config::Settings;
pub use documents::{ChunkingConfig, DocumentChunker, FixedWindowChunker};
pub use embedding::{EmbeddingError, EmbeddingProvider};
pub use generation::{GenerationError, GenerationRequest, TextGenerator};
pub use ingest::{IngestConfig, IngestError, IngestStats, IngestionPipeline};
pub use qa::{Answer, AskRequest, QaError, QaService};
pub use retrieval::{HybridRetriever, RetrievalError, reciprocal_rank_fusion};
pub use storage::{DocumentRepository, FileStorage, LexicalSearch, StorageError, TantivyStore};
pub use types::*;
pub use vector::{VectorError, VectorIndex};
