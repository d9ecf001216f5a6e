//! Ingestion batching configuration.
//!
//! Reads from Settings (.lecture-rag/settings.toml).

use std::time::Duration;

use crate::Settings;

#[derive(Debug, Clone)]
pub struct IngestConfig {
    /// Documents requested per selection page. A shorter page ends the run.
    pub document_batch_size: usize,

    /// Chunks embedded and written per transaction
    pub chunk_batch_size: usize,

    /// Fixed pause between chunk sub-batches of a document
    pub batch_pause: Duration,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            document_batch_size: 10,
            chunk_batch_size: 100,
            batch_pause: Duration::from_millis(500),
        }
    }
}

impl IngestConfig {
    /// Create config from Settings.
    ///
    /// - `ingestion.document_batch_size` -> document_batch_size
    /// - `ingestion.chunk_batch_size` -> chunk_batch_size
    /// - `ingestion.batch_pause_ms` -> batch_pause
    pub fn from_settings(settings: &Settings) -> Self {
        let ingestion = &settings.ingestion;
        Self {
            document_batch_size: ingestion.document_batch_size.max(1),
            chunk_batch_size: ingestion.chunk_batch_size.max(1),
            batch_pause: Duration::from_millis(ingestion.batch_pause_ms),
        }
    }

    /// Config with no pause, for tests and local runs.
    pub fn without_pause(mut self) -> Self {
        self.batch_pause = Duration::ZERO;
        self
    }
}
