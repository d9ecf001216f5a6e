use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

use tokio_util::sync::CancellationToken;

use super::{IngestConfig, IngestError, IngestResult};
use crate::documents::{ChunkedDocument, DocumentChunker};
use crate::embedding::{EmbeddingError, EmbeddingProvider};
use crate::storage::{ChunkTransaction, DocumentRepository, FileStorage, StorageError};
use crate::types::{Document, DocumentId, EmbeddingIntent, NewChunk, NewPage};
use crate::utils::vector_hash;
use crate::vector::{VectorIndex, VectorPoint};
use crate::{debug_event, log_event};

/// Counters for one ingestion run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IngestStats {
    pub documents_indexed: usize,
    /// Documents that produced no chunks.
    pub documents_skipped: usize,
    pub documents_failed: usize,
    pub pages_written: usize,
    pub chunks_written: usize,
    pub cancelled: bool,
    pub elapsed_ms: u64,
}

/// Result of processing a single document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentOutcome {
    Indexed { pages: usize, chunks: usize },
    /// Extraction yielded no text; nothing was written.
    Skipped,
}

pub struct IngestionPipeline {
    documents: Arc<dyn DocumentRepository>,
    files: Arc<dyn FileStorage>,
    vectors: Arc<dyn VectorIndex>,
    embedder: Arc<dyn EmbeddingProvider>,
    chunker: DocumentChunker,
    config: IngestConfig,
}

impl IngestionPipeline {
    pub fn new(
        documents: Arc<dyn DocumentRepository>,
        files: Arc<dyn FileStorage>,
        vectors: Arc<dyn VectorIndex>,
        embedder: Arc<dyn EmbeddingProvider>,
        chunker: DocumentChunker,
        config: IngestConfig,
    ) -> Self {
        Self {
            documents,
            files,
            vectors,
            embedder,
            chunker,
            config,
        }
    }

    pub fn config(&self) -> &IngestConfig {
        &self.config
    }

    /// Index every document that has no chunks yet.
    ///
    /// Documents are visited once per run in ascending id order. A failing
    /// document is logged and counted; the run continues with the next one.
    /// Returns early (with `cancelled` set) when `cancel` fires.
    pub async fn run(&self, cancel: &CancellationToken) -> IngestResult<IngestStats> {
        let start = Instant::now();
        let mut stats = IngestStats::default();

        self.vectors
            .ensure_collection()
            .await
            .map_err(IngestError::Collection)?;

        let page_size = self.config.document_batch_size;
        let mut cursor: Option<DocumentId> = None;

        'pages: loop {
            let batch = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    stats.cancelled = true;
                    break 'pages;
                }
                result = self.documents.find_documents_without_chunks(cursor, page_size) => {
                    result.map_err(IngestError::Selection)?
                }
            };
            let exhausted = batch.len() < page_size;
            debug_event!("ingest", "selected", "{} documents after {:?}", batch.len(), cursor);

            for document in &batch {
                cursor = Some(document.id);

                match self.process_document(document, cancel).await {
                    Ok(DocumentOutcome::Indexed { pages, chunks }) => {
                        stats.documents_indexed += 1;
                        stats.pages_written += pages;
                        stats.chunks_written += chunks;
                        log_event!(
                            "ingest",
                            "indexed",
                            "document {} '{}' ({chunks} chunks)",
                            document.id,
                            document.title
                        );
                    }
                    Ok(DocumentOutcome::Skipped) => {
                        stats.documents_skipped += 1;
                        log_event!("ingest", "skipped", "document {} has no text", document.id);
                    }
                    Err(IngestError::Cancelled) => {
                        stats.cancelled = true;
                        break 'pages;
                    }
                    Err(e) => {
                        stats.documents_failed += 1;
                        tracing::error!(
                            target: "ingest",
                            "document {} '{}' failed: {e}",
                            document.id,
                            document.title
                        );
                    }
                }
            }

            if exhausted {
                break;
            }
        }

        stats.elapsed_ms = start.elapsed().as_millis() as u64;
        log_event!(
            "ingest",
            "finished",
            "{} indexed, {} skipped, {} failed, {} chunks in {}ms",
            stats.documents_indexed,
            stats.documents_skipped,
            stats.documents_failed,
            stats.chunks_written,
            stats.elapsed_ms
        );
        Ok(stats)
    }

    /// Fetch, chunk, embed and write one document.
    pub async fn process_document(
        &self,
        document: &Document,
        cancel: &CancellationToken,
    ) -> IngestResult<DocumentOutcome> {
        let content = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(IngestError::Cancelled),
            result = self.files.get(&document.source) => result.map_err(|source| IngestError::Fetch {
                document_id: document.id,
                source,
            })?,
        };

        let chunked = self.chunker.process(document, &content).await;
        if chunked.is_empty() {
            return Ok(DocumentOutcome::Skipped);
        }

        self.write_chunked(document, &chunked, cancel).await
    }

    async fn write_chunked(
        &self,
        document: &Document,
        chunked: &ChunkedDocument,
        cancel: &CancellationToken,
    ) -> IngestResult<DocumentOutcome> {
        let pages_by_number: BTreeMap<u32, &NewPage> =
            chunked.pages.iter().map(|p| (p.page_number, p)).collect();

        let mut pages_written = 0;
        let mut chunks_written = 0;

        for (i, batch) in chunked.chunks.chunks(self.config.chunk_batch_size).enumerate() {
            if i > 0 && !self.config.batch_pause.is_zero() {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return Err(IngestError::Cancelled),
                    _ = tokio::time::sleep(self.config.batch_pause) => {}
                }
            }

            // Pages referenced by this batch; ones already written are skipped
            let mut pages: Vec<NewPage> = Vec::new();
            for chunk in batch {
                if pages.last().map(|p| p.page_number) == Some(chunk.page_number) {
                    continue;
                }
                if let Some(page) = pages_by_number.get(&chunk.page_number) {
                    pages.push((*page).clone());
                }
            }

            let (pages, chunks) = self.write_batch(document, pages, batch, cancel).await?;
            pages_written += pages;
            chunks_written += chunks;
            debug_event!(
                "ingest",
                "batch",
                "document {} batch {} committed {chunks} chunks",
                document.id,
                i + 1
            );
        }

        Ok(DocumentOutcome::Indexed {
            pages: pages_written,
            chunks: chunks_written,
        })
    }

    /// Embed one sub-batch and write it atomically with its vectors.
    async fn write_batch(
        &self,
        document: &Document,
        pages: Vec<NewPage>,
        batch: &[NewChunk],
        cancel: &CancellationToken,
    ) -> IngestResult<(usize, usize)> {
        let texts: Vec<String> = batch.iter().map(|c| c.text.clone()).collect();
        let vectors = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(IngestError::Cancelled),
            result = self.embedder.embed(&texts, EmbeddingIntent::Index) => result?,
        };
        if vectors.len() != batch.len() {
            return Err(EmbeddingError::CountMismatch {
                expected: batch.len(),
                actual: vectors.len(),
            }
            .into());
        }

        let chunks: Vec<NewChunk> = batch
            .iter()
            .zip(&vectors)
            .map(|(chunk, vector)| NewChunk {
                vector_hash: vector_hash(vector),
                ..chunk.clone()
            })
            .collect();

        let mut tx = self.documents.begin(document).await?;

        let staged = async {
            let pages = tx.insert_pages(&pages).await?;
            let chunks = tx.insert_chunks(&chunks).await?;
            Ok::<_, StorageError>((pages.len(), chunks))
        }
        .await;

        let (page_count, stored) = match staged {
            Ok(staged) => staged,
            Err(e) => {
                rollback(tx.as_mut(), document.id).await;
                return Err(e.into());
            }
        };

        let chunk_count = stored.len();
        let points: Vec<VectorPoint> = stored
            .into_iter()
            .zip(vectors)
            .map(|(chunk, vector)| VectorPoint::new(vector, chunk))
            .collect();

        if let Err(e) = self.vectors.upsert(points).await {
            rollback(tx.as_mut(), document.id).await;
            return Err(IngestError::VectorWrite(e));
        }

        if let Err(e) = tx.commit().await {
            tracing::warn!(
                target: "ingest",
                "document {}: vectors upserted but commit failed; {chunk_count} vectors have no rows",
                document.id
            );
            return Err(e.into());
        }

        Ok((page_count, chunk_count))
    }
}

async fn rollback(tx: &mut dyn ChunkTransaction, document_id: DocumentId) {
    if let Err(e) = tx.rollback().await {
        tracing::warn!(target: "ingest", "document {document_id}: rollback failed: {e}");
    }
}
