//! Sync command: run the ingestion pipeline until no pending documents remain.

use std::sync::Arc;

use anyhow::Result;

use super::{build_embedder, build_vectors, cancel_on_ctrl_c, open_files, open_store, resolve_path};
use crate::config::Settings;
use crate::documents::{DocumentChunker, PdfTextExtractor};
use crate::ingest::{IngestConfig, IngestionPipeline};

pub async fn run(config: &Settings) -> Result<()> {
    let store = open_store(config)?;
    let files = open_files(config)?;
    let embedder = build_embedder(config)?;
    let vectors = build_vectors(config, embedder.dimension())?;

    // Bare binary names are looked up on PATH
    let mut extraction = config.ingestion.extraction.clone();
    if extraction.pdftotext.components().count() > 1 {
        extraction.pdftotext = resolve_path(config, &extraction.pdftotext);
    }
    let extractor = Arc::new(PdfTextExtractor::from_config(&extraction));
    let chunker = DocumentChunker::new(
        extractor,
        config.ingestion.chunking.clone(),
        embedder.model_version().to_string(),
    );

    let pipeline = IngestionPipeline::new(
        store,
        files,
        vectors,
        embedder,
        chunker,
        IngestConfig::from_settings(config),
    );

    let cancel = cancel_on_ctrl_c();
    let stats = pipeline.run(&cancel).await?;

    println!(
        "Indexed {} documents ({} pages, {} chunks) in {:.1}s",
        stats.documents_indexed,
        stats.pages_written,
        stats.chunks_written,
        stats.elapsed_ms as f64 / 1000.0
    );
    if stats.documents_skipped > 0 {
        println!("Skipped {} documents with no extractable text", stats.documents_skipped);
    }
    if stats.documents_failed > 0 {
        println!(
            "{} documents failed; see the log for details (RUST_LOG=ingest=debug)",
            stats.documents_failed
        );
    }
    if stats.cancelled {
        println!("Stopped early; run 'lecture-rag sync' again to continue.");
    }
    Ok(())
}

