//! Page extraction and chunking of lecture documents.
//!
//! This module provides:
//! - Page text extraction with a plain-text fallback
//! - Fixed-window chunking with overlap
//! - `DocumentChunker`, combining both into pages and chunks

pub mod chunker;
pub mod config;
pub mod extract;

pub use chunker::{ChunkedDocument, Chunker, DocumentChunker, FixedWindowChunker, RawChunk};
pub use config::{ChunkingConfig, ExtractionConfig};
pub use extract::{ExtractError, ExtractedPage, PageExtractor, PdfTextExtractor, extract_pages};
