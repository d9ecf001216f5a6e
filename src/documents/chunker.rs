//! Document chunking.
//!
//! Provides the `Chunker` trait, the fixed-window strategy, and
//! `DocumentChunker`, which turns a document's bytes into pages and chunks.

use std::sync::Arc;

use uuid::Uuid;

use super::config::ChunkingConfig;
use super::extract::{PageExtractor, extract_pages};
use crate::types::{Document, NewChunk, NewPage, count_tokens};

/// A raw chunk before it is tied to a document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawChunk {
    /// Character range in the page text (start, end).
    pub char_range: (usize, usize),

    /// The text content of this chunk.
    pub content: String,
}

impl RawChunk {
    pub fn new(char_range: (usize, usize), content: String) -> Self {
        Self {
            char_range,
            content,
        }
    }

    /// Get character count.
    pub fn char_count(&self) -> usize {
        self.char_range.1 - self.char_range.0
    }
}

/// Trait for chunking strategies.
pub trait Chunker: Send + Sync {
    /// Split page text into chunks.
    fn chunk(&self, content: &str, config: &ChunkingConfig) -> Vec<RawChunk>;
}

/// Fixed-size windows with a constant overlap.
///
/// A text no longer than the window is a single chunk. Longer text is cut
/// into `[start, start + size)` windows advancing by `size - overlap` until a
/// window reaches the end. Sizes are in characters, not bytes.
#[derive(Debug, Default, Clone, Copy)]
pub struct FixedWindowChunker;

impl FixedWindowChunker {
    pub fn new() -> Self {
        Self
    }
}

impl Chunker for FixedWindowChunker {
    fn chunk(&self, content: &str, config: &ChunkingConfig) -> Vec<RawChunk> {
        let chars: Vec<char> = content.chars().collect();
        let len = chars.len();
        let size = config.chunk_chars.max(1);

        if len <= size {
            return vec![RawChunk::new((0, len), content.to_string())];
        }

        let step = size.saturating_sub(config.overlap_chars).max(1);
        let mut chunks = Vec::with_capacity(len / step + 1);
        let mut start = 0;

        loop {
            let end = (start + size).min(len);
            chunks.push(RawChunk::new(
                (start, end),
                chars[start..end].iter().collect(),
            ));
            if end == len {
                break;
            }
            start += step;
        }

        chunks
    }
}

/// Pages and chunks produced from one document.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChunkedDocument {
    pub pages: Vec<NewPage>,
    pub chunks: Vec<NewChunk>,
}

impl ChunkedDocument {
    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }
}

/// Extracts pages from a document and splits them into chunks.
pub struct DocumentChunker {
    extractor: Arc<dyn PageExtractor>,
    strategy: Box<dyn Chunker>,
    config: ChunkingConfig,
    model_version: String,
}

impl DocumentChunker {
    /// Create a chunker using the fixed-window strategy.
    ///
    /// `model_version` is stamped on every chunk produced.
    pub fn new(
        extractor: Arc<dyn PageExtractor>,
        config: ChunkingConfig,
        model_version: impl Into<String>,
    ) -> Self {
        Self {
            extractor,
            strategy: Box::new(FixedWindowChunker::new()),
            config,
            model_version: model_version.into(),
        }
    }

    /// Replace the splitting strategy.
    pub fn with_strategy(mut self, strategy: Box<dyn Chunker>) -> Self {
        self.strategy = strategy;
        self
    }

    pub fn model_version(&self) -> &str {
        &self.model_version
    }

    /// Produce ordered pages and chunks for `document`.
    ///
    /// Chunk indices run across the whole document. Every chunk gets a fresh
    /// embedding id; the vector hash stays empty until embedding.
    pub async fn process(&self, document: &Document, content: &[u8]) -> ChunkedDocument {
        let extracted = extract_pages(document.doc_type, content, self.extractor.as_ref()).await;

        let mut output = ChunkedDocument::default();
        let mut chunk_index = 0u32;

        for page in extracted {
            for raw in self.strategy.chunk(&page.text, &self.config) {
                output.chunks.push(NewChunk {
                    document_id: document.id,
                    course_id: document.course_id,
                    semester_id: document.semester_id,
                    page_number: page.number,
                    chunk_index,
                    start_offset: raw.char_range.0 as u32,
                    end_offset: raw.char_range.1 as u32,
                    token_count: count_tokens(&raw.content),
                    text: raw.content,
                    embedding_id: Uuid::new_v4().to_string(),
                    embedding_model_version: self.model_version.clone(),
                    vector_hash: String::new(),
                });
                chunk_index += 1;
            }

            output.pages.push(NewPage {
                document_id: document.id,
                page_number: page.number,
                token_count: count_tokens(&page.text),
                text: page.text,
                // Not detected during extraction
                language: None,
            });
        }

        output
    }
}
