//! Configuration types for page extraction and chunking.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Configuration for fixed-window chunking.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkingConfig {
    /// Window size in characters.
    #[serde(default = "default_chunk_chars")]
    pub chunk_chars: usize,

    /// Characters repeated between consecutive windows of one page.
    #[serde(default = "default_overlap_chars")]
    pub overlap_chars: usize,
}

fn default_chunk_chars() -> usize {
    1000
}

fn default_overlap_chars() -> usize {
    200
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_chars: default_chunk_chars(),
            overlap_chars: default_overlap_chars(),
        }
    }
}

impl ChunkingConfig {
    /// Validate configuration values.
    pub fn validate(&self) -> Result<(), String> {
        if self.chunk_chars == 0 {
            return Err("chunk_chars must be greater than zero".to_string());
        }

        if self.overlap_chars >= self.chunk_chars {
            return Err(format!(
                "overlap_chars ({}) must be less than chunk_chars ({})",
                self.overlap_chars, self.chunk_chars
            ));
        }

        Ok(())
    }

    /// Distance between the starts of consecutive windows.
    pub fn step(&self) -> usize {
        self.chunk_chars - self.overlap_chars
    }
}

/// Configuration for page extraction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractionConfig {
    /// `pdftotext` binary used for PDF and slide documents.
    #[serde(default = "default_pdftotext")]
    pub pdftotext: PathBuf,
}

fn default_pdftotext() -> PathBuf {
    PathBuf::from("pdftotext")
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            pdftotext: default_pdftotext(),
        }
    }
}
