//! Page text extraction.
//!
//! Paged formats go through `pdftotext`. Anything it cannot read degrades to
//! a single plain-text page so a document is never lost at this stage.

use async_trait::async_trait;
use std::io::Write;
use std::path::PathBuf;
use thiserror::Error;
use tokio::process::Command;

use super::config::ExtractionConfig;
use crate::types::DocumentType;

/// Errors from format-specific extraction. Never fatal to ingestion.
#[derive(Error, Debug)]
pub enum ExtractError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to run {binary}: {source}")]
    Spawn {
        binary: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{binary} exited with {status}: {stderr}")]
    Failed {
        binary: String,
        status: std::process::ExitStatus,
        stderr: String,
    },
}

/// Text of one physical page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractedPage {
    /// 1-based physical page number.
    pub number: u32,
    pub text: String,
}

/// Turns raw bytes into per-page text.
#[async_trait]
pub trait PageExtractor: Send + Sync {
    /// Page texts in physical order. Blank pages may be included.
    async fn extract(&self, content: &[u8]) -> Result<Vec<String>, ExtractError>;
}

/// Extracts PDF pages with the poppler `pdftotext` tool.
#[derive(Debug, Clone)]
pub struct PdfTextExtractor {
    binary: PathBuf,
}

impl PdfTextExtractor {
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    pub fn from_config(config: &ExtractionConfig) -> Self {
        Self::new(config.pdftotext.clone())
    }
}

impl Default for PdfTextExtractor {
    fn default() -> Self {
        Self::from_config(&ExtractionConfig::default())
    }
}

#[async_trait]
impl PageExtractor for PdfTextExtractor {
    async fn extract(&self, content: &[u8]) -> Result<Vec<String>, ExtractError> {
        // pdftotext needs a seekable file
        let mut input = tempfile::Builder::new()
            .prefix("lecture-rag-")
            .suffix(".pdf")
            .tempfile()?;
        input.write_all(content)?;
        input.flush()?;

        let binary = self.binary.display().to_string();
        let output = Command::new(&self.binary)
            .arg("-enc")
            .arg("UTF-8")
            .arg("-f")
            .arg("1")
            .arg(input.path())
            .arg("-")
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|source| ExtractError::Spawn {
                binary: binary.clone(),
                source,
            })?;

        if !output.status.success() {
            return Err(ExtractError::Failed {
                binary,
                status: output.status,
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        Ok(split_form_feeds(&String::from_utf8_lossy(&output.stdout)))
    }
}

/// Split `pdftotext` output into pages, dropping trailing blank pages.
fn split_form_feeds(raw: &str) -> Vec<String> {
    let mut pages: Vec<String> = raw
        .split('\u{000C}')
        .map(|page| page.replace('\u{0000}', ""))
        .collect();

    while pages.last().is_some_and(|last| last.trim().is_empty()) {
        pages.pop();
    }

    pages
}

/// The whole content as one page of text.
pub fn plain_text_page(content: &[u8]) -> Vec<ExtractedPage> {
    vec![ExtractedPage {
        number: 1,
        text: String::from_utf8_lossy(content).into_owned(),
    }]
}

/// Extract the pages of a document, keeping only pages with text.
///
/// Paged document types use `extractor`; on failure the content is read as
/// plain text. Other types are always read as plain text.
pub async fn extract_pages(
    doc_type: DocumentType,
    content: &[u8],
    extractor: &dyn PageExtractor,
) -> Vec<ExtractedPage> {
    let pages = if doc_type.is_paged() {
        match extractor.extract(content).await {
            Ok(texts) => texts
                .into_iter()
                .enumerate()
                .map(|(i, text)| ExtractedPage {
                    number: i as u32 + 1,
                    text,
                })
                .collect(),
            Err(e) => {
                tracing::warn!(
                    target: "ingest",
                    "page extraction failed, falling back to plain text: {e}"
                );
                plain_text_page(content)
            }
        }
    } else {
        plain_text_page(content)
    };

    pages
        .into_iter()
        .filter(|page| !page.text.trim().is_empty())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FailingExtractor;

    #[async_trait]
    impl PageExtractor for FailingExtractor {
        async fn extract(&self, _content: &[u8]) -> Result<Vec<String>, ExtractError> {
            Err(ExtractError::Io(std::io::Error::other("corrupt")))
        }
    }

    struct FixedExtractor(Vec<&'static str>);

    #[async_trait]
    impl PageExtractor for FixedExtractor {
        async fn extract(&self, _content: &[u8]) -> Result<Vec<String>, ExtractError> {
            Ok(self.0.iter().map(|s| s.to_string()).collect())
        }
    }

    #[test]
    fn test_split_form_feeds() {
        let pages = split_form_feeds("one\u{000C}two\u{0000}\u{000C}\u{000C}  \n");
        assert_eq!(pages, vec!["one".to_string(), "two".to_string()]);
    }

    #[tokio::test]
    async fn test_failed_extraction_falls_back_to_single_page() {
        let pages = extract_pages(DocumentType::Pdf, b"raw lecture text", &FailingExtractor).await;
        assert_eq!(
            pages,
            vec![ExtractedPage {
                number: 1,
                text: "raw lecture text".to_string()
            }]
        );
    }

    #[tokio::test]
    async fn test_blank_pages_dropped_numbers_kept() {
        let extractor = FixedExtractor(vec!["intro", "   \n", "summary"]);
        let pages = extract_pages(DocumentType::Slides, b"%PDF", &extractor).await;
        let numbers: Vec<u32> = pages.iter().map(|p| p.number).collect();
        assert_eq!(numbers, vec![1, 3]);
    }

    #[tokio::test]
    async fn test_notes_skip_pdf_extractor() {
        let pages = extract_pages(DocumentType::Notes, b"# Week 1", &FailingExtractor).await;
        assert_eq!(pages.len(), 1);
        assert_eq!(pages[0].text, "# Week 1");
    }

    #[tokio::test]
    async fn test_missing_binary_is_an_error() {
        let extractor = PdfTextExtractor::new("/nonexistent/pdftotext-binary");
        let result = extractor.extract(b"%PDF-1.4").await;
        assert!(matches!(result, Err(ExtractError::Spawn { .. })));
    }
}
