//! Domain model shared by ingestion and question answering.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::num::NonZeroU32;
use std::str::FromStr;

macro_rules! define_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        pub struct $name(pub NonZeroU32);

        impl $name {
            /// Create from a raw value. Returns `None` for zero.
            pub fn from_u32(value: u32) -> Option<Self> {
                NonZeroU32::new(value).map(Self)
            }

            pub fn get(&self) -> u32 {
                self.0.get()
            }

            /// The id that follows this one.
            pub fn next(&self) -> Option<Self> {
                self.0.checked_add(1).map(Self)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

define_id!(
    /// Identifier of an uploaded lecture document.
    DocumentId
);
define_id!(
    /// Identifier of a course; every query is scoped to one.
    CourseId
);
define_id!(
    /// Identifier of a semester.
    SemesterId
);
define_id!(PageId);
define_id!(
    /// Identifier of a persisted chunk, the unit of retrieval.
    ChunkId
);

/// Kind of source artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentType {
    #[default]
    Pdf,
    Slides,
    Notes,
    Webpage,
    Other,
}

impl DocumentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pdf => "pdf",
            Self::Slides => "slides",
            Self::Notes => "notes",
            Self::Webpage => "webpage",
            Self::Other => "other",
        }
    }

    /// Whether pages are extracted with the PDF extractor.
    pub fn is_paged(&self) -> bool {
        matches!(self, Self::Pdf | Self::Slides)
    }

    /// Guess from a file extension, defaulting to `Other`.
    pub fn from_extension(ext: &str) -> Self {
        match ext.to_ascii_lowercase().as_str() {
            "pdf" => Self::Pdf,
            "ppt" | "pptx" | "key" => Self::Slides,
            "md" | "txt" | "rst" => Self::Notes,
            "html" | "htm" => Self::Webpage,
            _ => Self::Other,
        }
    }
}

impl fmt::Display for DocumentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DocumentType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "pdf" => Ok(Self::Pdf),
            "slides" => Ok(Self::Slides),
            "notes" => Ok(Self::Notes),
            "webpage" => Ok(Self::Webpage),
            "other" => Ok(Self::Other),
            other => Err(format!(
                "unknown document type '{other}' (expected pdf, slides, notes, webpage or other)"
            )),
        }
    }
}

/// A source lecture artifact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub id: DocumentId,
    pub course_id: CourseId,
    pub semester_id: SemesterId,
    pub title: String,
    /// Locator understood by the file storage.
    pub source: String,
    /// Hex SHA-256 of the uploaded bytes.
    pub checksum: String,
    pub version: u32,
    pub doc_type: DocumentType,
    /// Upload time (UTC seconds).
    pub created_at: u64,
}

/// Document attributes before an id is assigned.
#[derive(Debug, Clone, PartialEq)]
pub struct NewDocument {
    pub course_id: CourseId,
    pub semester_id: SemesterId,
    pub title: String,
    pub source: String,
    pub checksum: String,
    pub doc_type: DocumentType,
}

/// One extracted page of a document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Page {
    pub id: PageId,
    pub document_id: DocumentId,
    /// 1-based.
    pub page_number: u32,
    pub text: String,
    /// Language tag of the page text. Extraction does not detect languages,
    /// so ingested pages carry `None`; the column is kept for stored rows.
    pub language: Option<String>,
    pub token_count: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewPage {
    pub document_id: DocumentId,
    pub page_number: u32,
    pub text: String,
    pub language: Option<String>,
    pub token_count: u32,
}

/// A persisted text segment with its embedding bookkeeping.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    pub id: ChunkId,
    pub page_id: PageId,
    pub document_id: DocumentId,
    pub course_id: CourseId,
    pub semester_id: SemesterId,
    /// 0-based, unique within the document.
    pub chunk_index: u32,
    /// Character offsets within the page text.
    pub start_offset: u32,
    pub end_offset: u32,
    pub text: String,
    pub token_count: u32,
    /// Key of the vector in the vector index.
    pub embedding_id: String,
    pub embedding_model_version: String,
    /// Hex SHA-256 of the stored vector.
    pub vector_hash: String,
}

/// A chunk produced by the chunker, not yet persisted.
///
/// `page_number` links the chunk to its page until page ids are assigned.
#[derive(Debug, Clone, PartialEq)]
pub struct NewChunk {
    pub document_id: DocumentId,
    pub course_id: CourseId,
    pub semester_id: SemesterId,
    pub page_number: u32,
    pub chunk_index: u32,
    pub start_offset: u32,
    pub end_offset: u32,
    pub text: String,
    pub token_count: u32,
    pub embedding_id: String,
    pub embedding_model_version: String,
    /// Filled in once the vector is known.
    pub vector_hash: String,
}

/// A chunk paired with a query-time relevance score (higher is better).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RetrievedChunk {
    pub chunk: Chunk,
    pub score: f32,
}

impl RetrievedChunk {
    pub fn new(chunk: Chunk, score: f32) -> Self {
        Self { chunk, score }
    }
}

/// What an embedding is computed for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EmbeddingIntent {
    /// Document content being indexed.
    Index,
    /// A live user query.
    Query,
}

/// Whitespace-delimited token count.
pub fn count_tokens(text: &str) -> u32 {
    text.split_whitespace().count() as u32
}
