use tantivy::TantivyError;
use tantivy::directory::error::OpenDirectoryError;
use thiserror::Error;

use crate::types::DocumentId;

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Tantivy error: {0}")]
    Tantivy(#[from] TantivyError),

    #[error("Directory error: {0}")]
    Directory(#[from] OpenDirectoryError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid field value for {field}: {reason}")]
    InvalidFieldValue { field: String, reason: String },

    #[error("Chunk references page {page_number} of document {document_id}, which has no row")]
    MissingPage {
        document_id: DocumentId,
        page_number: u32,
    },

    #[error("Locator '{0}' escapes the storage root")]
    InvalidLocator(String),

    #[error("Id space exhausted for {0}")]
    IdOverflow(&'static str),

    #[error("Transaction already finished")]
    TransactionClosed,

    #[error("Background search task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

pub type StorageResult<T> = Result<T, StorageError>;
