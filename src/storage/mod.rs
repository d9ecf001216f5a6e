//! Storage collaborators: the relational document store, lexical search,
//! and raw file storage.
//!
//! The traits here are the contracts the ingestion and retrieval code depend
//! on. `TantivyStore` implements the document store and lexical search on a
//! single tantivy index; `LocalFileStorage` keeps uploads on disk.

pub mod error;
pub mod files;
pub mod schema;
pub mod tantivy;

pub use error::{StorageError, StorageResult};
pub use files::{LocalFileStorage, StoredFile};
pub use schema::StoreSchema;
pub use tantivy::TantivyStore;

use std::collections::HashMap;

use async_trait::async_trait;

use crate::types::{
    Chunk, ChunkId, CourseId, Document, DocumentId, NewChunk, NewDocument, NewPage, Page, RetrievedChunk,
};

/// Documents and their page/chunk rows.
#[async_trait]
pub trait DocumentRepository: Send + Sync {
    /// Persist a new document and assign its id.
    async fn create_document(&self, document: NewDocument) -> StorageResult<Document>;

    async fn find_document(&self, id: DocumentId) -> StorageResult<Option<Document>>;

    /// All documents in ascending id order.
    async fn list_documents(&self) -> StorageResult<Vec<Document>>;

    /// Documents with no chunk rows, ascending by id, starting after `after`.
    async fn find_documents_without_chunks(
        &self,
        after: Option<DocumentId>,
        limit: usize,
    ) -> StorageResult<Vec<Document>>;

    async fn chunk_count(&self, document_id: DocumentId) -> StorageResult<usize>;

    /// Start an atomic batch of page and chunk writes for `document`.
    ///
    /// Nothing written through the transaction is visible until `commit`.
    async fn begin(&self, document: &Document) -> StorageResult<Box<dyn ChunkTransaction>>;
}

/// One atomic unit of page and chunk writes.
///
/// Dropping an unfinished transaction rolls it back.
#[async_trait]
pub trait ChunkTransaction: Send {
    /// Stage pages, skipping page numbers that already have a row.
    /// Returns the newly staged pages.
    async fn insert_pages(&mut self, pages: &[NewPage]) -> StorageResult<Vec<Page>>;

    /// Stage chunks. Each chunk is linked to its page by page number.
    async fn insert_chunks(&mut self, chunks: &[NewChunk]) -> StorageResult<Vec<Chunk>>;

    async fn commit(&mut self) -> StorageResult<()>;

    async fn rollback(&mut self) -> StorageResult<()>;
}

/// Natural-language relevance search over page text.
#[async_trait]
pub trait LexicalSearch: Send + Sync {
    /// Chunks of matching pages in the course, best first, at most `limit`.
    async fn search(
        &self,
        query: &str,
        course_id: CourseId,
        limit: usize,
    ) -> StorageResult<Vec<RetrievedChunk>>;

    /// Committed chunk rows among `ids`, mapped to their embedding ids.
    ///
    /// Used to tell live vector hits from vectors whose rows were never
    /// committed.
    async fn committed_embeddings(&self, ids: &[ChunkId]) -> StorageResult<HashMap<ChunkId, String>>;
}

/// Raw uploaded bytes.
#[async_trait]
pub trait FileStorage: Send + Sync {
    async fn save(
        &self,
        course_id: CourseId,
        file_name: &str,
        content: &[u8],
    ) -> StorageResult<StoredFile>;

    async fn get(&self, locator: &str) -> StorageResult<Vec<u8>>;

    async fn delete(&self, locator: &str) -> StorageResult<()>;
}
