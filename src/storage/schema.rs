//! Tantivy schema for the lecture store.
//!
//! Documents, pages, chunks and id counters share one index and are told
//! apart by the `kind` field.

use tantivy::schema::{
    FAST, Field, IndexRecordOption, NumericOptions, STORED, STRING, Schema, SchemaBuilder,
    TextFieldIndexing, TextOptions,
};

pub const KIND_DOCUMENT: &str = "document";
pub const KIND_PAGE: &str = "page";
pub const KIND_CHUNK: &str = "chunk";
pub const KIND_META: &str = "meta";

/// Schema fields for the lecture store.
#[derive(Debug, Clone, Copy)]
pub struct StoreSchema {
    /// Record discriminator (`document`, `page`, `chunk`, `meta`).
    pub kind: Field,

    /// Id of the record within its kind.
    pub id: Field,

    pub document_id: Field,
    pub course_id: Field,
    pub semester_id: Field,
    pub page_id: Field,

    pub page_number: Field,
    pub chunk_index: Field,
    pub start_offset: Field,
    pub end_offset: Field,
    pub token_count: Field,

    // Document attributes
    pub title: Field,
    pub source: Field,
    pub checksum: Field,
    pub version: Field,
    pub doc_type: Field,
    pub created_at: Field,

    /// Page or chunk text. Tokenized for BM25 search.
    pub text: Field,
    pub language: Field,

    pub embedding_id: Field,
    pub embedding_model_version: Field,
    pub vector_hash: Field,

    /// Metadata key field (for id counters).
    pub meta_key: Field,

    /// Metadata value field.
    pub meta_value: Field,
}

impl StoreSchema {
    pub fn build() -> (Schema, Self) {
        let mut builder = SchemaBuilder::default();

        let kind = builder.add_text_field("kind", STRING | STORED | FAST);

        // Numeric options for indexed u64 fields
        let indexed_u64 = NumericOptions::default()
            .set_indexed()
            .set_stored()
            .set_fast();

        let id = builder.add_u64_field("id", indexed_u64.clone());
        let document_id = builder.add_u64_field("document_id", indexed_u64.clone());
        let course_id = builder.add_u64_field("course_id", indexed_u64.clone());
        let semester_id = builder.add_u64_field("semester_id", STORED);
        let page_id = builder.add_u64_field("page_id", indexed_u64);

        let page_number = builder.add_u64_field("page_number", STORED);
        let chunk_index = builder.add_u64_field("chunk_index", STORED | FAST);
        let start_offset = builder.add_u64_field("start_offset", STORED);
        let end_offset = builder.add_u64_field("end_offset", STORED);
        let token_count = builder.add_u64_field("token_count", STORED);

        let title = builder.add_text_field("title", STORED);
        let source = builder.add_text_field("source", STORED);
        let checksum = builder.add_text_field("checksum", STRING | STORED);
        let version = builder.add_u64_field("version", STORED);
        let doc_type = builder.add_text_field("doc_type", STRING | STORED);
        let created_at = builder.add_u64_field("created_at", STORED);

        let text_options = TextOptions::default()
            .set_indexing_options(
                TextFieldIndexing::default()
                    .set_tokenizer("default")
                    .set_index_option(IndexRecordOption::WithFreqsAndPositions),
            )
            .set_stored();
        let text = builder.add_text_field("text", text_options);
        let language = builder.add_text_field("language", STORED);

        let embedding_id = builder.add_text_field("embedding_id", STRING | STORED);
        let embedding_model_version = builder.add_text_field("embedding_model_version", STORED);
        let vector_hash = builder.add_text_field("vector_hash", STORED);

        let meta_key = builder.add_text_field("meta_key", STRING | STORED | FAST);
        let meta_value = builder.add_u64_field("meta_value", STORED | FAST);

        let schema = builder.build();

        let store_schema = Self {
            kind,
            id,
            document_id,
            course_id,
            semester_id,
            page_id,
            page_number,
            chunk_index,
            start_offset,
            end_offset,
            token_count,
            title,
            source,
            checksum,
            version,
            doc_type,
            created_at,
            text,
            language,
            embedding_id,
            embedding_model_version,
            vector_hash,
            meta_key,
            meta_value,
        };

        (schema, store_schema)
    }
}
