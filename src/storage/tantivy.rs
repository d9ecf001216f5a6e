//! Tantivy-backed document store and lexical search.
//!
//! A single index holds document, page and chunk records plus the id
//! counters. All writes go through one `IndexWriter` behind an async mutex;
//! a `TantivyTransaction` owns that writer from `begin` until it commits or
//! rolls back, so staged rows are never visible to readers before commit.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use tantivy::collector::{Count, TopDocs};
use tantivy::directory::MmapDirectory;
use tantivy::query::{BooleanQuery, ConstScoreQuery, Occur, Query, QueryParser, TermQuery};
use tantivy::schema::{Field, IndexRecordOption, Value};
use tantivy::{
    Index, IndexReader, IndexSettings, IndexWriter, ReloadPolicy, Searcher,
    TantivyDocument as TDoc, Term,
};
use tokio::sync::{Mutex, OwnedMutexGuard};

use super::error::{StorageError, StorageResult};
use super::schema::{KIND_CHUNK, KIND_DOCUMENT, KIND_META, KIND_PAGE, StoreSchema};
use super::{ChunkTransaction, DocumentRepository, LexicalSearch};
use crate::types::{
    Chunk, ChunkId, CourseId, Document, DocumentId, DocumentType, NewChunk, NewDocument, NewPage,
    Page, PageId, RetrievedChunk, SemesterId,
};
use crate::utils::get_utc_timestamp;

const META_NEXT_DOCUMENT: &str = "next_document_id";
const META_NEXT_PAGE: &str = "next_page_id";
const META_NEXT_CHUNK: &str = "next_chunk_id";

/// Writer heap budget.
const WRITER_HEAP_SIZE: usize = 50_000_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct IdCounters {
    next_document: u32,
    next_page: u32,
    next_chunk: u32,
}

impl Default for IdCounters {
    fn default() -> Self {
        Self {
            next_document: 1,
            next_page: 1,
            next_chunk: 1,
        }
    }
}

/// Hand out `*next` and advance it.
fn allocate(next: &mut u32, what: &'static str) -> StorageResult<u32> {
    let id = *next;
    *next = next.checked_add(1).ok_or(StorageError::IdOverflow(what))?;
    Ok(id)
}

struct WriterState {
    writer: IndexWriter<TDoc>,
    counters: IdCounters,
}

/// Document store and lexical search over one tantivy index.
///
/// Cloning is cheap; clones share the index, reader and writer.
#[derive(Clone)]
pub struct TantivyStore {
    index: Index,
    reader: IndexReader,
    schema: StoreSchema,
    writer: Arc<Mutex<WriterState>>,
    index_path: PathBuf,
}

impl std::fmt::Debug for TantivyStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TantivyStore")
            .field("index_path", &self.index_path)
            .finish()
    }
}

impl TantivyStore {
    /// Open the index at `index_path`, creating it if absent.
    pub fn open(index_path: impl AsRef<Path>) -> StorageResult<Self> {
        let index_path = index_path.as_ref().to_path_buf();
        std::fs::create_dir_all(&index_path)?;

        let (tantivy_schema, schema) = StoreSchema::build();

        let index = if index_path.join("meta.json").exists() {
            Index::open_in_dir(&index_path)?
        } else {
            let dir = MmapDirectory::open(&index_path)?;
            Index::create(dir, tantivy_schema, IndexSettings::default())?
        };

        let reader = index
            .reader_builder()
            .reload_policy(ReloadPolicy::Manual)
            .try_into()?;
        reader.reload()?;

        let counters = load_counters(&reader.searcher(), &schema)?;
        let writer = index.writer::<TDoc>(WRITER_HEAP_SIZE)?;

        tracing::debug!(
            target: "storage",
            "opened store at {} ({counters:?})",
            index_path.display()
        );

        Ok(Self {
            index,
            reader,
            schema,
            writer: Arc::new(Mutex::new(WriterState { writer, counters })),
            index_path,
        })
    }

    pub fn index_path(&self) -> &Path {
        &self.index_path
    }

    fn kind_query(&self, kind: &str) -> Box<dyn Query> {
        Box::new(TermQuery::new(
            Term::from_field_text(self.schema.kind, kind),
            IndexRecordOption::Basic,
        ))
    }

    /// Records of `kind` whose u64 fields equal the given values.
    fn filter_query(&self, kind: &str, equals: &[(Field, u64)]) -> Box<dyn Query> {
        let mut clauses: Vec<(Occur, Box<dyn Query>)> = vec![(Occur::Must, self.kind_query(kind))];
        for (field, value) in equals {
            clauses.push((Occur::Must, u64_term_query(*field, *value)));
        }
        Box::new(BooleanQuery::new(clauses))
    }

    fn collect(
        &self,
        searcher: &Searcher,
        query: &dyn Query,
        limit: Option<usize>,
    ) -> StorageResult<Vec<(f32, TDoc)>> {
        collect_docs(searcher, query, limit)
    }

    fn document_to_tantivy(&self, document: &Document) -> TDoc {
        let s = &self.schema;
        let mut doc = TDoc::new();
        doc.add_text(s.kind, KIND_DOCUMENT);
        doc.add_u64(s.id, document.id.get() as u64);
        doc.add_u64(s.course_id, document.course_id.get() as u64);
        doc.add_u64(s.semester_id, document.semester_id.get() as u64);
        doc.add_text(s.title, &document.title);
        doc.add_text(s.source, &document.source);
        doc.add_text(s.checksum, &document.checksum);
        doc.add_u64(s.version, document.version as u64);
        doc.add_text(s.doc_type, document.doc_type.as_str());
        doc.add_u64(s.created_at, document.created_at);
        doc
    }

    fn document_from_tantivy(&self, doc: &TDoc) -> StorageResult<Document> {
        let s = &self.schema;
        let doc_type_text = text_value(doc, s.doc_type);
        let doc_type = doc_type_text
            .parse::<DocumentType>()
            .map_err(|reason| StorageError::InvalidFieldValue {
                field: "doc_type".to_string(),
                reason,
            })?;

        Ok(Document {
            id: id_value(doc, s.id, "id", DocumentId::from_u32)?,
            course_id: id_value(doc, s.course_id, "course_id", CourseId::from_u32)?,
            semester_id: id_value(doc, s.semester_id, "semester_id", SemesterId::from_u32)?,
            title: text_value(doc, s.title),
            source: text_value(doc, s.source),
            checksum: text_value(doc, s.checksum),
            version: u32_value(doc, s.version, "version")?,
            doc_type,
            created_at: doc
                .get_first(s.created_at)
                .and_then(|v| v.as_u64())
                .unwrap_or(0),
        })
    }

    fn chunk_from_tantivy(&self, doc: &TDoc) -> StorageResult<Chunk> {
        let s = &self.schema;
        Ok(Chunk {
            id: id_value(doc, s.id, "id", ChunkId::from_u32)?,
            page_id: id_value(doc, s.page_id, "page_id", PageId::from_u32)?,
            document_id: id_value(doc, s.document_id, "document_id", DocumentId::from_u32)?,
            course_id: id_value(doc, s.course_id, "course_id", CourseId::from_u32)?,
            semester_id: id_value(doc, s.semester_id, "semester_id", SemesterId::from_u32)?,
            chunk_index: u32_value(doc, s.chunk_index, "chunk_index")?,
            start_offset: u32_value(doc, s.start_offset, "start_offset")?,
            end_offset: u32_value(doc, s.end_offset, "end_offset")?,
            text: text_value(doc, s.text),
            token_count: u32_value(doc, s.token_count, "token_count")?,
            embedding_id: text_value(doc, s.embedding_id),
            embedding_model_version: text_value(doc, s.embedding_model_version),
            vector_hash: text_value(doc, s.vector_hash),
        })
    }

    /// Chunks of one page in chunk index order.
    fn chunks_of_page(&self, searcher: &Searcher, page_id: u64) -> StorageResult<Vec<Chunk>> {
        let query = self.filter_query(KIND_CHUNK, &[(self.schema.page_id, page_id)]);
        let mut chunks = self
            .collect(searcher, query.as_ref(), None)?
            .iter()
            .map(|(_, doc)| self.chunk_from_tantivy(doc))
            .collect::<StorageResult<Vec<_>>>()?;
        chunks.sort_by_key(|chunk| chunk.chunk_index);
        Ok(chunks)
    }

    /// Committed page ids of a document, keyed by page number.
    fn committed_pages(&self, document_id: DocumentId) -> StorageResult<HashMap<u32, PageId>> {
        let searcher = self.reader.searcher();
        let query = self.filter_query(
            KIND_PAGE,
            &[(self.schema.document_id, document_id.get() as u64)],
        );

        let mut pages = HashMap::new();
        for (_, doc) in self.collect(&searcher, query.as_ref(), None)? {
            let number = u32_value(&doc, self.schema.page_number, "page_number")?;
            let id = id_value(&doc, self.schema.id, "id", PageId::from_u32)?;
            pages.insert(number, id);
        }
        Ok(pages)
    }

    /// All pages of a document in page number order.
    pub fn pages(&self, document_id: DocumentId) -> StorageResult<Vec<Page>> {
        let searcher = self.reader.searcher();
        let s = &self.schema;
        let query = self.filter_query(KIND_PAGE, &[(s.document_id, document_id.get() as u64)]);

        let mut pages = Vec::new();
        for (_, doc) in self.collect(&searcher, query.as_ref(), None)? {
            let language = text_value(&doc, s.language);
            pages.push(Page {
                id: id_value(&doc, s.id, "id", PageId::from_u32)?,
                document_id,
                page_number: u32_value(&doc, s.page_number, "page_number")?,
                text: text_value(&doc, s.text),
                language: (!language.is_empty()).then_some(language),
                token_count: u32_value(&doc, s.token_count, "token_count")?,
            });
        }
        pages.sort_by_key(|page| page.page_number);
        Ok(pages)
    }

    /// All chunks of a document in chunk index order.
    pub fn chunks(&self, document_id: DocumentId) -> StorageResult<Vec<Chunk>> {
        let searcher = self.reader.searcher();
        let query = self.filter_query(
            KIND_CHUNK,
            &[(self.schema.document_id, document_id.get() as u64)],
        );
        let mut chunks = self
            .collect(&searcher, query.as_ref(), None)?
            .iter()
            .map(|(_, doc)| self.chunk_from_tantivy(doc))
            .collect::<StorageResult<Vec<_>>>()?;
        chunks.sort_by_key(|chunk| chunk.chunk_index);
        Ok(chunks)
    }

    fn chunk_count_sync(&self, searcher: &Searcher, document_id: DocumentId) -> StorageResult<usize> {
        let query = self.filter_query(
            KIND_CHUNK,
            &[(self.schema.document_id, document_id.get() as u64)],
        );
        Ok(searcher.search(query.as_ref(), &Count)?)
    }

    fn all_documents(&self, searcher: &Searcher) -> StorageResult<Vec<Document>> {
        let mut documents = self
            .collect(searcher, self.kind_query(KIND_DOCUMENT).as_ref(), None)?
            .iter()
            .map(|(_, doc)| self.document_from_tantivy(doc))
            .collect::<StorageResult<Vec<_>>>()?;
        documents.sort_by_key(|document| document.id);
        Ok(documents)
    }
}

/// Run `query`, returning up to `limit` records (all when `None`).
fn collect_docs(
    searcher: &Searcher,
    query: &dyn Query,
    limit: Option<usize>,
) -> StorageResult<Vec<(f32, TDoc)>> {
    let limit = limit
        .unwrap_or_else(|| searcher.num_docs() as usize)
        .max(1);
    let top_docs = searcher.search(query, &TopDocs::with_limit(limit))?;

    let mut docs = Vec::with_capacity(top_docs.len());
    for (score, address) in top_docs {
        docs.push((score, searcher.doc::<TDoc>(address)?));
    }
    Ok(docs)
}

fn load_counters(searcher: &Searcher, schema: &StoreSchema) -> StorageResult<IdCounters> {
    let query = TermQuery::new(
        Term::from_field_text(schema.kind, KIND_META),
        IndexRecordOption::Basic,
    );
    let mut counters = IdCounters::default();

    for (_, doc) in collect_docs(searcher, &query, None)? {
        let key = text_value(&doc, schema.meta_key);
        let value = u32_value(&doc, schema.meta_value, "meta_value")?;
        match key.as_str() {
            META_NEXT_DOCUMENT => counters.next_document = value,
            META_NEXT_PAGE => counters.next_page = value,
            META_NEXT_CHUNK => counters.next_chunk = value,
            other => tracing::debug!(target: "storage", "ignoring meta key {other}"),
        }
    }

    Ok(counters)
}

fn u64_term_query(field: Field, value: u64) -> Box<dyn Query> {
    Box::new(TermQuery::new(
        Term::from_field_u64(field, value),
        IndexRecordOption::Basic,
    ))
}

fn text_value(doc: &TDoc, field: Field) -> String {
    doc.get_first(field)
        .and_then(|v| v.as_str())
        .unwrap_or("")
        .to_string()
}

fn u32_value(doc: &TDoc, field: Field, name: &str) -> StorageResult<u32> {
    let value = doc
        .get_first(field)
        .and_then(|v| v.as_u64())
        .ok_or_else(|| StorageError::InvalidFieldValue {
            field: name.to_string(),
            reason: "missing".to_string(),
        })?;
    u32::try_from(value).map_err(|_| StorageError::InvalidFieldValue {
        field: name.to_string(),
        reason: format!("{value} out of range"),
    })
}

fn id_value<T>(doc: &TDoc, field: Field, name: &str, make: fn(u32) -> Option<T>) -> StorageResult<T> {
    make(u32_value(doc, field, name)?).ok_or_else(|| StorageError::InvalidFieldValue {
        field: name.to_string(),
        reason: "zero id".to_string(),
    })
}

fn meta_doc(schema: &StoreSchema, key: &str, value: u32) -> TDoc {
    let mut doc = TDoc::new();
    doc.add_text(schema.kind, KIND_META);
    doc.add_text(schema.meta_key, key);
    doc.add_u64(schema.meta_value, value as u64);
    doc
}

/// Replace the persisted value of one counter in the pending commit.
fn stage_counter(
    writer: &mut IndexWriter<TDoc>,
    schema: &StoreSchema,
    key: &str,
    value: u32,
) -> StorageResult<()> {
    writer.delete_term(Term::from_field_text(schema.meta_key, key));
    writer.add_document(meta_doc(schema, key, value))?;
    Ok(())
}

#[async_trait]
impl DocumentRepository for TantivyStore {
    async fn create_document(&self, new: NewDocument) -> StorageResult<Document> {
        let mut state = self.writer.lock().await;
        let mut counters = state.counters;

        let raw_id = allocate(&mut counters.next_document, "documents")?;
        let id = DocumentId::from_u32(raw_id).ok_or(StorageError::IdOverflow("documents"))?;

        let document = Document {
            id,
            course_id: new.course_id,
            semester_id: new.semester_id,
            title: new.title,
            source: new.source,
            checksum: new.checksum,
            version: 1,
            doc_type: new.doc_type,
            created_at: get_utc_timestamp(),
        };

        let doc = self.document_to_tantivy(&document);
        let schema = self.schema;
        let result = (|| -> StorageResult<()> {
            state.writer.add_document(doc)?;
            stage_counter(&mut state.writer, &schema, META_NEXT_DOCUMENT, counters.next_document)?;
            state.writer.commit()?;
            Ok(())
        })();

        if let Err(e) = result {
            if let Err(rollback_err) = state.writer.rollback() {
                tracing::warn!(target: "storage", "rollback after failed insert failed: {rollback_err}");
            }
            return Err(e);
        }

        state.counters = counters;
        self.reader.reload()?;

        tracing::info!(
            target: "storage",
            "created document {} '{}' in course {}",
            document.id,
            document.title,
            document.course_id
        );
        Ok(document)
    }

    async fn find_document(&self, id: DocumentId) -> StorageResult<Option<Document>> {
        let searcher = self.reader.searcher();
        let query = self.filter_query(KIND_DOCUMENT, &[(self.schema.id, id.get() as u64)]);
        self.collect(&searcher, query.as_ref(), Some(1))?
            .first()
            .map(|(_, doc)| self.document_from_tantivy(doc))
            .transpose()
    }

    async fn list_documents(&self) -> StorageResult<Vec<Document>> {
        self.all_documents(&self.reader.searcher())
    }

    async fn find_documents_without_chunks(
        &self,
        after: Option<DocumentId>,
        limit: usize,
    ) -> StorageResult<Vec<Document>> {
        let searcher = self.reader.searcher();
        let mut pending = Vec::new();

        for document in self.all_documents(&searcher)? {
            if pending.len() >= limit {
                break;
            }
            if after.is_some_and(|cursor| document.id <= cursor) {
                continue;
            }
            if self.chunk_count_sync(&searcher, document.id)? == 0 {
                pending.push(document);
            }
        }

        Ok(pending)
    }

    async fn chunk_count(&self, document_id: DocumentId) -> StorageResult<usize> {
        self.chunk_count_sync(&self.reader.searcher(), document_id)
    }

    async fn begin(&self, document: &Document) -> StorageResult<Box<dyn ChunkTransaction>> {
        let state = self.writer.clone().lock_owned().await;
        let page_ids = self.committed_pages(document.id)?;
        let counters = state.counters;

        Ok(Box::new(TantivyTransaction {
            state,
            reader: self.reader.clone(),
            schema: self.schema,
            document: document.clone(),
            counters,
            page_ids,
            staged: 0,
            finished: false,
        }))
    }
}

#[async_trait]
impl LexicalSearch for TantivyStore {
    async fn search(
        &self,
        query: &str,
        course_id: CourseId,
        limit: usize,
    ) -> StorageResult<Vec<RetrievedChunk>> {
        if limit == 0 {
            return Ok(Vec::new());
        }

        // Tantivy searches block; keep them off the async workers
        let store = self.clone();
        let query = query.to_string();
        tokio::task::spawn_blocking(move || store.search_pages(&query, course_id, limit)).await?
    }

    async fn committed_embeddings(
        &self,
        ids: &[ChunkId],
    ) -> StorageResult<HashMap<ChunkId, String>> {
        let store = self.clone();
        let ids = ids.to_vec();
        tokio::task::spawn_blocking(move || store.embedding_ids(&ids)).await?
    }
}

impl TantivyStore {
    /// BM25 over page text, projected onto the chunks of matched pages.
    fn search_pages(
        &self,
        query: &str,
        course_id: CourseId,
        limit: usize,
    ) -> StorageResult<Vec<RetrievedChunk>> {
        let searcher = self.reader.searcher();
        let parser = QueryParser::for_index(&self.index, vec![self.schema.text]);
        let (text_query, errors) = parser.parse_query_lenient(query);
        if !errors.is_empty() {
            tracing::debug!(target: "storage", "lenient parse of {query:?} dropped {} clauses", errors.len());
        }

        // Filters must not contribute to the BM25 score
        let page_filter = ConstScoreQuery::new(self.kind_query(KIND_PAGE), 0.0);
        let course_filter =
            ConstScoreQuery::new(u64_term_query(self.schema.course_id, course_id.get() as u64), 0.0);
        let query = BooleanQuery::new(vec![
            (Occur::Must, text_query),
            (Occur::Must, Box::new(page_filter)),
            (Occur::Must, Box::new(course_filter)),
        ]);

        let mut results = Vec::with_capacity(limit);
        for (score, page) in self.collect(&searcher, &query, Some(limit))? {
            let page_id = page
                .get_first(self.schema.id)
                .and_then(|v| v.as_u64())
                .ok_or_else(|| StorageError::InvalidFieldValue {
                    field: "id".to_string(),
                    reason: "missing".to_string(),
                })?;

            for chunk in self.chunks_of_page(&searcher, page_id)? {
                if results.len() == limit {
                    break;
                }
                results.push(RetrievedChunk::new(chunk, score));
            }
            if results.len() == limit {
                break;
            }
        }

        tracing::debug!(
            target: "storage",
            "lexical search in course {course_id} returned {} chunks",
            results.len()
        );
        Ok(results)
    }

    fn embedding_ids(&self, ids: &[ChunkId]) -> StorageResult<HashMap<ChunkId, String>> {
        let searcher = self.reader.searcher();
        let mut found = HashMap::with_capacity(ids.len());
        for id in ids {
            let query = self.filter_query(KIND_CHUNK, &[(self.schema.id, id.get() as u64)]);
            if let Some((_, doc)) = self.collect(&searcher, query.as_ref(), Some(1))?.first() {
                found.insert(*id, text_value(doc, self.schema.embedding_id));
            }
        }
        Ok(found)
    }
}

/// Staged page and chunk writes for one document.
pub struct TantivyTransaction {
    state: OwnedMutexGuard<WriterState>,
    reader: IndexReader,
    schema: StoreSchema,
    document: Document,
    counters: IdCounters,
    page_ids: HashMap<u32, PageId>,
    staged: usize,
    finished: bool,
}

impl TantivyTransaction {
    fn ensure_open(&self) -> StorageResult<()> {
        if self.finished {
            return Err(StorageError::TransactionClosed);
        }
        Ok(())
    }

    /// Drop every staged row, keeping the ids handed out so far retired.
    ///
    /// Vectors written under those ids may outlive the rows, so the counters
    /// are committed at their high-water mark and never issue them again.
    fn discard(&mut self) -> StorageResult<()> {
        self.finished = true;
        self.state.writer.rollback()?;

        let counters = self.counters;
        if counters == self.state.counters {
            return Ok(());
        }
        self.state.counters = counters;

        let schema = self.schema;
        let writer = &mut self.state.writer;
        stage_counter(writer, &schema, META_NEXT_PAGE, counters.next_page)?;
        stage_counter(writer, &schema, META_NEXT_CHUNK, counters.next_chunk)?;
        writer.commit()?;
        self.reader.reload()?;
        Ok(())
    }
}

#[async_trait]
impl ChunkTransaction for TantivyTransaction {
    async fn insert_pages(&mut self, pages: &[NewPage]) -> StorageResult<Vec<Page>> {
        self.ensure_open()?;
        let s = self.schema;
        let mut inserted = Vec::new();

        for new in pages {
            if self.page_ids.contains_key(&new.page_number) {
                continue;
            }

            let raw_id = allocate(&mut self.counters.next_page, "pages")?;
            let id = PageId::from_u32(raw_id).ok_or(StorageError::IdOverflow("pages"))?;
            let page = Page {
                id,
                document_id: self.document.id,
                page_number: new.page_number,
                text: new.text.clone(),
                language: new.language.clone(),
                token_count: new.token_count,
            };

            let mut doc = TDoc::new();
            doc.add_text(s.kind, KIND_PAGE);
            doc.add_u64(s.id, id.get() as u64);
            doc.add_u64(s.document_id, self.document.id.get() as u64);
            doc.add_u64(s.course_id, self.document.course_id.get() as u64);
            doc.add_u64(s.semester_id, self.document.semester_id.get() as u64);
            doc.add_u64(s.page_number, page.page_number as u64);
            doc.add_text(s.text, &page.text);
            if let Some(language) = &page.language {
                doc.add_text(s.language, language);
            }
            doc.add_u64(s.token_count, page.token_count as u64);
            self.state.writer.add_document(doc)?;

            self.page_ids.insert(page.page_number, id);
            self.staged += 1;
            inserted.push(page);
        }

        Ok(inserted)
    }

    async fn insert_chunks(&mut self, chunks: &[NewChunk]) -> StorageResult<Vec<Chunk>> {
        self.ensure_open()?;
        let s = self.schema;
        let mut inserted = Vec::with_capacity(chunks.len());

        for new in chunks {
            let page_id = *self.page_ids.get(&new.page_number).ok_or(StorageError::MissingPage {
                document_id: self.document.id,
                page_number: new.page_number,
            })?;

            let raw_id = allocate(&mut self.counters.next_chunk, "chunks")?;
            let id = ChunkId::from_u32(raw_id).ok_or(StorageError::IdOverflow("chunks"))?;
            let chunk = Chunk {
                id,
                page_id,
                document_id: new.document_id,
                course_id: new.course_id,
                semester_id: new.semester_id,
                chunk_index: new.chunk_index,
                start_offset: new.start_offset,
                end_offset: new.end_offset,
                text: new.text.clone(),
                token_count: new.token_count,
                embedding_id: new.embedding_id.clone(),
                embedding_model_version: new.embedding_model_version.clone(),
                vector_hash: new.vector_hash.clone(),
            };

            let mut doc = TDoc::new();
            doc.add_text(s.kind, KIND_CHUNK);
            doc.add_u64(s.id, id.get() as u64);
            doc.add_u64(s.page_id, page_id.get() as u64);
            doc.add_u64(s.document_id, chunk.document_id.get() as u64);
            doc.add_u64(s.course_id, chunk.course_id.get() as u64);
            doc.add_u64(s.semester_id, chunk.semester_id.get() as u64);
            doc.add_u64(s.chunk_index, chunk.chunk_index as u64);
            doc.add_u64(s.start_offset, chunk.start_offset as u64);
            doc.add_u64(s.end_offset, chunk.end_offset as u64);
            doc.add_text(s.text, &chunk.text);
            doc.add_u64(s.token_count, chunk.token_count as u64);
            doc.add_text(s.embedding_id, &chunk.embedding_id);
            doc.add_text(s.embedding_model_version, &chunk.embedding_model_version);
            doc.add_text(s.vector_hash, &chunk.vector_hash);
            self.state.writer.add_document(doc)?;

            self.staged += 1;
            inserted.push(chunk);
        }

        Ok(inserted)
    }

    async fn commit(&mut self) -> StorageResult<()> {
        self.ensure_open()?;
        let schema = self.schema;
        let counters = self.counters;

        let result = (|| -> StorageResult<()> {
            let writer = &mut self.state.writer;
            stage_counter(writer, &schema, META_NEXT_PAGE, counters.next_page)?;
            stage_counter(writer, &schema, META_NEXT_CHUNK, counters.next_chunk)?;
            writer.commit()?;
            Ok(())
        })();

        if let Err(e) = result {
            if let Err(rollback_err) = self.discard() {
                tracing::warn!(target: "storage", "rollback after failed commit failed: {rollback_err}");
            }
            return Err(e);
        }

        self.finished = true;
        self.state.counters = counters;
        self.reader.reload()?;

        tracing::debug!(
            target: "storage",
            "committed {} rows for document {}",
            self.staged,
            self.document.id
        );
        Ok(())
    }

    async fn rollback(&mut self) -> StorageResult<()> {
        self.ensure_open()?;
        self.discard()?;
        tracing::debug!(
            target: "storage",
            "rolled back {} staged rows for document {}",
            self.staged,
            self.document.id
        );
        Ok(())
    }
}

impl Drop for TantivyTransaction {
    fn drop(&mut self) {
        if !self.finished && self.staged > 0 {
            tracing::warn!(
                target: "storage",
                "transaction for document {} dropped without commit, rolling back",
                self.document.id
            );
            if let Err(e) = self.discard() {
                tracing::error!(target: "storage", "rollback on drop failed: {e}");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn new_document(course: u32, title: &str) -> NewDocument {
        NewDocument {
            course_id: CourseId::from_u32(course).unwrap(),
            semester_id: SemesterId::from_u32(1).unwrap(),
            title: title.to_string(),
            source: format!("{course}/{title}.pdf"),
            checksum: "abc".to_string(),
            doc_type: DocumentType::Pdf,
        }
    }

    fn new_page(document: &Document, number: u32, text: &str) -> NewPage {
        NewPage {
            document_id: document.id,
            page_number: number,
            text: text.to_string(),
            language: None,
            token_count: 0,
        }
    }

    fn new_chunk(document: &Document, page_number: u32, index: u32, text: &str) -> NewChunk {
        NewChunk {
            document_id: document.id,
            course_id: document.course_id,
            semester_id: document.semester_id,
            page_number,
            chunk_index: index,
            start_offset: 0,
            end_offset: text.chars().count() as u32,
            text: text.to_string(),
            token_count: 0,
            embedding_id: format!("emb-{index}"),
            embedding_model_version: "test-v1".to_string(),
            vector_hash: "hash".to_string(),
        }
    }

    async fn index_document(store: &TantivyStore, document: &Document, pages: &[(u32, &str)]) {
        let mut tx = store.begin(document).await.unwrap();
        let new_pages: Vec<NewPage> = pages
            .iter()
            .map(|(n, text)| new_page(document, *n, text))
            .collect();
        tx.insert_pages(&new_pages).await.unwrap();
        let chunks: Vec<NewChunk> = pages
            .iter()
            .enumerate()
            .map(|(i, (n, text))| new_chunk(document, *n, i as u32, text))
            .collect();
        tx.insert_chunks(&chunks).await.unwrap();
        tx.commit().await.unwrap();
    }

    #[tokio::test]
    async fn test_create_and_find_document() {
        let temp_dir = TempDir::new().unwrap();
        let store = TantivyStore::open(temp_dir.path()).unwrap();

        let first = store.create_document(new_document(3, "intro")).await.unwrap();
        let second = store.create_document(new_document(3, "graphs")).await.unwrap();
        assert_eq!(first.id.get(), 1);
        assert_eq!(second.id.get(), 2);

        let found = store.find_document(second.id).await.unwrap().unwrap();
        assert_eq!(found.title, "graphs");
        assert_eq!(found.doc_type, DocumentType::Pdf);
        assert!(store
            .find_document(DocumentId::from_u32(99).unwrap())
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_counters_survive_reopen() {
        let temp_dir = TempDir::new().unwrap();
        {
            let store = TantivyStore::open(temp_dir.path()).unwrap();
            let document = store.create_document(new_document(1, "a")).await.unwrap();
            index_document(&store, &document, &[(1, "alpha")]).await;
        }

        let store = TantivyStore::open(temp_dir.path()).unwrap();
        let document = store.create_document(new_document(1, "b")).await.unwrap();
        assert_eq!(document.id.get(), 2);

        let mut tx = store.begin(&document).await.unwrap();
        let pages = tx.insert_pages(&[new_page(&document, 1, "beta")]).await.unwrap();
        assert_eq!(pages[0].id.get(), 2);
        tx.rollback().await.unwrap();
    }

    #[tokio::test]
    async fn test_rows_invisible_until_commit() {
        let temp_dir = TempDir::new().unwrap();
        let store = TantivyStore::open(temp_dir.path()).unwrap();
        let document = store.create_document(new_document(1, "a")).await.unwrap();

        let mut tx = store.begin(&document).await.unwrap();
        tx.insert_pages(&[new_page(&document, 1, "recursion basics")])
            .await
            .unwrap();
        tx.insert_chunks(&[new_chunk(&document, 1, 0, "recursion basics")])
            .await
            .unwrap();
        assert_eq!(store.chunk_count(document.id).await.unwrap(), 0);

        tx.commit().await.unwrap();
        assert_eq!(store.chunk_count(document.id).await.unwrap(), 1);
        assert!(matches!(
            tx.commit().await,
            Err(StorageError::TransactionClosed)
        ));
    }

    #[tokio::test]
    async fn test_page_language_round_trips() {
        let temp_dir = TempDir::new().unwrap();
        let store = TantivyStore::open(temp_dir.path()).unwrap();
        let document = store.create_document(new_document(1, "a")).await.unwrap();

        let mut tagged = new_page(&document, 1, "Rekursion");
        tagged.language = Some("de".to_string());
        let mut tx = store.begin(&document).await.unwrap();
        tx.insert_pages(&[tagged, new_page(&document, 2, "recursion")])
            .await
            .unwrap();
        tx.commit().await.unwrap();

        let languages: Vec<Option<String>> = store
            .pages(document.id)
            .unwrap()
            .into_iter()
            .map(|p| p.language)
            .collect();
        assert_eq!(languages, vec![Some("de".to_string()), None]);
    }

    #[tokio::test]
    async fn test_rollback_discards_rows() {
        let temp_dir = TempDir::new().unwrap();
        let store = TantivyStore::open(temp_dir.path()).unwrap();
        let document = store.create_document(new_document(1, "a")).await.unwrap();

        let mut tx = store.begin(&document).await.unwrap();
        tx.insert_pages(&[new_page(&document, 1, "text")]).await.unwrap();
        tx.insert_chunks(&[new_chunk(&document, 1, 0, "text")])
            .await
            .unwrap();
        tx.rollback().await.unwrap();
        drop(tx);

        assert_eq!(store.chunk_count(document.id).await.unwrap(), 0);
        assert!(store.pages(document.id).unwrap().is_empty());

        // Ids handed out to the rolled back rows are never issued again
        index_document(&store, &document, &[(1, "text")]).await;
        let pages = store.pages(document.id).unwrap();
        assert_eq!(pages[0].id.get(), 2);
        let chunks = store.chunks(document.id).unwrap();
        assert_eq!(chunks[0].id.get(), 2);
    }

    #[tokio::test]
    async fn test_retired_ids_survive_reopen() {
        let temp_dir = TempDir::new().unwrap();
        {
            let store = TantivyStore::open(temp_dir.path()).unwrap();
            let document = store.create_document(new_document(1, "a")).await.unwrap();
            let mut tx = store.begin(&document).await.unwrap();
            tx.insert_pages(&[new_page(&document, 1, "text")]).await.unwrap();
            tx.insert_chunks(&[new_chunk(&document, 1, 0, "text")])
                .await
                .unwrap();
            tx.rollback().await.unwrap();
        }

        let store = TantivyStore::open(temp_dir.path()).unwrap();
        let document = store.create_document(new_document(1, "b")).await.unwrap();
        index_document(&store, &document, &[(1, "other text")]).await;
        assert_eq!(store.chunks(document.id).unwrap()[0].id.get(), 2);
    }

    #[tokio::test]
    async fn test_dropped_transaction_rolls_back() {
        let temp_dir = TempDir::new().unwrap();
        let store = TantivyStore::open(temp_dir.path()).unwrap();
        let document = store.create_document(new_document(1, "a")).await.unwrap();

        {
            let mut tx = store.begin(&document).await.unwrap();
            tx.insert_pages(&[new_page(&document, 1, "text")]).await.unwrap();
        }

        // A later commit must not publish the abandoned rows
        let other = store.create_document(new_document(1, "b")).await.unwrap();
        assert_eq!(other.id.get(), 2);
        assert!(store.pages(document.id).unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_chunks_link_to_pages_from_earlier_batch() {
        let temp_dir = TempDir::new().unwrap();
        let store = TantivyStore::open(temp_dir.path()).unwrap();
        let document = store.create_document(new_document(1, "a")).await.unwrap();

        index_document(&store, &document, &[(1, "first page"), (2, "second page")]).await;

        let mut tx = store.begin(&document).await.unwrap();
        let pages = tx
            .insert_pages(&[new_page(&document, 2, "second page")])
            .await
            .unwrap();
        assert!(pages.is_empty(), "existing page must not be inserted twice");
        let chunks = tx
            .insert_chunks(&[new_chunk(&document, 2, 5, "more of page two")])
            .await
            .unwrap();
        tx.commit().await.unwrap();

        let committed = store.pages(document.id).unwrap();
        assert_eq!(committed.len(), 2);
        assert_eq!(chunks[0].page_id, committed[1].id);
    }

    #[tokio::test]
    async fn test_chunk_for_unknown_page_fails() {
        let temp_dir = TempDir::new().unwrap();
        let store = TantivyStore::open(temp_dir.path()).unwrap();
        let document = store.create_document(new_document(1, "a")).await.unwrap();

        let mut tx = store.begin(&document).await.unwrap();
        let result = tx.insert_chunks(&[new_chunk(&document, 9, 0, "x")]).await;
        assert!(matches!(
            result,
            Err(StorageError::MissingPage { page_number: 9, .. })
        ));
    }

    #[tokio::test]
    async fn test_documents_without_chunks_cursor() {
        let temp_dir = TempDir::new().unwrap();
        let store = TantivyStore::open(temp_dir.path()).unwrap();

        let mut documents = Vec::new();
        for title in ["a", "b", "c", "d"] {
            documents.push(store.create_document(new_document(1, title)).await.unwrap());
        }
        index_document(&store, &documents[1], &[(1, "indexed")]).await;

        let first = store.find_documents_without_chunks(None, 2).await.unwrap();
        let titles: Vec<&str> = first.iter().map(|d| d.title.as_str()).collect();
        assert_eq!(titles, vec!["a", "c"]);

        let rest = store
            .find_documents_without_chunks(Some(first[1].id), 2)
            .await
            .unwrap();
        assert_eq!(rest.len(), 1);
        assert_eq!(rest[0].title, "d");
    }

    #[tokio::test]
    async fn test_lexical_search_scoped_and_ranked() {
        let temp_dir = TempDir::new().unwrap();
        let store = TantivyStore::open(temp_dir.path()).unwrap();

        let algorithms = store.create_document(new_document(1, "algorithms")).await.unwrap();
        let databases = store.create_document(new_document(2, "databases")).await.unwrap();

        index_document(
            &store,
            &algorithms,
            &[
                (1, "Dijkstra computes shortest paths. Dijkstra uses a priority queue."),
                (2, "Sorting algorithms: quicksort and mergesort."),
            ],
        )
        .await;
        index_document(&store, &databases, &[(1, "Dijkstra also wrote about databases?")]).await;

        let course = CourseId::from_u32(1).unwrap();
        let results = store.search("dijkstra shortest", course, 5).await.unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].chunk.document_id, algorithms.id);
        assert!(results[0].score > 0.0);

        let results = store.search("sorting OR dijkstra", course, 5).await.unwrap();
        assert_eq!(results.len(), 2);
        assert!(results[0].score >= results[1].score);

        assert!(store.search("", course, 5).await.unwrap().is_empty());
        assert!(store.search("dijkstra", course, 0).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_search_yields_to_sibling_futures() {
        let temp_dir = TempDir::new().unwrap();
        let store = TantivyStore::open(temp_dir.path()).unwrap();
        let document = store.create_document(new_document(1, "graphs")).await.unwrap();
        index_document(&store, &document, &[(1, "breadth first search on graphs")]).await;

        let sibling_ran = std::sync::atomic::AtomicBool::new(false);
        let course = CourseId::from_u32(1).unwrap();
        let (results, ()) = tokio::join!(
            async {
                let results = store.search("graphs", course, 5).await;
                // The sibling was polled while the search ran on the blocking pool
                assert!(sibling_ran.load(std::sync::atomic::Ordering::SeqCst));
                results
            },
            async {
                sibling_ran.store(true, std::sync::atomic::Ordering::SeqCst);
            }
        );

        let results = results.unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].chunk.document_id, document.id);
    }

    #[tokio::test]
    async fn test_lexical_search_limits_chunks() {
        let temp_dir = TempDir::new().unwrap();
        let store = TantivyStore::open(temp_dir.path()).unwrap();
        let document = store.create_document(new_document(1, "a")).await.unwrap();

        let mut tx = store.begin(&document).await.unwrap();
        tx.insert_pages(&[new_page(&document, 1, "heaps and heapsort")])
            .await
            .unwrap();
        let chunks: Vec<NewChunk> = (0..4)
            .map(|i| new_chunk(&document, 1, i, &format!("part {i}")))
            .collect();
        tx.insert_chunks(&chunks).await.unwrap();
        tx.commit().await.unwrap();

        let results = store
            .search("heapsort", CourseId::from_u32(1).unwrap(), 3)
            .await
            .unwrap();
        let indices: Vec<u32> = results.iter().map(|r| r.chunk.chunk_index).collect();
        assert_eq!(indices, vec![0, 1, 2]);
    }
}
