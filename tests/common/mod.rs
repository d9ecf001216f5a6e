//! Shared fixtures for integration tests.
#![allow(dead_code)]

use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use lecture_rag::documents::{ExtractError, PageExtractor};
use lecture_rag::embedding::{EmbeddingProvider, EmbeddingResult};
use lecture_rag::generation::{GenerationRequest, GenerationResult, TextGenerator};
use lecture_rag::storage::{DocumentRepository, FileStorage, LocalFileStorage, TantivyStore};
use lecture_rag::types::{CourseId, Document, DocumentType, EmbeddingIntent, NewDocument, SemesterId};
use lecture_rag::vector::{VectorError, VectorIndex, VectorPoint, VectorResult};
use lecture_rag::{RetrievedChunk, types::DocumentId};
use tempfile::TempDir;
use tokio::sync::mpsc;

pub const DIMENSION: usize = 32;

/// Bag-of-words embedder: each lowercase word bumps one hashed dimension.
#[derive(Default)]
pub struct HashingEmbedder {
    pub calls: AtomicUsize,
    pub intents: Mutex<Vec<EmbeddingIntent>>,
}

pub fn hash_embed(text: &str) -> Vec<f32> {
    let mut vector = vec![0.0; DIMENSION];
    for word in text.split_whitespace() {
        let word = word
            .trim_matches(|c: char| !c.is_alphanumeric())
            .to_lowercase();
        if word.is_empty() {
            continue;
        }
        let bucket = word
            .bytes()
            .fold(7u32, |acc, b| acc.wrapping_mul(31).wrapping_add(b as u32));
        vector[bucket as usize % DIMENSION] += 1.0;
    }
    vector
}

#[async_trait]
impl EmbeddingProvider for HashingEmbedder {
    async fn embed(
        &self,
        texts: &[String],
        intent: EmbeddingIntent,
    ) -> EmbeddingResult<Vec<Vec<f32>>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.intents.lock().unwrap().push(intent);
        Ok(texts.iter().map(|t| hash_embed(t)).collect())
    }

    fn dimension(&self) -> usize {
        DIMENSION
    }

    fn model_version(&self) -> &str {
        "hashing-v1"
    }
}

/// Extractor that must never be reached by plain-text documents.
pub struct UnusedExtractor;

#[async_trait]
impl PageExtractor for UnusedExtractor {
    async fn extract(&self, _content: &[u8]) -> Result<Vec<String>, ExtractError> {
        Err(ExtractError::Io(std::io::Error::other("no extractor in tests")))
    }
}

/// Vector index wrapper that fails upserts for chosen documents, or the
/// n-th upsert call (1-based) when `fail_on_call` is set.
pub struct FlakyVectors<V> {
    pub inner: V,
    pub fail_for: Mutex<Vec<DocumentId>>,
    pub fail_on_call: Mutex<Option<usize>>,
    pub upserts: AtomicUsize,
}

impl<V> FlakyVectors<V> {
    pub fn new(inner: V, fail_for: Vec<DocumentId>) -> Self {
        Self {
            inner,
            fail_for: Mutex::new(fail_for),
            fail_on_call: Mutex::new(None),
            upserts: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl<V: VectorIndex> VectorIndex for FlakyVectors<V> {
    async fn ensure_collection(&self) -> VectorResult<()> {
        self.inner.ensure_collection().await
    }

    async fn recreate_collection(&self) -> VectorResult<()> {
        self.inner.recreate_collection().await
    }

    async fn upsert(&self, points: Vec<VectorPoint>) -> VectorResult<()> {
        let call = self.upserts.fetch_add(1, Ordering::SeqCst) + 1;
        let failing = self.fail_for.lock().unwrap().clone();
        let failing_call = *self.fail_on_call.lock().unwrap() == Some(call);
        if failing_call || points.iter().any(|p| failing.contains(&p.chunk.document_id)) {
            return Err(VectorError::Api {
                status: 503,
                body: "unavailable".to_string(),
            });
        }
        self.inner.upsert(points).await
    }

    async fn search(
        &self,
        vector: &[f32],
        course_id: CourseId,
        limit: usize,
    ) -> VectorResult<Vec<RetrievedChunk>> {
        self.inner.search(vector, course_id, limit).await
    }
}

/// Generator that answers with the numbered references it was given.
#[derive(Default)]
pub struct EchoGenerator {
    pub calls: AtomicUsize,
    pub requests: Mutex<Vec<GenerationRequest>>,
}

#[async_trait]
impl TextGenerator for EchoGenerator {
    async fn generate(&self, request: &GenerationRequest) -> GenerationResult<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().unwrap().push(request.clone());
        let references = request.system_prompt.matches("[Reference ").count();
        Ok(format!("answered from {references} references"))
    }

    async fn generate_stream(
        &self,
        request: &GenerationRequest,
        sink: mpsc::Sender<String>,
    ) -> GenerationResult<()> {
        let answer = self.generate(request).await?;
        for word in answer.split_inclusive(' ') {
            if sink.send(word.to_string()).await.is_err() {
                break;
            }
        }
        Ok(())
    }
}

/// Store, file storage and the temp dir that owns them.
pub struct Workspace {
    pub _dir: TempDir,
    pub store: Arc<TantivyStore>,
    pub files: Arc<LocalFileStorage>,
}

impl Workspace {
    pub fn new() -> Self {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(TantivyStore::open(dir.path().join("store")).unwrap());
        let files = Arc::new(LocalFileStorage::new(dir.path().join("files")).unwrap());
        Self {
            _dir: dir,
            store,
            files,
        }
    }

    /// Save `text` as a notes document in `course`.
    pub async fn add_notes(&self, course: u32, title: &str, text: &str) -> Document {
        let course_id = CourseId::from_u32(course).unwrap();
        let stored = self
            .files
            .save(course_id, &format!("{title}.md"), text.as_bytes())
            .await
            .unwrap();
        self.store
            .create_document(NewDocument {
                course_id,
                semester_id: SemesterId::from_u32(1).unwrap(),
                title: title.to_string(),
                source: stored.locator,
                checksum: stored.checksum,
                doc_type: DocumentType::Notes,
            })
            .await
            .unwrap()
    }
}

/// Text of `words` distinct words, long enough to span several chunks.
pub fn long_text(words: usize) -> String {
    (0..words)
        .map(|i| format!("word{i}"))
        .collect::<Vec<_>>()
        .join(" ")
}
