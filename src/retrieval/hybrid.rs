//! Concurrent lexical + vector retrieval.

use std::sync::Arc;

use crate::embedding::EmbeddingProvider;
use crate::storage::LexicalSearch;
use crate::types::{ChunkId, CourseId, EmbeddingIntent, RetrievedChunk};
use crate::vector::VectorIndex;

use super::{RetrievalError, RetrievalResult};

/// Results limit applied to each branch by default.
pub const DEFAULT_TOP_K: usize = 5;

/// The two independently ranked result lists for one query.
#[derive(Debug, Clone, Default)]
pub struct HybridResults {
    /// Best first by lexical relevance.
    pub lexical: Vec<RetrievedChunk>,
    /// Best first by cosine similarity.
    pub vector: Vec<RetrievedChunk>,
}

impl HybridResults {
    pub fn is_empty(&self) -> bool {
        self.lexical.is_empty() && self.vector.is_empty()
    }
}

pub struct HybridRetriever {
    lexical: Arc<dyn LexicalSearch>,
    vectors: Arc<dyn VectorIndex>,
    embedder: Arc<dyn EmbeddingProvider>,
    top_k: usize,
}

impl HybridRetriever {
    pub fn new(
        lexical: Arc<dyn LexicalSearch>,
        vectors: Arc<dyn VectorIndex>,
        embedder: Arc<dyn EmbeddingProvider>,
    ) -> Self {
        Self {
            lexical,
            vectors,
            embedder,
            top_k: DEFAULT_TOP_K,
        }
    }

    pub fn with_top_k(mut self, top_k: usize) -> Self {
        self.top_k = top_k;
        self
    }

    pub fn top_k(&self) -> usize {
        self.top_k
    }

    /// Embed `query`, then run both searches concurrently within `course_id`.
    ///
    /// Fails if the query cannot be embedded. The first branch to fail fails
    /// the call and the other branch is dropped mid-flight. Vector hits are
    /// kept only when their chunk row is committed, so the vector list may
    /// hold fewer than `top_k` entries.
    pub async fn retrieve(
        &self,
        query: &str,
        course_id: CourseId,
    ) -> RetrievalResult<HybridResults> {
        let query_vector = self
            .embedder
            .embed(&[query.to_string()], EmbeddingIntent::Query)
            .await
            .map_err(RetrievalError::QueryEmbedding)?
            .into_iter()
            .next()
            .ok_or(RetrievalError::EmptyQueryEmbedding)?;

        let lexical = async {
            self.lexical
                .search(query, course_id, self.top_k)
                .await
                .map_err(RetrievalError::Lexical)
        };
        let vector = async {
            let hits = self
                .vectors
                .search(&query_vector, course_id, self.top_k)
                .await
                .map_err(RetrievalError::Vector)?;
            self.committed_only(hits).await
        };

        let (lexical, vector) = tokio::try_join!(lexical, vector)?;

        tracing::debug!(
            target: "retrieval",
            "course {course_id}: {} lexical, {} vector results",
            lexical.len(),
            vector.len()
        );

        Ok(HybridResults { lexical, vector })
    }

    /// Drop vector hits whose chunk row is missing or belongs to another
    /// embedding. A failed write can leave such vectors behind.
    async fn committed_only(
        &self,
        hits: Vec<RetrievedChunk>,
    ) -> RetrievalResult<Vec<RetrievedChunk>> {
        if hits.is_empty() {
            return Ok(hits);
        }

        let ids: Vec<ChunkId> = hits.iter().map(|hit| hit.chunk.id).collect();
        let committed = self
            .lexical
            .committed_embeddings(&ids)
            .await
            .map_err(RetrievalError::RowCheck)?;

        let found = hits.len();
        let live: Vec<RetrievedChunk> = hits
            .into_iter()
            .filter(|hit| committed.get(&hit.chunk.id) == Some(&hit.chunk.embedding_id))
            .collect();
        if live.len() < found {
            tracing::warn!(
                target: "retrieval",
                "ignored {} vector hits without a committed chunk row",
                found - live.len()
            );
        }
        Ok(live)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::{EmbeddingError, EmbeddingResult};
    use crate::storage::{StorageError, StorageResult};
    use crate::types::{Chunk, ChunkId, DocumentId, PageId, SemesterId};
    use crate::vector::{VectorPoint, VectorResult};
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::mpsc as std_mpsc;
    use std::time::Duration;

    fn retrieved(id: u32) -> RetrievedChunk {
        let chunk = Chunk {
            id: ChunkId::from_u32(id).unwrap(),
            page_id: PageId::from_u32(1).unwrap(),
            document_id: DocumentId::from_u32(1).unwrap(),
            course_id: CourseId::from_u32(1).unwrap(),
            semester_id: SemesterId::from_u32(1).unwrap(),
            chunk_index: id,
            start_offset: 0,
            end_offset: 4,
            text: format!("chunk {id}"),
            token_count: 2,
            embedding_id: format!("emb-{id}"),
            embedding_model_version: "v1".to_string(),
            vector_hash: String::new(),
        };
        RetrievedChunk::new(chunk, 1.0)
    }

    struct FixedEmbedder {
        fail: bool,
        intents: Mutex<Vec<EmbeddingIntent>>,
    }

    impl FixedEmbedder {
        fn new(fail: bool) -> Self {
            Self {
                fail,
                intents: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl EmbeddingProvider for FixedEmbedder {
        async fn embed(
            &self,
            texts: &[String],
            intent: EmbeddingIntent,
        ) -> EmbeddingResult<Vec<Vec<f32>>> {
            self.intents.lock().unwrap().push(intent);
            if self.fail {
                return Err(EmbeddingError::Model("offline".to_string()));
            }
            Ok(texts.iter().map(|_| vec![1.0, 0.0]).collect())
        }

        fn dimension(&self) -> usize {
            2
        }

        fn model_version(&self) -> &str {
            "fixed"
        }
    }

    enum Behavior {
        Return(Vec<RetrievedChunk>),
        Fail,
        /// Never completes; records when it is dropped.
        Hang(Arc<AtomicBool>),
        /// Lexical: blocks a pool thread until the vector branch starts.
        AwaitSibling(Mutex<Option<std_mpsc::Receiver<()>>>),
        /// Vector: announces that it started, then returns nothing.
        Announce(Mutex<Option<std_mpsc::Sender<()>>>),
    }

    struct DropFlag(Arc<AtomicBool>);

    impl Drop for DropFlag {
        fn drop(&mut self) {
            self.0.store(true, Ordering::SeqCst);
        }
    }

    /// Chunk ids from this value up have no committed row.
    const FIRST_UNCOMMITTED: u32 = 100;

    struct FakeLexical(Behavior);

    #[async_trait]
    impl LexicalSearch for FakeLexical {
        async fn search(
            &self,
            _query: &str,
            _course_id: CourseId,
            limit: usize,
        ) -> StorageResult<Vec<RetrievedChunk>> {
            match &self.0 {
                Behavior::Return(items) => Ok(items.iter().take(limit).cloned().collect()),
                Behavior::Fail => Err(StorageError::NotFound("lexical index".to_string())),
                Behavior::Hang(flag) => {
                    let _guard = DropFlag(Arc::clone(flag));
                    tokio::time::sleep(Duration::from_secs(3600)).await;
                    Ok(Vec::new())
                }
                Behavior::AwaitSibling(slot) => {
                    let signal = slot.lock().unwrap().take().unwrap();
                    let started = tokio::task::spawn_blocking(move || {
                        signal.recv_timeout(Duration::from_secs(5)).is_ok()
                    })
                    .await
                    .unwrap();
                    if started {
                        Ok(vec![retrieved(1)])
                    } else {
                        Err(StorageError::NotFound("vector branch never started".to_string()))
                    }
                }
                Behavior::Announce(_) => unreachable!(),
            }
        }

        async fn committed_embeddings(
            &self,
            ids: &[ChunkId],
        ) -> StorageResult<HashMap<ChunkId, String>> {
            Ok(ids
                .iter()
                .filter(|id| id.get() < FIRST_UNCOMMITTED)
                .map(|id| (*id, format!("emb-{}", id.get())))
                .collect())
        }
    }

    struct FakeVectors(Behavior);

    #[async_trait]
    impl VectorIndex for FakeVectors {
        async fn ensure_collection(&self) -> VectorResult<()> {
            Ok(())
        }

        async fn recreate_collection(&self) -> VectorResult<()> {
            Ok(())
        }

        async fn upsert(&self, _points: Vec<VectorPoint>) -> VectorResult<()> {
            Ok(())
        }

        async fn search(
            &self,
            _vector: &[f32],
            _course_id: CourseId,
            limit: usize,
        ) -> VectorResult<Vec<RetrievedChunk>> {
            match &self.0 {
                Behavior::Return(items) => Ok(items.iter().take(limit).cloned().collect()),
                Behavior::Fail => Err(crate::vector::VectorError::CollectionMissing(
                    "lectures".to_string(),
                )),
                Behavior::Hang(flag) => {
                    let _guard = DropFlag(Arc::clone(flag));
                    tokio::time::sleep(Duration::from_secs(3600)).await;
                    Ok(Vec::new())
                }
                Behavior::Announce(slot) => {
                    if let Some(sender) = slot.lock().unwrap().take() {
                        sender.send(()).unwrap();
                    }
                    Ok(Vec::new())
                }
                Behavior::AwaitSibling(_) => unreachable!(),
            }
        }
    }

    fn course() -> CourseId {
        CourseId::from_u32(1).unwrap()
    }

    #[tokio::test]
    async fn test_both_branches_returned_with_limit() {
        let embedder = Arc::new(FixedEmbedder::new(false));
        let retriever = HybridRetriever::new(
            Arc::new(FakeLexical(Behavior::Return((1..=8).map(retrieved).collect()))),
            Arc::new(FakeVectors(Behavior::Return(vec![retrieved(3), retrieved(9)]))),
            embedder.clone(),
        );

        let results = retriever.retrieve("heap", course()).await.unwrap();
        assert_eq!(results.lexical.len(), DEFAULT_TOP_K);
        assert_eq!(results.vector.len(), 2);
        assert_eq!(*embedder.intents.lock().unwrap(), vec![EmbeddingIntent::Query]);
    }

    #[tokio::test]
    async fn test_query_embedding_failure_is_fatal() {
        let retriever = HybridRetriever::new(
            Arc::new(FakeLexical(Behavior::Return(vec![retrieved(1)]))),
            Arc::new(FakeVectors(Behavior::Return(vec![retrieved(2)]))),
            Arc::new(FixedEmbedder::new(true)),
        );

        let result = retriever.retrieve("heap", course()).await;
        assert!(matches!(result, Err(RetrievalError::QueryEmbedding(_))));
    }

    #[tokio::test]
    async fn test_lexical_failure_cancels_vector_branch() {
        let dropped = Arc::new(AtomicBool::new(false));
        let retriever = HybridRetriever::new(
            Arc::new(FakeLexical(Behavior::Fail)),
            Arc::new(FakeVectors(Behavior::Hang(Arc::clone(&dropped)))),
            Arc::new(FixedEmbedder::new(false)),
        );

        let result = tokio::time::timeout(Duration::from_secs(5), retriever.retrieve("q", course()))
            .await
            .expect("retrieval should fail fast");
        assert!(matches!(result, Err(RetrievalError::Lexical(_))));
        assert!(dropped.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_vector_failure_cancels_lexical_branch() {
        let dropped = Arc::new(AtomicBool::new(false));
        let retriever = HybridRetriever::new(
            Arc::new(FakeLexical(Behavior::Hang(Arc::clone(&dropped)))),
            Arc::new(FakeVectors(Behavior::Fail)),
            Arc::new(FixedEmbedder::new(false)),
        );

        let result = tokio::time::timeout(Duration::from_secs(5), retriever.retrieve("q", course()))
            .await
            .expect("retrieval should fail fast");
        assert!(matches!(result, Err(RetrievalError::Vector(_))));
        assert!(dropped.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_vector_branch_runs_while_lexical_blocks() {
        let (tx, rx) = std_mpsc::channel();
        let retriever = HybridRetriever::new(
            Arc::new(FakeLexical(Behavior::AwaitSibling(Mutex::new(Some(rx))))),
            Arc::new(FakeVectors(Behavior::Announce(Mutex::new(Some(tx))))),
            Arc::new(FixedEmbedder::new(false)),
        );

        let results = retriever.retrieve("q", course()).await.unwrap();
        assert_eq!(results.lexical.len(), 1);
        assert!(results.vector.is_empty());
    }

    #[tokio::test]
    async fn test_vector_hits_without_committed_rows_are_dropped() {
        let mut reused = retrieved(3);
        reused.chunk.embedding_id = "emb-rolled-back".to_string();

        let retriever = HybridRetriever::new(
            Arc::new(FakeLexical(Behavior::Return(Vec::new()))),
            Arc::new(FakeVectors(Behavior::Return(vec![
                retrieved(FIRST_UNCOMMITTED),
                retrieved(2),
                reused,
            ]))),
            Arc::new(FixedEmbedder::new(false)),
        );

        let results = retriever.retrieve("heap", course()).await.unwrap();
        let ids: Vec<u32> = results.vector.iter().map(|r| r.chunk.id.get()).collect();
        assert_eq!(ids, vec![2]);
    }
}
