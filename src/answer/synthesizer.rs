use std::sync::Arc;

use tokio::sync::mpsc;

use super::prompt::{NO_CONTEXT_MESSAGE, system_prompt};
use super::{SynthesisError, SynthesisResult};
use crate::generation::{GenerationRequest, TextGenerator};
use crate::types::RetrievedChunk;

/// Turns fused chunks and a question into a grounded answer.
pub struct AnswerSynthesizer {
    generator: Arc<dyn TextGenerator>,
}

impl AnswerSynthesizer {
    pub fn new(generator: Arc<dyn TextGenerator>) -> Self {
        Self { generator }
    }

    /// Prompt for `query` over `chunks`, or `None` when there is no context.
    pub fn request(query: &str, chunks: &[RetrievedChunk]) -> Option<GenerationRequest> {
        if chunks.is_empty() {
            return None;
        }
        Some(GenerationRequest {
            system_prompt: system_prompt(chunks),
            user_prompt: query.to_string(),
        })
    }

    /// One generation call, or the fixed no-context answer without calling the model.
    pub async fn synthesize(&self, query: &str, chunks: &[RetrievedChunk]) -> SynthesisResult<String> {
        let Some(request) = Self::request(query, chunks) else {
            tracing::debug!(target: "answer", "no context for query, skipping generation");
            return Ok(NO_CONTEXT_MESSAGE.to_string());
        };

        self.generator
            .generate(&request)
            .await
            .map_err(SynthesisError::Generation)
    }

    /// Stream the answer into `sink`. With no context the fixed message is
    /// sent as the only fragment.
    pub async fn synthesize_stream(
        &self,
        query: &str,
        chunks: &[RetrievedChunk],
        sink: mpsc::Sender<String>,
    ) -> SynthesisResult<()> {
        let Some(request) = Self::request(query, chunks) else {
            // A dropped receiver means nobody is listening any more
            let _ = sink.send(NO_CONTEXT_MESSAGE.to_string()).await;
            return Ok(());
        };

        self.generator
            .generate_stream(&request, sink)
            .await
            .map_err(SynthesisError::Generation)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generation::{GenerationError, GenerationResult};
    use crate::types::{Chunk, ChunkId, CourseId, DocumentId, PageId, SemesterId};
    use async_trait::async_trait;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct RecordingGenerator {
        calls: AtomicUsize,
        last: Mutex<Option<GenerationRequest>>,
        fail: bool,
    }

    #[async_trait]
    impl TextGenerator for RecordingGenerator {
        async fn generate(&self, request: &GenerationRequest) -> GenerationResult<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            *self.last.lock().unwrap() = Some(request.clone());
            if self.fail {
                return Err(GenerationError::Api {
                    status: 503,
                    body: "overloaded".to_string(),
                });
            }
            Ok("Heaps are complete binary trees.".to_string())
        }

        async fn generate_stream(
            &self,
            request: &GenerationRequest,
            sink: mpsc::Sender<String>,
        ) -> GenerationResult<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            *self.last.lock().unwrap() = Some(request.clone());
            for piece in ["Heaps ", "are ", "trees."] {
                if sink.send(piece.to_string()).await.is_err() {
                    return Ok(());
                }
            }
            Ok(())
        }
    }

    fn retrieved(id: u32, text: &str) -> RetrievedChunk {
        RetrievedChunk::new(
            Chunk {
                id: ChunkId::from_u32(id).unwrap(),
                page_id: PageId::from_u32(1).unwrap(),
                document_id: DocumentId::from_u32(1).unwrap(),
                course_id: CourseId::from_u32(1).unwrap(),
                semester_id: SemesterId::from_u32(1).unwrap(),
                chunk_index: id,
                start_offset: 0,
                end_offset: 10,
                text: text.to_string(),
                token_count: 2,
                embedding_id: format!("emb-{id}"),
                embedding_model_version: "v1".to_string(),
                vector_hash: String::new(),
            },
            0.03,
        )
    }

    #[tokio::test]
    async fn test_empty_context_never_calls_generator() {
        let generator = Arc::new(RecordingGenerator::default());
        let synthesizer = AnswerSynthesizer::new(generator.clone());

        let answer = synthesizer.synthesize("What is a heap?", &[]).await.unwrap();
        assert_eq!(answer, NO_CONTEXT_MESSAGE);

        let (tx, mut rx) = mpsc::channel(4);
        synthesizer
            .synthesize_stream("What is a heap?", &[], tx)
            .await
            .unwrap();
        assert_eq!(rx.recv().await.as_deref(), Some(NO_CONTEXT_MESSAGE));
        assert!(rx.recv().await.is_none());

        assert_eq!(generator.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_generator_called_once_with_grounded_prompt() {
        let generator = Arc::new(RecordingGenerator::default());
        let synthesizer = AnswerSynthesizer::new(generator.clone());
        let chunks = vec![retrieved(4, "A heap is a tree."), retrieved(1, "Heaps back priority queues.")];

        let answer = synthesizer.synthesize("What is a heap?", &chunks).await.unwrap();
        assert_eq!(answer, "Heaps are complete binary trees.");
        assert_eq!(generator.calls.load(Ordering::SeqCst), 1);

        let request = generator.last.lock().unwrap().clone().unwrap();
        assert_eq!(request.user_prompt, "What is a heap?");
        let first = request.system_prompt.find("[Reference 1]\nA heap is a tree.").unwrap();
        let second = request
            .system_prompt
            .find("[Reference 2]\nHeaps back priority queues.")
            .unwrap();
        assert!(first < second);
    }

    #[tokio::test]
    async fn test_generation_failure_surfaces() {
        let generator = Arc::new(RecordingGenerator {
            fail: true,
            ..Default::default()
        });
        let synthesizer = AnswerSynthesizer::new(generator.clone());

        let result = synthesizer.synthesize("q", &[retrieved(1, "text")]).await;
        assert!(matches!(result, Err(SynthesisError::Generation(_))));
        assert_eq!(generator.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_stream_forwards_fragments_in_order() {
        let synthesizer = AnswerSynthesizer::new(Arc::new(RecordingGenerator::default()));
        let (tx, mut rx) = mpsc::channel(8);

        synthesizer
            .synthesize_stream("q", &[retrieved(1, "text")], tx)
            .await
            .unwrap();

        let mut collected = String::new();
        while let Some(piece) = rx.recv().await {
            collected.push_str(&piece);
        }
        assert_eq!(collected, "Heaps are trees.");
    }
}
