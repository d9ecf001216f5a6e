//! Question answering: retrieval, fusion and synthesis for one question.

use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::answer::{AnswerSynthesizer, SynthesisError};
use crate::retrieval::{
    DEFAULT_TOP_N, HybridRetriever, RRF_K, RetrievalError, reciprocal_rank_fusion,
};
use crate::types::{CourseId, RetrievedChunk};

#[derive(Error, Debug)]
pub enum QaError {
    #[error(transparent)]
    Retrieval(#[from] RetrievalError),

    #[error(transparent)]
    Synthesis(#[from] SynthesisError),

    #[error("Request cancelled")]
    Cancelled,
}

pub type QaResult<T> = Result<T, QaError>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AskRequest {
    pub course_id: CourseId,
    pub question: String,
}

impl AskRequest {
    pub fn new(course_id: CourseId, question: impl Into<String>) -> Self {
        Self {
            course_id,
            question: question.into(),
        }
    }
}

/// Answer text plus the fused chunks it was grounded on, best first.
#[derive(Debug, Clone, Serialize)]
pub struct Answer {
    pub text: String,
    pub sources: Vec<RetrievedChunk>,
}

pub struct QaService {
    retriever: HybridRetriever,
    synthesizer: AnswerSynthesizer,
    rrf_k: f32,
    top_n: usize,
}

impl QaService {
    pub fn new(retriever: HybridRetriever, synthesizer: AnswerSynthesizer) -> Self {
        Self {
            retriever,
            synthesizer,
            rrf_k: RRF_K,
            top_n: DEFAULT_TOP_N,
        }
    }

    /// Override the fusion constant and the number of chunks kept.
    pub fn with_fusion(mut self, rrf_k: f32, top_n: usize) -> Self {
        self.rrf_k = rrf_k;
        self.top_n = top_n;
        self
    }

    /// Retrieve and fuse context for a question.
    pub async fn context(&self, request: &AskRequest) -> QaResult<Vec<RetrievedChunk>> {
        let results = self
            .retriever
            .retrieve(&request.question, request.course_id)
            .await?;
        let fused =
            reciprocal_rank_fusion(&results.lexical, &results.vector, self.rrf_k, self.top_n);
        tracing::debug!(
            target: "qa",
            "fused {} lexical and {} vector results into {}",
            results.lexical.len(),
            results.vector.len(),
            fused.len()
        );
        Ok(fused)
    }

    pub async fn ask(&self, request: AskRequest, cancel: &CancellationToken) -> QaResult<Answer> {
        let work = async {
            let sources = self.context(&request).await?;
            let text = self
                .synthesizer
                .synthesize(&request.question, &sources)
                .await?;
            Ok(Answer { text, sources })
        };

        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(QaError::Cancelled),
            result = work => result,
        }
    }

    /// Stream the answer into `sink` and return the sources it was built from.
    pub async fn ask_stream(
        &self,
        request: AskRequest,
        sink: mpsc::Sender<String>,
        cancel: &CancellationToken,
    ) -> QaResult<Vec<RetrievedChunk>> {
        let work = async {
            let sources = self.context(&request).await?;
            self.synthesizer
                .synthesize_stream(&request.question, &sources, sink)
                .await?;
            Ok(sources)
        };

        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(QaError::Cancelled),
            result = work => result,
        }
    }
}
