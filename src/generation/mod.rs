//! Text generation backends.

pub mod gemini;

pub use gemini::GeminiGenerator;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;

#[derive(Error, Debug)]
pub enum GenerationError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Generation API returned {status}: {body}")]
    Api { status: u16, body: String },

    #[error("Malformed response: {0}")]
    Response(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

pub type GenerationResult<T> = Result<T, GenerationError>;

/// Prompt pair sent to the model. Retrieved context is already embedded in
/// `system_prompt`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerationRequest {
    pub system_prompt: String,
    pub user_prompt: String,
}

#[async_trait]
pub trait TextGenerator: Send + Sync {
    /// Complete answer text.
    async fn generate(&self, request: &GenerationRequest) -> GenerationResult<String>;

    /// Send answer fragments to `sink` as they arrive, in order.
    ///
    /// Returns `Ok(())` early when the receiving side is dropped.
    async fn generate_stream(
        &self,
        request: &GenerationRequest,
        sink: mpsc::Sender<String>,
    ) -> GenerationResult<()>;
}
