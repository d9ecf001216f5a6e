//! Grounded answer synthesis over fused chunks.

pub mod prompt;
pub mod synthesizer;

pub use prompt::{NO_CONTEXT_MESSAGE, build_context, system_prompt};
pub use synthesizer::AnswerSynthesizer;

use thiserror::Error;

use crate::generation::GenerationError;

#[derive(Error, Debug)]
pub enum SynthesisError {
    #[error("Answer generation failed: {0}")]
    Generation(#[source] GenerationError),
}

pub type SynthesisResult<T> = Result<T, SynthesisError>;
