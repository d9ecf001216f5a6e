//! Local embeddings via fastembed (ONNX runtime).

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use fastembed::{EmbeddingModel, InitOptions, TextEmbedding};
use parking_lot::Mutex;

use super::{EmbeddingError, EmbeddingProvider, EmbeddingResult, check_count};
use crate::types::EmbeddingIntent;

/// Parse a model name as written in settings.
pub fn parse_model(name: &str) -> Option<EmbeddingModel> {
    let model = match name {
        "AllMiniLML6V2" | "all-MiniLM-L6-v2" => EmbeddingModel::AllMiniLML6V2,
        "ParaphraseMLMiniLML12V2" | "paraphrase-multilingual-MiniLM-L12-v2" => {
            EmbeddingModel::ParaphraseMLMiniLML12V2
        }
        "BGESmallENV15" | "bge-small-en-v1.5" => EmbeddingModel::BGESmallENV15,
        "MultilingualE5Small" | "multilingual-e5-small" => EmbeddingModel::MultilingualE5Small,
        "MultilingualE5Base" | "multilingual-e5-base" => EmbeddingModel::MultilingualE5Base,
        _ => return None,
    };
    Some(model)
}

/// E5 models are trained with "query: " and "passage: " prefixes.
fn uses_e5_prefixes(model: &EmbeddingModel) -> bool {
    matches!(
        model,
        EmbeddingModel::MultilingualE5Small | EmbeddingModel::MultilingualE5Base
    )
}

fn prefix_for(intent: EmbeddingIntent) -> &'static str {
    match intent {
        EmbeddingIntent::Index => "passage: ",
        EmbeddingIntent::Query => "query: ",
    }
}

/// Directory where downloaded models are cached.
pub fn models_dir() -> PathBuf {
    dirs::cache_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("lecture-rag")
        .join("models")
}

/// Embedding provider backed by a single local model instance.
///
/// `TextEmbedding::embed` needs exclusive access, so calls are serialized
/// and run on the blocking pool.
pub struct FastEmbedProvider {
    model: Arc<Mutex<TextEmbedding>>,
    prefixed: bool,
    dimension: usize,
    model_version: String,
}

impl FastEmbedProvider {
    /// Load (downloading on first use) the named model.
    pub fn new(
        model_name: &str,
        model_version: impl Into<String>,
        show_download_progress: bool,
    ) -> EmbeddingResult<Self> {
        let model = parse_model(model_name).ok_or_else(|| {
            EmbeddingError::Model(format!("unknown fastembed model '{model_name}'"))
        })?;
        let prefixed = uses_e5_prefixes(&model);

        tracing::info!(target: "embedding", "loading embedding model {model_name}");

        let mut text_model = TextEmbedding::try_new(
            InitOptions::new(model)
                .with_cache_dir(models_dir())
                .with_show_download_progress(show_download_progress),
        )
        .map_err(|e| EmbeddingError::Model(format!("failed to initialize {model_name}: {e}")))?;

        // Get dimensions by generating a test embedding
        let dimension = text_model
            .embed(vec!["test"], None)
            .map_err(|e| EmbeddingError::Model(e.to_string()))?
            .into_iter()
            .next()
            .map(|v| v.len())
            .ok_or_else(|| EmbeddingError::Model("model returned no test embedding".to_string()))?;

        tracing::info!(
            target: "embedding",
            "embedding model ready: {model_name}, {dimension} dimensions"
        );

        Ok(Self {
            model: Arc::new(Mutex::new(text_model)),
            prefixed,
            dimension,
            model_version: model_version.into(),
        })
    }

    fn prepare(&self, texts: &[String], intent: EmbeddingIntent) -> Vec<String> {
        if !self.prefixed {
            return texts.to_vec();
        }
        let prefix = prefix_for(intent);
        texts.iter().map(|t| format!("{prefix}{t}")).collect()
    }
}

#[async_trait]
impl EmbeddingProvider for FastEmbedProvider {
    async fn embed(
        &self,
        texts: &[String],
        intent: EmbeddingIntent,
    ) -> EmbeddingResult<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let inputs = self.prepare(texts, intent);
        let model = Arc::clone(&self.model);
        let vectors = tokio::task::spawn_blocking(move || {
            model
                .lock()
                .embed(inputs, None)
                .map_err(|e| EmbeddingError::Model(e.to_string()))
        })
        .await??;

        check_count(texts.len(), &vectors)?;
        Ok(vectors)
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn model_version(&self) -> &str {
        &self.model_version
    }
}
