//! Command implementations for the CLI.
//!
//! Each command lives in its own module. The helpers here build the
//! collaborators commands share from `Settings`.

pub mod ask;
pub mod collection;
pub mod documents;
pub mod init;
pub mod sync;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio_util::sync::CancellationToken;

use crate::config::{EmbeddingBackend, Settings, VectorBackend};
use crate::embedding::{EmbeddingProvider, FastEmbedProvider, GeminiEmbedder};
use crate::generation::{GeminiGenerator, TextGenerator};
use crate::storage::{LocalFileStorage, TantivyStore};
use crate::vector::{MemoryVectorIndex, QdrantIndex, VectorIndex};

/// Resolve a configured path against the workspace root.
pub fn resolve_path(settings: &Settings, path: &Path) -> PathBuf {
    if path.is_absolute() {
        return path.to_path_buf();
    }
    match &settings.workspace_root {
        Some(root) => root.join(path),
        None => path.to_path_buf(),
    }
}

pub fn open_store(settings: &Settings) -> Result<Arc<TantivyStore>> {
    let path = resolve_path(settings, &settings.index_path).join("store");
    let store = TantivyStore::open(&path)
        .with_context(|| format!("failed to open store at {}", path.display()))?;
    Ok(Arc::new(store))
}

pub fn open_files(settings: &Settings) -> Result<Arc<LocalFileStorage>> {
    let root = resolve_path(settings, &settings.storage.root);
    let files = LocalFileStorage::new(&root)
        .with_context(|| format!("failed to open file storage at {}", root.display()))?;
    Ok(Arc::new(files))
}

pub fn build_embedder(settings: &Settings) -> Result<Arc<dyn EmbeddingProvider>> {
    let config = &settings.embedding;
    let model_version = config.effective_model_version();

    let embedder: Arc<dyn EmbeddingProvider> = match config.backend {
        EmbeddingBackend::Fastembed => {
            Arc::new(FastEmbedProvider::new(&config.model, model_version, true)?)
        }
        EmbeddingBackend::Gemini => {
            let api_key = config
                .api_key
                .as_deref()
                .context("embedding.api_key is not set (LR_EMBEDDING__API_KEY)")?;
            Arc::new(GeminiEmbedder::new(
                api_key,
                &config.base_url,
                &config.model,
                config.dimension,
                model_version,
                Duration::from_secs(config.timeout_secs),
            )?)
        }
    };
    Ok(embedder)
}

pub fn build_vectors(settings: &Settings, dimension: usize) -> Result<Arc<dyn VectorIndex>> {
    let config = &settings.vector;
    let index: Arc<dyn VectorIndex> = match config.backend {
        VectorBackend::Local => {
            let path = resolve_path(settings, &settings.vector_snapshot_path());
            Arc::new(
                MemoryVectorIndex::persistent(&path, dimension)
                    .with_context(|| format!("failed to load vectors from {}", path.display()))?,
            )
        }
        VectorBackend::Qdrant => Arc::new(QdrantIndex::new(
            &config.url,
            config.api_key.as_deref(),
            config.collection.clone(),
            dimension,
            Duration::from_secs(config.timeout_secs),
        )?),
    };
    Ok(index)
}

pub fn build_generator(settings: &Settings) -> Result<Arc<dyn TextGenerator>> {
    let config = &settings.generation;
    let api_key = config
        .api_key
        .as_deref()
        .context("generation.api_key is not set (LR_GENERATION__API_KEY)")?;
    Ok(Arc::new(GeminiGenerator::new(
        api_key,
        &config.base_url,
        &config.model,
        config.temperature,
        config.max_output_tokens,
        Duration::from_secs(config.timeout_secs),
    )?))
}

/// Token cancelled on the first Ctrl-C.
pub fn cancel_on_ctrl_c() -> CancellationToken {
    let token = CancellationToken::new();
    let child = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("Received interrupt, stopping...");
            child.cancel();
        }
    });
    token
}
