//! Configuration module for lecture-rag.
//!
//! This module provides a layered configuration system that supports:
//! - Default values
//! - TOML configuration file
//! - Environment variable overrides
//!
//! # Environment Variables
//!
//! Environment variables must be prefixed with `LR_` and use double underscores
//! to separate nested levels:
//! - `LR_RETRIEVAL__TOP_K=8` sets `retrieval.top_k`
//! - `LR_GENERATION__API_KEY=...` sets `generation.api_key`
//! - `LR_INGESTION__CHUNKING__CHUNK_CHARS=800` sets `ingestion.chunking.chunk_chars`

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::documents::{ChunkingConfig, ExtractionConfig};

const CONFIG_DIR: &str = ".lecture-rag";
const CONFIG_FILE: &str = "settings.toml";
const ENV_PREFIX: &str = "LR_";

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Settings {
    /// Version of the configuration schema
    #[serde(default = "default_version")]
    pub version: u32,

    /// Path to the tantivy store
    #[serde(default = "default_index_path")]
    pub index_path: PathBuf,

    /// Workspace root directory (where .lecture-rag is located)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub workspace_root: Option<PathBuf>,

    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub ingestion: IngestionConfig,

    #[serde(default)]
    pub retrieval: RetrievalConfig,

    #[serde(default)]
    pub embedding: EmbeddingConfig,

    #[serde(default)]
    pub generation: GenerationConfig,

    #[serde(default)]
    pub vector: VectorConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct StorageConfig {
    /// Directory holding uploaded files
    #[serde(default = "default_storage_root")]
    pub root: PathBuf,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct IngestionConfig {
    #[serde(default)]
    pub chunking: ChunkingConfig,

    #[serde(default)]
    pub extraction: ExtractionConfig,

    /// Documents fetched per selection page
    #[serde(default = "default_document_batch_size")]
    pub document_batch_size: usize,

    /// Chunks embedded and written per transaction
    #[serde(default = "default_chunk_batch_size")]
    pub chunk_batch_size: usize,

    /// Pause between chunk sub-batches, in milliseconds
    #[serde(default = "default_batch_pause_ms")]
    pub batch_pause_ms: u64,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct RetrievalConfig {
    /// Results taken from each search branch
    #[serde(default = "default_top_k")]
    pub top_k: usize,

    /// Chunks kept after rank fusion
    #[serde(default = "default_fused_top_n")]
    pub fused_top_n: usize,

    /// Reciprocal rank fusion constant
    #[serde(default = "default_rrf_k")]
    pub rrf_k: f32,
}

#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingBackend {
    /// Local ONNX model via fastembed
    #[default]
    Fastembed,
    /// Gemini embedding API
    Gemini,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default)]
    pub backend: EmbeddingBackend,

    /// Model name (fastembed model or Gemini model id)
    #[serde(default = "default_embedding_model")]
    pub model: String,

    /// Version tag stamped on chunks. Defaults to the model name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_version: Option<String>,

    /// Output dimension for remote models
    #[serde(default = "default_embedding_dimension")]
    pub dimension: usize,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    #[serde(default = "default_gemini_url")]
    pub base_url: String,

    #[serde(default = "default_request_timeout_secs")]
    pub timeout_secs: u64,
}

impl EmbeddingConfig {
    pub fn effective_model_version(&self) -> String {
        self.model_version
            .clone()
            .unwrap_or_else(|| self.model.clone())
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct GenerationConfig {
    #[serde(default = "default_generation_model")]
    pub model: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    #[serde(default = "default_gemini_url")]
    pub base_url: String,

    #[serde(default = "default_temperature")]
    pub temperature: f32,

    #[serde(default = "default_max_output_tokens")]
    pub max_output_tokens: u32,

    #[serde(default = "default_generation_timeout_secs")]
    pub timeout_secs: u64,
}

#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum VectorBackend {
    /// In-process index snapshotted next to the store
    #[default]
    Local,
    /// Qdrant server
    Qdrant,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct VectorConfig {
    #[serde(default)]
    pub backend: VectorBackend,

    #[serde(default = "default_qdrant_url")]
    pub url: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    #[serde(default = "default_collection")]
    pub collection: String,

    #[serde(default = "default_request_timeout_secs")]
    pub timeout_secs: u64,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct LoggingConfig {
    /// Default level for all targets
    #[serde(default = "default_log_level")]
    pub default: String,

    /// Per-target overrides (e.g. `ingest = "debug"`)
    #[serde(default)]
    pub modules: HashMap<String, String>,
}

// Default value functions
fn default_version() -> u32 {
    1
}
fn default_index_path() -> PathBuf {
    PathBuf::from(".lecture-rag/index")
}
fn default_storage_root() -> PathBuf {
    PathBuf::from(".lecture-rag/files")
}
fn default_document_batch_size() -> usize {
    10
}
fn default_chunk_batch_size() -> usize {
    100
}
fn default_batch_pause_ms() -> u64 {
    500
}
fn default_top_k() -> usize {
    5
}
fn default_fused_top_n() -> usize {
    3
}
fn default_rrf_k() -> f32 {
    60.0
}
fn default_embedding_model() -> String {
    "MultilingualE5Small".to_string()
}
fn default_embedding_dimension() -> usize {
    768
}
fn default_gemini_url() -> String {
    "https://generativelanguage.googleapis.com".to_string()
}
fn default_request_timeout_secs() -> u64 {
    30
}
fn default_generation_model() -> String {
    "gemini-2.0-flash".to_string()
}
fn default_temperature() -> f32 {
    0.2
}
fn default_max_output_tokens() -> u32 {
    1024
}
fn default_generation_timeout_secs() -> u64 {
    120
}
fn default_qdrant_url() -> String {
    "http://localhost:6333".to_string()
}
fn default_collection() -> String {
    "lecture_chunks".to_string()
}
fn default_log_level() -> String {
    "warn".to_string()
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            version: default_version(),
            index_path: default_index_path(),
            workspace_root: None,
            storage: StorageConfig::default(),
            ingestion: IngestionConfig::default(),
            retrieval: RetrievalConfig::default(),
            embedding: EmbeddingConfig::default(),
            generation: GenerationConfig::default(),
            vector: VectorConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            root: default_storage_root(),
        }
    }
}

impl Default for IngestionConfig {
    fn default() -> Self {
        Self {
            chunking: ChunkingConfig::default(),
            extraction: ExtractionConfig::default(),
            document_batch_size: default_document_batch_size(),
            chunk_batch_size: default_chunk_batch_size(),
            batch_pause_ms: default_batch_pause_ms(),
        }
    }
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
            fused_top_n: default_fused_top_n(),
            rrf_k: default_rrf_k(),
        }
    }
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            backend: EmbeddingBackend::default(),
            model: default_embedding_model(),
            model_version: None,
            dimension: default_embedding_dimension(),
            api_key: None,
            base_url: default_gemini_url(),
            timeout_secs: default_request_timeout_secs(),
        }
    }
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            model: default_generation_model(),
            api_key: None,
            base_url: default_gemini_url(),
            temperature: default_temperature(),
            max_output_tokens: default_max_output_tokens(),
            timeout_secs: default_generation_timeout_secs(),
        }
    }
}

impl Default for VectorConfig {
    fn default() -> Self {
        Self {
            backend: VectorBackend::default(),
            url: default_qdrant_url(),
            api_key: None,
            collection: default_collection(),
            timeout_secs: default_request_timeout_secs(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            default: default_log_level(),
            modules: HashMap::new(),
        }
    }
}

impl Settings {
    /// Load configuration from all sources
    pub fn load() -> Result<Self, Box<figment::Error>> {
        // Try to find the workspace root by looking for .lecture-rag directory
        let config_path = Self::find_workspace_config()
            .unwrap_or_else(|| PathBuf::from(CONFIG_DIR).join(CONFIG_FILE));

        Self::figment(config_path)
            .extract()
            .map_err(Box::new)
            .map(|mut settings: Settings| {
                if settings.workspace_root.is_none() {
                    settings.workspace_root = Self::workspace_root();
                }
                settings
            })
    }

    /// Load configuration from a specific file
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self, Box<figment::Error>> {
        Self::figment(path.as_ref().to_path_buf())
            .extract()
            .map_err(Box::new)
    }

    fn figment(config_path: PathBuf) -> Figment {
        Figment::new()
            // Start with defaults
            .merge(Serialized::defaults(Settings::default()))
            // Layer in config file if it exists
            .merge(Toml::file(config_path))
            // Double underscore (__) separates nested levels,
            // single underscore remains as is within field names
            .merge(Env::prefixed(ENV_PREFIX).map(|key| {
                key.as_str().to_lowercase().replace("__", ".").into()
            }))
    }

    /// Find the workspace config by looking for a .lecture-rag directory
    /// from the current directory up to root
    fn find_workspace_config() -> Option<PathBuf> {
        Self::workspace_root().map(|root| root.join(CONFIG_DIR).join(CONFIG_FILE))
    }

    /// Get the workspace root directory (where .lecture-rag is located)
    pub fn workspace_root() -> Option<PathBuf> {
        let current = std::env::current_dir().ok()?;

        current
            .ancestors()
            .find(|ancestor| ancestor.join(CONFIG_DIR).is_dir())
            .map(Path::to_path_buf)
    }

    /// Check values that would make ingestion or retrieval misbehave
    pub fn validate(&self) -> Result<(), String> {
        self.ingestion.chunking.validate()?;

        if self.ingestion.document_batch_size == 0 {
            return Err("ingestion.document_batch_size must be greater than zero".to_string());
        }
        if self.ingestion.chunk_batch_size == 0 {
            return Err("ingestion.chunk_batch_size must be greater than zero".to_string());
        }
        if self.retrieval.top_k == 0 || self.retrieval.fused_top_n == 0 {
            return Err("retrieval.top_k and retrieval.fused_top_n must be greater than zero".to_string());
        }
        if self.retrieval.rrf_k <= 0.0 {
            return Err(format!(
                "retrieval.rrf_k must be positive, got {}",
                self.retrieval.rrf_k
            ));
        }

        Ok(())
    }

    /// Path of the local vector snapshot
    pub fn vector_snapshot_path(&self) -> PathBuf {
        self.index_path.join("vectors.json")
    }

    /// Save current configuration to file
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), Box<dyn std::error::Error>> {
        let parent = path.as_ref().parent().ok_or("Invalid path")?;
        std::fs::create_dir_all(parent)?;

        let toml_string = toml::to_string_pretty(self)?;
        std::fs::write(path, toml_string)?;

        Ok(())
    }

    /// Create a default settings file in the current directory
    pub fn init_config_file(force: bool) -> Result<PathBuf, Box<dyn std::error::Error>> {
        let config_path = PathBuf::from(CONFIG_DIR).join(CONFIG_FILE);

        if !force && config_path.exists() {
            return Err("Configuration file already exists. Use --force to overwrite".into());
        }

        let mut settings = Settings::default();
        if let Ok(current_dir) = std::env::current_dir() {
            settings.workspace_root = Some(current_dir);
        }

        settings.save(&config_path)?;
        Ok(config_path)
    }
}
