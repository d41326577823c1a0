//! Configuration types for document querying.
//!
//! Everything the pipeline needs (LLM choice, retrieval knobs, timeouts) is
//! carried by one explicit [`QueryConfig`] value handed to
//! [`crate::query::QueryEngine`]. There is no process-wide settings object:
//! the server builds one config at startup, and callers that need a
//! per-request override clone it and change fields.

use crate::error::QueryError;
use crate::progress::ProgressCallback;
use edgequake_llm::LLMProvider;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

/// Upper bound accepted for [`QueryConfig::max_retries`].
pub const MAX_RETRIES_LIMIT: u32 = 10;

/// Configuration for answering questions about a document.
///
/// Built via [`QueryConfig::builder()`] or using [`QueryConfig::default()`].
///
/// # Example
/// ```rust
/// use docquery::QueryConfig;
///
/// let config = QueryConfig::builder()
///     .top_k(5)
///     .chunk_size(800)
///     .chunk_overlap(150)
///     .model("gpt-4.1-mini")
///     .build()
///     .unwrap();
/// ```
#[derive(Clone)]
pub struct QueryConfig {
    /// LLM model identifier, e.g. "gpt-4.1-mini", "claude-sonnet-4-20250514".
    /// If None, uses provider default.
    pub model: Option<String>,

    /// LLM provider name (e.g. "openai", "anthropic", "ollama").
    /// If None along with `provider`, the provider is auto-detected.
    pub provider_name: Option<String>,

    /// Pre-constructed LLM provider. Takes precedence over `provider_name`.
    pub provider: Option<Arc<dyn LLMProvider>>,

    /// Sampling temperature for the decision call. Default: 0.0.
    ///
    /// Decisions should be reproducible for the same retrieved context, so
    /// the default is fully greedy.
    pub temperature: f32,

    /// Maximum tokens the LLM may generate per question. Default: 1024.
    pub max_tokens: usize,

    /// Maximum retry attempts on a failed or timed-out LLM call. Default: 2.
    /// At most [`MAX_RETRIES_LIMIT`].
    ///
    /// Replies that arrive but fail to parse are not retried.
    pub max_retries: u32,

    /// Initial retry delay in milliseconds (exponential backoff). Default: 500.
    pub retry_backoff_ms: u64,

    /// Custom system prompt. If None, uses built-in default.
    pub system_prompt: Option<String>,

    /// Number of chunks retrieved per question. Range: 1–20. Default: 4.
    pub top_k: usize,

    /// Maximum chunk length in characters. Default: 1000.
    pub chunk_size: usize,

    /// Characters shared between neighbouring chunks. Must be below
    /// `chunk_size`. Default: 200.
    pub chunk_overlap: usize,

    /// Embedding model used for both chunks and questions.
    pub embedding: EmbeddingBackend,

    /// Texts per embedding call while building the index. Default: 32.
    pub embed_batch_size: usize,

    /// Questions evaluated at once. Default: 1 (strictly sequential).
    ///
    /// Answers keep input order whatever the value.
    pub concurrency: usize,

    /// Download timeout for the document in seconds. Default: 120.
    pub download_timeout_secs: u64,

    /// Per-LLM-call timeout in seconds. Default: 60.
    pub api_timeout_secs: u64,

    /// Largest accepted document body in bytes. Default: 50 MiB.
    pub max_document_bytes: u64,

    /// Explicit path to the pdfium shared library. If None, the system
    /// library search path is used.
    pub pdfium_lib_path: Option<PathBuf>,

    /// Optional per-question progress events.
    pub progress_callback: Option<ProgressCallback>,
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            model: None,
            provider_name: None,
            provider: None,
            temperature: 0.0,
            max_tokens: 1024,
            max_retries: 2,
            retry_backoff_ms: 500,
            system_prompt: None,
            top_k: 4,
            chunk_size: 1000,
            chunk_overlap: 200,
            embedding: EmbeddingBackend::default(),
            embed_batch_size: 32,
            concurrency: 1,
            download_timeout_secs: 120,
            api_timeout_secs: 60,
            max_document_bytes: 50 * 1024 * 1024,
            pdfium_lib_path: None,
            progress_callback: None,
        }
    }
}

impl fmt::Debug for QueryConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueryConfig")
            .field("model", &self.model)
            .field("provider_name", &self.provider_name)
            .field("provider", &self.provider.as_ref().map(|_| "<dyn LLMProvider>"))
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .field("max_retries", &self.max_retries)
            .field("top_k", &self.top_k)
            .field("chunk_size", &self.chunk_size)
            .field("chunk_overlap", &self.chunk_overlap)
            .field("embedding", &self.embedding)
            .field("concurrency", &self.concurrency)
            .field("download_timeout_secs", &self.download_timeout_secs)
            .field("api_timeout_secs", &self.api_timeout_secs)
            .field("pdfium_lib_path", &self.pdfium_lib_path)
            .finish()
    }
}

impl QueryConfig {
    /// Create a new builder for `QueryConfig`.
    pub fn builder() -> QueryConfigBuilder {
        QueryConfigBuilder {
            config: Self::default(),
        }
    }

    /// Check cross-field constraints. Called by [`QueryConfigBuilder::build`]
    /// and again by the engine, since fields are public.
    pub fn validate(&self) -> Result<(), QueryError> {
        if self.top_k == 0 || self.top_k > 20 {
            return Err(QueryError::InvalidConfig(format!(
                "top_k must be 1–20, got {}",
                self.top_k
            )));
        }
        if self.max_retries > MAX_RETRIES_LIMIT {
            return Err(QueryError::InvalidConfig(format!(
                "max_retries must be at most {}, got {}",
                MAX_RETRIES_LIMIT, self.max_retries
            )));
        }
        if self.chunk_size == 0 {
            return Err(QueryError::InvalidConfig("chunk_size must be ≥ 1".into()));
        }
        if self.chunk_overlap >= self.chunk_size {
            return Err(QueryError::InvalidConfig(format!(
                "chunk_overlap ({}) must be smaller than chunk_size ({})",
                self.chunk_overlap, self.chunk_size
            )));
        }
        if self.concurrency == 0 {
            return Err(QueryError::InvalidConfig("concurrency must be ≥ 1".into()));
        }
        if self.embed_batch_size == 0 {
            return Err(QueryError::InvalidConfig(
                "embed_batch_size must be ≥ 1".into(),
            ));
        }
        if let EmbeddingBackend::Hashing { dimensions } = self.embedding {
            if dimensions < 16 {
                return Err(QueryError::InvalidConfig(format!(
                    "hashing embedder needs at least 16 dimensions, got {}",
                    dimensions
                )));
            }
        }
        Ok(())
    }
}

/// Builder for [`QueryConfig`].
pub struct QueryConfigBuilder {
    config: QueryConfig,
}

impl fmt::Debug for QueryConfigBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueryConfigBuilder")
            .field("config", &self.config)
            .finish()
    }
}

impl QueryConfigBuilder {
    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.config.model = Some(model.into());
        self
    }

    pub fn provider_name(mut self, name: impl Into<String>) -> Self {
        self.config.provider_name = Some(name.into());
        self
    }

    pub fn provider(mut self, provider: Arc<dyn LLMProvider>) -> Self {
        self.config.provider = Some(provider);
        self
    }

    pub fn temperature(mut self, t: f32) -> Self {
        self.config.temperature = t.clamp(0.0, 2.0);
        self
    }

    pub fn max_tokens(mut self, n: usize) -> Self {
        self.config.max_tokens = n;
        self
    }

    pub fn max_retries(mut self, n: u32) -> Self {
        self.config.max_retries = n;
        self
    }

    pub fn retry_backoff_ms(mut self, ms: u64) -> Self {
        self.config.retry_backoff_ms = ms;
        self
    }

    pub fn system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.config.system_prompt = Some(prompt.into());
        self
    }

    pub fn top_k(mut self, k: usize) -> Self {
        self.config.top_k = k;
        self
    }

    pub fn chunk_size(mut self, chars: usize) -> Self {
        self.config.chunk_size = chars;
        self
    }

    pub fn chunk_overlap(mut self, chars: usize) -> Self {
        self.config.chunk_overlap = chars;
        self
    }

    pub fn embedding(mut self, backend: EmbeddingBackend) -> Self {
        self.config.embedding = backend;
        self
    }

    pub fn embed_batch_size(mut self, n: usize) -> Self {
        self.config.embed_batch_size = n;
        self
    }

    pub fn concurrency(mut self, n: usize) -> Self {
        self.config.concurrency = n.max(1);
        self
    }

    pub fn download_timeout_secs(mut self, secs: u64) -> Self {
        self.config.download_timeout_secs = secs;
        self
    }

    pub fn api_timeout_secs(mut self, secs: u64) -> Self {
        self.config.api_timeout_secs = secs;
        self
    }

    pub fn max_document_bytes(mut self, bytes: u64) -> Self {
        self.config.max_document_bytes = bytes;
        self
    }

    pub fn pdfium_lib_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.pdfium_lib_path = Some(path.into());
        self
    }

    pub fn progress_callback(mut self, cb: ProgressCallback) -> Self {
        self.config.progress_callback = Some(cb);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<QueryConfig, QueryError> {
        self.config.validate()?;
        Ok(self.config)
    }
}

// ── Enums ────────────────────────────────────────────────────────────────

/// Which embedding model turns text into vectors.
///
/// The same backend embeds the chunks and the questions of a request;
/// mixing backends would make similarity scores meaningless.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum EmbeddingBackend {
    /// Local sentence-transformer run by `fastembed` (default). The model is
    /// fetched into `cache_dir` on first use, then works offline.
    FastEmbed {
        model: FastEmbedModel,
        cache_dir: Option<PathBuf>,
    },
    /// Feature-hashing embedder: no model files, no API key, deterministic.
    Hashing { dimensions: usize },
    /// Ollama `/api/embed` endpoint, e.g. `nomic-embed-text`.
    Ollama { base_url: String, model: String },
}

impl Default for EmbeddingBackend {
    fn default() -> Self {
        EmbeddingBackend::FastEmbed {
            model: FastEmbedModel::default(),
            cache_dir: None,
        }
    }
}

/// Sentence-embedding models available through the `fastembed` backend.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum FastEmbedModel {
    /// `sentence-transformers/all-MiniLM-L6-v2`, 384 dimensions. (default)
    #[default]
    #[serde(rename = "all-minilm-l6-v2")]
    AllMiniLmL6V2,
    /// `BAAI/bge-small-en-v1.5`, 384 dimensions.
    #[serde(rename = "bge-small-en-v1.5")]
    BgeSmallEnV15,
    /// `BAAI/bge-base-en-v1.5`, 768 dimensions.
    #[serde(rename = "bge-base-en-v1.5")]
    BgeBaseEnV15,
}

impl fmt::Display for FastEmbedModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FastEmbedModel::AllMiniLmL6V2 => "all-minilm-l6-v2",
            FastEmbedModel::BgeSmallEnV15 => "bge-small-en-v1.5",
            FastEmbedModel::BgeBaseEnV15 => "bge-base-en-v1.5",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = QueryConfig::builder().build().unwrap();
        assert_eq!(config.top_k, 4);
        assert_eq!(config.chunk_size, 1000);
        assert_eq!(config.chunk_overlap, 200);
        assert_eq!(config.concurrency, 1);
        assert_eq!(
            config.embedding,
            EmbeddingBackend::FastEmbed {
                model: FastEmbedModel::AllMiniLmL6V2,
                cache_dir: None,
            }
        );
    }

    #[test]
    fn overlap_must_be_below_chunk_size() {
        let err = QueryConfig::builder()
            .chunk_size(100)
            .chunk_overlap(100)
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("chunk_overlap"), "got: {err}");
    }

    #[test]
    fn top_k_range_is_enforced() {
        assert!(QueryConfig::builder().top_k(0).build().is_err());
        assert!(QueryConfig::builder().top_k(21).build().is_err());
        assert!(QueryConfig::builder().top_k(20).build().is_ok());
    }

    #[test]
    fn max_retries_is_bounded() {
        assert!(QueryConfig::builder().max_retries(MAX_RETRIES_LIMIT).build().is_ok());
        let err = QueryConfig::builder().max_retries(65).build().unwrap_err();
        assert!(err.to_string().contains("max_retries"), "got: {err}");
    }

    #[test]
    fn tiny_hashing_dimension_rejected() {
        let err = QueryConfig::builder()
            .embedding(EmbeddingBackend::Hashing { dimensions: 4 })
            .build()
            .unwrap_err();
        assert!(matches!(err, QueryError::InvalidConfig(_)));
    }

    #[test]
    fn fastembed_model_serde_name_matches_display() {
        for model in [
            FastEmbedModel::AllMiniLmL6V2,
            FastEmbedModel::BgeSmallEnV15,
            FastEmbedModel::BgeBaseEnV15,
        ] {
            let json = serde_json::to_string(&model).unwrap();
            assert_eq!(json, format!("\"{model}\""));
        }
    }

    #[test]
    fn temperature_is_clamped() {
        let config = QueryConfig::builder().temperature(5.0).build().unwrap();
        assert_eq!(config.temperature, 2.0);
    }

    #[test]
    fn concurrency_floor_is_one() {
        let config = QueryConfig::builder().concurrency(0).build().unwrap();
        assert_eq!(config.concurrency, 1);
    }
}
