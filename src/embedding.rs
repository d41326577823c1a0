//! Text embedding backends.
//!
//! The index and the question lookup must use the same [`Embedder`] for a
//! request, otherwise similarity scores are meaningless. Three backends ship:
//!
//! * [`FastEmbedder`] (default) — a local sentence-transformer run through
//!   ONNX Runtime by `fastembed`. Downloaded once into a cache directory,
//!   offline afterwards.
//! * [`HashingEmbedder`] — words and word pairs hashed into signed buckets
//!   of a fixed-size vector, then L2-normalised. No model files and
//!   bit-for-bit reproducible; used where a model download is not wanted.
//! * [`OllamaEmbedder`] — batches texts to a local Ollama server's
//!   `/api/embed` endpoint.

use crate::config::{EmbeddingBackend, FastEmbedModel};
use async_trait::async_trait;
use fastembed::{EmbeddingModel, InitOptions, TextEmbedding};
use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info};

/// Errors raised by an embedding backend.
#[derive(Debug, Error)]
pub enum EmbeddingError {
    #[error("embedding request failed: {0}")]
    Request(String),

    #[error("embedding API returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("embedding API returned {got} vectors for {expected} inputs")]
    CountMismatch { expected: usize, got: usize },

    #[error("embedding model unavailable: {0}")]
    Model(String),
}

/// Turns texts into fixed-length vectors.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Short identifier for logs, e.g. `hashing-384`.
    fn name(&self) -> String;

    /// Embed a batch of texts; the output is parallel with `texts`.
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError>;

    /// Embed a single text.
    async fn embed_one(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        let mut vectors = self.embed(&[text.to_string()]).await?;
        match vectors.len() {
            1 => Ok(vectors.remove(0)),
            got => Err(EmbeddingError::CountMismatch { expected: 1, got }),
        }
    }
}

/// Instantiate the embedder selected in the config.
pub fn from_backend(backend: &EmbeddingBackend, client: &reqwest::Client) -> Arc<dyn Embedder> {
    match backend {
        EmbeddingBackend::FastEmbed { model, cache_dir } => {
            Arc::new(FastEmbedder::new(*model, cache_dir.clone()))
        }
        EmbeddingBackend::Hashing { dimensions } => Arc::new(HashingEmbedder::new(*dimensions)),
        EmbeddingBackend::Ollama { base_url, model } => Arc::new(OllamaEmbedder::new(
            client.clone(),
            base_url.clone(),
            model.clone(),
        )),
    }
}

// ─── FastEmbed ───────────────────────────────────────────

/// Sentence-transformer embedder backed by `fastembed`.
///
/// The ONNX model is loaded lazily on the first non-empty batch and kept
/// for the life of the embedder. Inference is CPU-bound and runs on the
/// blocking pool.
pub struct FastEmbedder {
    model: FastEmbedModel,
    cache_dir: Option<PathBuf>,
    loaded: Arc<OnceCell<Mutex<TextEmbedding>>>,
}

impl FastEmbedder {
    pub fn new(model: FastEmbedModel, cache_dir: Option<PathBuf>) -> Self {
        Self {
            model,
            cache_dir,
            loaded: Arc::new(OnceCell::new()),
        }
    }

    pub fn is_loaded(&self) -> bool {
        self.loaded.get().is_some()
    }
}

fn fastembed_model(model: FastEmbedModel) -> EmbeddingModel {
    match model {
        FastEmbedModel::AllMiniLmL6V2 => EmbeddingModel::AllMiniLML6V2,
        FastEmbedModel::BgeSmallEnV15 => EmbeddingModel::BGESmallENV15,
        FastEmbedModel::BgeBaseEnV15 => EmbeddingModel::BGEBaseENV15,
    }
}

fn load_fastembed(
    model: FastEmbedModel,
    cache_dir: Option<PathBuf>,
) -> Result<Mutex<TextEmbedding>, EmbeddingError> {
    let mut options = InitOptions::new(fastembed_model(model)).with_show_download_progress(false);
    if let Some(dir) = cache_dir {
        options = options.with_cache_dir(dir);
    }
    info!("Loading embedding model {}", model);
    TextEmbedding::try_new(options)
        .map(Mutex::new)
        .map_err(|e| EmbeddingError::Model(format!("{model}: {e}")))
}

#[async_trait]
impl Embedder for FastEmbedder {
    fn name(&self) -> String {
        format!("fastembed/{}", self.model)
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let loaded = Arc::clone(&self.loaded);
        let model = self.model;
        let cache_dir = self.cache_dir.clone();
        let batch = texts.to_vec();

        let vectors = tokio::task::spawn_blocking(move || {
            let cell = loaded.get_or_try_init(|| load_fastembed(model, cache_dir))?;
            let embedding = cell
                .lock()
                .map_err(|_| EmbeddingError::Model(format!("{model}: lock poisoned")))?;
            embedding
                .embed(batch, None)
                .map_err(|e| EmbeddingError::Request(e.to_string()))
        })
        .await
        .map_err(|e| EmbeddingError::Request(format!("embedding task failed: {e}")))??;

        if vectors.len() != texts.len() {
            return Err(EmbeddingError::CountMismatch {
                expected: texts.len(),
                got: vectors.len(),
            });
        }
        debug!("fastembed embedded {} texts with {}", texts.len(), model);
        Ok(vectors)
    }
}

// ─── Hashing ─────────────────────────────────────────────

/// Deterministic feature-hashing embedder.
#[derive(Debug, Clone)]
pub struct HashingEmbedder {
    dimensions: usize,
}

impl HashingEmbedder {
    pub fn new(dimensions: usize) -> Self {
        Self {
            dimensions: dimensions.max(1),
        }
    }

    pub fn dimensions(&self) -> usize {
        self.dimensions
    }

    /// Embed one text synchronously.
    pub fn embed_text(&self, text: &str) -> Vec<f32> {
        let tokens = tokenize(text);
        let mut counts: HashMap<String, u32> = HashMap::new();
        for token in &tokens {
            *counts.entry(token.clone()).or_insert(0) += 1;
        }
        // Bigrams carry phrase information ("waiting period" vs. "period of waiting").
        for pair in tokens.windows(2) {
            *counts.entry(format!("{} {}", pair[0], pair[1])).or_insert(0) += 1;
        }

        let mut vector = vec![0.0f32; self.dimensions];
        for (feature, count) in counts {
            let hash = fnv1a(feature.as_bytes());
            let bucket = (hash % self.dimensions as u64) as usize;
            let sign = if (hash >> 63) == 0 { 1.0 } else { -1.0 };
            // Sublinear tf keeps boilerplate repetition from dominating.
            vector[bucket] += sign * (1.0 + (count as f32).ln());
        }

        l2_normalize(&mut vector);
        vector
    }
}

#[async_trait]
impl Embedder for HashingEmbedder {
    fn name(&self) -> String {
        format!("hashing-{}", self.dimensions)
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        Ok(texts.iter().map(|t| self.embed_text(t)).collect())
    }
}

/// Lowercased alphanumeric words; single characters other than digits are dropped.
fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(|w| w.to_lowercase())
        .filter(|w| w.chars().count() > 1 || w.chars().all(|c| c.is_ascii_digit()))
        .collect()
}

/// 64-bit FNV-1a. Stable across platforms and Rust releases, unlike `DefaultHasher`.
fn fnv1a(bytes: &[u8]) -> u64 {
    const OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
    const PRIME: u64 = 0x0000_0100_0000_01b3;
    bytes.iter().fold(OFFSET, |hash, b| {
        (hash ^ u64::from(*b)).wrapping_mul(PRIME)
    })
}

fn l2_normalize(v: &mut [f32]) {
    let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        for x in v.iter_mut() {
            *x /= norm;
        }
    }
}

// ─── Ollama ──────────────────────────────────────────────

/// Maximum characters sent per text; keeps `nomic-embed-text` inputs under
/// its 8 192-token context.
const MAX_EMBED_CHARS: usize = 3_000;

/// Embedder backed by an Ollama server.
#[derive(Debug, Clone)]
pub struct OllamaEmbedder {
    client: reqwest::Client,
    base_url: String,
    model: String,
}

#[derive(Serialize)]
struct OllamaEmbedRequest<'a> {
    model: &'a str,
    input: Vec<&'a str>,
    truncate: bool,
}

#[derive(Deserialize)]
struct OllamaEmbedResponse {
    embeddings: Vec<Vec<f32>>,
}

impl OllamaEmbedder {
    pub fn new(client: reqwest::Client, base_url: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            model: model.into(),
        }
    }
}

#[async_trait]
impl Embedder for OllamaEmbedder {
    fn name(&self) -> String {
        format!("ollama/{}", self.model)
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let url = format!("{}/api/embed", self.base_url);
        let req = OllamaEmbedRequest {
            model: &self.model,
            input: texts.iter().map(|t| truncate_for_embedding(t)).collect(),
            truncate: true,
        };

        let resp = self
            .client
            .post(&url)
            .timeout(Duration::from_secs(120))
            .json(&req)
            .send()
            .await
            .map_err(|e| EmbeddingError::Request(e.to_string()))?;

        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let body = resp.text().await.unwrap_or_default();
            return Err(EmbeddingError::Status { status, body });
        }

        let body: OllamaEmbedResponse = resp
            .json()
            .await
            .map_err(|e| EmbeddingError::Request(format!("invalid response body: {e}")))?;

        if body.embeddings.len() != texts.len() {
            return Err(EmbeddingError::CountMismatch {
                expected: texts.len(),
                got: body.embeddings.len(),
            });
        }
        debug!("Ollama embedded {} texts with {}", texts.len(), self.model);
        Ok(body.embeddings)
    }
}

/// Truncate `text` to at most `MAX_EMBED_CHARS`, splitting on a UTF-8 char boundary.
fn truncate_for_embedding(text: &str) -> &str {
    if text.len() <= MAX_EMBED_CHARS {
        return text;
    }
    let mut end = MAX_EMBED_CHARS;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    &text[..end]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dot(a: &[f32], b: &[f32]) -> f32 {
        a.iter().zip(b).map(|(x, y)| x * y).sum()
    }

    #[test]
    fn hashing_is_deterministic() {
        let e = HashingEmbedder::new(384);
        let a = e.embed_text("Grace period for premium payment is thirty days.");
        let b = e.embed_text("Grace period for premium payment is thirty days.");
        assert_eq!(a, b);
        assert_eq!(a.len(), 384);
    }

    #[test]
    fn hashing_output_is_unit_length() {
        let v = HashingEmbedder::new(128).embed_text("Maternity expenses are covered.");
        let norm = dot(&v, &v).sqrt();
        assert!((norm - 1.0).abs() < 1e-5, "norm = {norm}");
    }

    #[test]
    fn empty_text_embeds_to_zero_vector() {
        let v = HashingEmbedder::new(64).embed_text("  -- ");
        assert!(v.iter().all(|x| *x == 0.0));
    }

    #[test]
    fn related_text_scores_higher_than_unrelated() {
        let e = HashingEmbedder::new(384);
        let q = e.embed_text("What is the waiting period for cataract surgery?");
        let related = e.embed_text("Cataract surgery has a waiting period of two years.");
        let unrelated = e.embed_text("The insured may cancel the policy by written notice.");
        assert!(dot(&q, &related) > dot(&q, &unrelated));
    }

    #[test]
    fn tokenize_lowercases_and_drops_noise() {
        assert_eq!(
            tokenize("Room-Rent: 2% of SI, a ICU"),
            vec!["room", "rent", "2", "of", "si", "icu"]
        );
    }

    #[test]
    fn fnv1a_known_vector() {
        // Reference value for the empty input is the offset basis.
        assert_eq!(fnv1a(b""), 0xcbf2_9ce4_8422_2325);
        assert_ne!(fnv1a(b"a"), fnv1a(b"b"));
    }

    #[test]
    fn truncate_respects_char_boundaries() {
        let s = "é".repeat(MAX_EMBED_CHARS);
        let t = truncate_for_embedding(&s);
        assert!(t.len() <= MAX_EMBED_CHARS);
        assert!(s.is_char_boundary(t.len()));
    }

    #[tokio::test]
    async fn fastembed_empty_batch_does_not_load_model() {
        let e = FastEmbedder::new(FastEmbedModel::default(), None);
        assert_eq!(e.name(), "fastembed/all-minilm-l6-v2");
        assert!(e.embed(&[]).await.unwrap().is_empty());
        assert!(!e.is_loaded());
    }

    #[test]
    fn default_backend_is_fastembed() {
        let client = reqwest::Client::new();
        let e = from_backend(&EmbeddingBackend::default(), &client);
        assert_eq!(e.name(), "fastembed/all-minilm-l6-v2");
    }

    #[tokio::test]
    async fn embed_one_matches_batch() {
        let e = HashingEmbedder::new(64);
        let one = e.embed_one("co-payment").await.unwrap();
        let batch = e.embed(&["co-payment".to_string()]).await.unwrap();
        assert_eq!(one, batch[0]);
    }
}
