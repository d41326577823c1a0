//! Similarity index: embed every chunk once, then answer top-k lookups.
//!
//! The index is built once per request and shared by all questions of that
//! request, so embedding cost does not grow with the question count. It is
//! a flat list scored by cosine similarity; documents handled here are a
//! few hundred chunks at most, where an exhaustive scan beats any ANN
//! structure on both latency and determinism.

use crate::embedding::Embedder;
use crate::error::QueryError;
use crate::output::Chunk;
use std::cmp::Ordering;
use tracing::{debug, info};

/// A chunk returned by [`VectorIndex::search`] with its similarity score.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredChunk {
    pub chunk: Chunk,
    pub score: f32,
}

#[derive(Debug, Clone)]
struct IndexedChunk {
    chunk: Chunk,
    embedding: Vec<f32>,
}

/// In-memory nearest-neighbour index over one document's chunks.
#[derive(Debug, Clone, Default)]
pub struct VectorIndex {
    entries: Vec<IndexedChunk>,
}

impl VectorIndex {
    /// Build an index from chunks and their parallel embeddings.
    pub fn from_parts(chunks: Vec<Chunk>, embeddings: Vec<Vec<f32>>) -> Result<Self, QueryError> {
        if chunks.len() != embeddings.len() {
            return Err(QueryError::EmbeddingFailed(format!(
                "{} embeddings for {} chunks",
                embeddings.len(),
                chunks.len()
            )));
        }
        let entries = chunks
            .into_iter()
            .zip(embeddings)
            .map(|(chunk, embedding)| IndexedChunk { chunk, embedding })
            .collect();
        Ok(Self { entries })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Return the `k` chunks most similar to `query`, best first.
    ///
    /// Equal scores are ordered by chunk position so results are stable.
    pub fn search(&self, query: &[f32], k: usize) -> Vec<ScoredChunk> {
        let mut scored: Vec<(f32, &IndexedChunk)> = self
            .entries
            .iter()
            .map(|e| (cosine_similarity(query, &e.embedding), e))
            .collect();

        scored.sort_by(|a, b| {
            b.0.partial_cmp(&a.0)
                .unwrap_or(Ordering::Equal)
                .then_with(|| a.1.chunk.index.cmp(&b.1.chunk.index))
        });
        scored.truncate(k);

        scored
            .into_iter()
            .map(|(score, e)| ScoredChunk {
                chunk: e.chunk.clone(),
                score,
            })
            .collect()
    }
}

/// Embed all chunks in batches of `batch_size` and build the index.
///
/// Any embedding failure is fatal for the request.
pub async fn build_index(
    embedder: &dyn Embedder,
    chunks: Vec<Chunk>,
    batch_size: usize,
) -> Result<VectorIndex, QueryError> {
    let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
    let mut embeddings = Vec::with_capacity(texts.len());

    for (batch_no, batch) in texts.chunks(batch_size.max(1)).enumerate() {
        let vectors = embedder
            .embed(batch)
            .await
            .map_err(|e| QueryError::EmbeddingFailed(e.to_string()))?;
        if vectors.len() != batch.len() {
            return Err(QueryError::EmbeddingFailed(format!(
                "batch {}: {} vectors for {} chunks",
                batch_no,
                vectors.len(),
                batch.len()
            )));
        }
        debug!("Embedded batch {} ({} chunks)", batch_no, batch.len());
        embeddings.extend(vectors);
    }

    let index = VectorIndex::from_parts(chunks, embeddings)?;
    info!("Index built: {} chunks via {}", index.len(), embedder.name());
    Ok(index)
}

fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;
    for (x, y) in a.iter().zip(b) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom == 0.0 {
        0.0
    } else {
        dot / denom
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::{EmbeddingError, HashingEmbedder};
    use async_trait::async_trait;

    fn chunk(index: usize, text: &str) -> Chunk {
        Chunk {
            index,
            page: 1,
            text: text.to_string(),
        }
    }

    #[test]
    fn cosine_basics() {
        assert!((cosine_similarity(&[1.0, 0.0], &[1.0, 0.0]) - 1.0).abs() < 1e-6);
        assert_eq!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]), 0.0);
        assert_eq!(cosine_similarity(&[1.0], &[1.0, 2.0]), 0.0);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 1.0]), 0.0);
    }

    #[test]
    fn search_orders_by_score_then_position() {
        let index = VectorIndex::from_parts(
            vec![chunk(0, "a"), chunk(1, "b"), chunk(2, "c")],
            vec![vec![0.0, 1.0], vec![1.0, 0.0], vec![1.0, 0.0]],
        )
        .unwrap();

        let hits = index.search(&[1.0, 0.0], 2);
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].chunk.index, 1);
        assert_eq!(hits[1].chunk.index, 2);
    }

    #[test]
    fn search_caps_at_index_size() {
        let index =
            VectorIndex::from_parts(vec![chunk(0, "only")], vec![vec![1.0, 0.0]]).unwrap();
        assert_eq!(index.search(&[1.0, 0.0], 5).len(), 1);
    }

    #[test]
    fn mismatched_parts_rejected() {
        let err = VectorIndex::from_parts(vec![chunk(0, "x")], vec![]).unwrap_err();
        assert!(matches!(err, QueryError::EmbeddingFailed(_)));
    }

    #[tokio::test]
    async fn repeated_builds_retrieve_same_chunks() {
        let chunks = vec![
            chunk(0, "The policy covers hospitalisation for a minimum of 24 hours."),
            chunk(1, "Pre-existing diseases are covered after 36 months of continuous coverage."),
            chunk(2, "Maternity expenses are covered after 24 months, limited to two deliveries."),
            chunk(3, "The grace period for premium payment is thirty days."),
            chunk(4, "Cataract surgery has a waiting period of two years."),
        ];
        let embedder = HashingEmbedder::new(256);
        let question = embedder.embed_text("What is the grace period for premium payment?");

        let first = build_index(&embedder, chunks.clone(), 2).await.unwrap();
        let second = build_index(&embedder, chunks, 3).await.unwrap();

        let a: Vec<usize> = first.search(&question, 3).iter().map(|h| h.chunk.index).collect();
        let b: Vec<usize> = second.search(&question, 3).iter().map(|h| h.chunk.index).collect();
        assert_eq!(a, b);
        assert_eq!(a[0], 3);
    }

    struct ShortEmbedder;

    #[async_trait]
    impl Embedder for ShortEmbedder {
        fn name(&self) -> String {
            "short".into()
        }

        async fn embed(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
            Ok(vec![vec![1.0]])
        }
    }

    #[tokio::test]
    async fn short_batch_is_fatal() {
        let err = build_index(&ShortEmbedder, vec![chunk(0, "a"), chunk(1, "b")], 8)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("1 vectors for 2 chunks"), "got: {err}");
    }
}
