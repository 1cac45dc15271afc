//! Reranker trait for re-scoring retrieved chunks.

use async_trait::async_trait;

use crate::document::ScoredChunk;
use crate::error::Result;

/// A reranker that re-scores and reorders retrieved chunks.
///
/// Implementations can use cross-encoder models, LLM-based scoring, or
/// other strategies to improve precision beyond initial vector similarity.
/// The [`Retriever`](crate::Retriever) applies the score threshold and the
/// final ordering after reranking, so implementations may return chunks in
/// any order.
#[async_trait]
pub trait Reranker: Send + Sync {
    /// Rerank `chunks` given the original query.
    async fn rerank(&self, query: &str, chunks: Vec<ScoredChunk>) -> Result<Vec<ScoredChunk>>;
}

/// A no-op reranker that returns chunks unchanged.
///
/// # Example
///
/// ```rust,ignore
/// use ragkit::{NoOpReranker, Reranker};
///
/// let reranked = NoOpReranker.rerank("query", chunks).await?;
/// ```
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOpReranker;

#[async_trait]
impl Reranker for NoOpReranker {
    async fn rerank(&self, _query: &str, chunks: Vec<ScoredChunk>) -> Result<Vec<ScoredChunk>> {
        Ok(chunks)
    }
}

/// Boosts chunks by the share of query words they contain.
///
/// The new score is `score + weight * matched / query_words`. Cheap and
/// deterministic; useful when the embedding model under-weights exact terms.
#[derive(Debug, Clone, Copy)]
pub struct KeywordBoostReranker {
    weight: f32,
}

impl KeywordBoostReranker {
    /// Create a reranker adding at most `weight` to each score.
    pub fn new(weight: f32) -> Self {
        Self { weight }
    }
}

#[async_trait]
impl Reranker for KeywordBoostReranker {
    async fn rerank(&self, query: &str, mut chunks: Vec<ScoredChunk>) -> Result<Vec<ScoredChunk>> {
        let terms = crate::context::word_set(query);
        if terms.is_empty() {
            return Ok(chunks);
        }
        for scored in &mut chunks {
            let words = crate::context::word_set(&scored.chunk.text);
            let matched = terms.iter().filter(|t| words.contains(*t)).count();
            scored.score += self.weight * matched as f32 / terms.len() as f32;
        }
        Ok(chunks)
    }
}
