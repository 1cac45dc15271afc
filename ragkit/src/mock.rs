//! Deterministic providers for tests and offline runs.
//!
//! Neither type calls a remote service: [`HashEmbedding`] derives vectors
//! from the words of each text and [`ScriptedLlm`] replays canned replies.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;

use crate::embedding::EmbeddingProvider;
use crate::error::{RagError, Result, ServiceErrorKind};
use crate::llm::{GenerationRequest, LanguageModel};

/// Bag-of-words embedding: every lowercase word is hashed (FNV-1a) into one
/// bucket and the counts are L2-normalised.
///
/// Texts sharing words get a positive cosine similarity and identical texts
/// get exactly 1.0, which is enough to exercise retrieval end to end.
///
/// # Example
///
/// ```rust,ignore
/// use ragkit::mock::HashEmbedding;
///
/// let embedding = HashEmbedding::new(64).poisoned("FAIL");
/// assert!(embedding.embed_batch(&["this will FAIL"]).await.is_err());
/// ```
pub struct HashEmbedding {
    dimensions: usize,
    embedded: AtomicUsize,
    poison: Option<String>,
}

impl HashEmbedding {
    /// Create an embedding producing `dimensions`-long vectors.
    pub fn new(dimensions: usize) -> Self {
        Self { dimensions, embedded: AtomicUsize::new(0), poison: None }
    }

    /// Fail every batch containing a text with `word` in it, with a
    /// permanent (non-retryable) error.
    pub fn poisoned(mut self, word: impl Into<String>) -> Self {
        self.poison = Some(word.into());
        self
    }

    /// Number of texts embedded so far.
    pub fn embedded(&self) -> usize {
        self.embedded.load(Ordering::SeqCst)
    }

    /// The vector for `text`.
    pub fn vector(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dimensions];
        for word in text.split(|c: char| !c.is_alphanumeric()).filter(|w| !w.is_empty()) {
            let hash = word
                .to_lowercase()
                .bytes()
                .fold(0xcbf29ce484222325u64, |acc, b| (acc ^ b as u64).wrapping_mul(0x100000001b3));
            vector[(hash % self.dimensions as u64) as usize] += 1.0;
        }
        let norm: f32 = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            vector.iter_mut().for_each(|x| *x /= norm);
        }
        vector
    }
}

#[async_trait]
impl EmbeddingProvider for HashEmbedding {
    async fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        if let Some(poison) = &self.poison {
            if texts.iter().any(|t| t.contains(poison.as_str())) {
                return Err(RagError::embedding(self.name(), ServiceErrorKind::InvalidInput, "poisoned text"));
            }
        }
        self.embedded.fetch_add(texts.len(), Ordering::SeqCst);
        Ok(texts.iter().map(|t| self.vector(t)).collect())
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn model_id(&self) -> &str {
        "hash-embedding-v1"
    }

    fn name(&self) -> &str {
        "hash"
    }
}

/// Language model that replays queued outcomes and records every prompt.
///
/// Once the queue is empty it answers with the default reply.
pub struct ScriptedLlm {
    outcomes: Mutex<VecDeque<Result<String>>>,
    prompts: Mutex<Vec<String>>,
    default_reply: String,
}

impl ScriptedLlm {
    /// A model that always answers `reply`.
    pub fn replying(reply: impl Into<String>) -> Self {
        Self {
            outcomes: Mutex::new(VecDeque::new()),
            prompts: Mutex::new(Vec::new()),
            default_reply: reply.into(),
        }
    }

    /// Queue one failure of `kind` ahead of the default reply.
    pub fn then_fail(self, kind: ServiceErrorKind) -> Self {
        if let Ok(mut outcomes) = self.outcomes.lock() {
            outcomes.push_back(Err(RagError::generation("scripted", kind, "injected")));
        }
        self
    }

    /// Every prompt received so far, oldest first.
    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().map(|p| p.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl LanguageModel for ScriptedLlm {
    async fn generate(&self, request: GenerationRequest) -> Result<String> {
        if let Ok(mut prompts) = self.prompts.lock() {
            prompts.push(request.prompt);
        }
        let next = self.outcomes.lock().ok().and_then(|mut o| o.pop_front());
        next.unwrap_or_else(|| Ok(self.default_reply.clone()))
    }

    fn model_name(&self) -> &str {
        "scripted-llm"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn poisoned_batches_fail_without_counting() {
        let embedding = HashEmbedding::new(16).poisoned("FAIL");

        assert!(embedding.embed_batch(&["fine", "this will FAIL"]).await.is_err());
        assert_eq!(embedding.embedded(), 0);
        embedding.embed_batch(&["fine", "also fine"]).await.unwrap();
        assert_eq!(embedding.embedded(), 2);
    }

    #[test]
    fn identical_texts_share_a_unit_vector() {
        let embedding = HashEmbedding::new(16);
        let a = embedding.vector("The Sky is blue");
        let b = embedding.vector("the sky IS blue");
        assert_eq!(a, b);
        let norm: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-6);
    }
}
