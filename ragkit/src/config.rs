//! Configuration for the RAG service.
//!
//! A [`RagConfig`] is built once at process start, either through
//! [`RagConfig::builder`] or [`RagConfig::load`], and passed to component
//! constructors. Components keep their own copy; nothing reads configuration
//! from global state, so changing it requires a restart.

use std::path::Path;
use std::time::Duration;

use figment::Figment;
use figment::providers::{Env, Format, Serialized, Toml};
use serde::{Deserialize, Serialize};

use crate::error::{RagError, Result};
use crate::retry::RetryPolicy;

/// What the orchestrator does when retrieval produced no usable context.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum NoContextPolicy {
    /// Skip the model and return the configured fallback message.
    #[default]
    Refuse,
    /// Ask the model anyway and flag the answer as unsupported by context.
    AnswerWithoutContext,
}

/// Embedding model settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct EmbeddingSettings {
    /// Model identifier, recorded alongside every stored vector.
    pub model: String,
    /// Vector dimension the collection is created with.
    pub dimensions: usize,
    /// Maximum number of texts sent in one embedding request.
    pub max_batch_size: usize,
    /// Deadline for one embedding request, in milliseconds.
    pub request_timeout_ms: u64,
    /// Retry policy for transient embedding failures.
    pub retry: RetryPolicy,
}

impl Default for EmbeddingSettings {
    fn default() -> Self {
        Self {
            model: "text-embedding-004".to_string(),
            dimensions: 768,
            max_batch_size: 100,
            request_timeout_ms: 30_000,
            retry: RetryPolicy::default(),
        }
    }
}

impl EmbeddingSettings {
    /// Deadline for one embedding request.
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

/// Vector store settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct VectorStoreSettings {
    /// Deadline for one vector store call, in milliseconds.
    pub request_timeout_ms: u64,
    /// Retry policy for ingestion writes (upserts and deletes are idempotent).
    pub write_retry: RetryPolicy,
}

impl Default for VectorStoreSettings {
    fn default() -> Self {
        Self { request_timeout_ms: 10_000, write_retry: RetryPolicy::default() }
    }
}

impl VectorStoreSettings {
    /// Deadline for one vector store call.
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

/// Language model settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct GenerationSettings {
    /// Model identifier.
    pub model: String,
    /// Sampling temperature.
    pub temperature: f32,
    /// Maximum number of tokens to generate.
    pub max_output_tokens: u32,
    /// Deadline for one generation request, in milliseconds.
    pub request_timeout_ms: u64,
    /// Backoff for the single retry of a transient generation failure.
    /// `max_attempts` is always treated as 2.
    pub retry: RetryPolicy,
    /// Behaviour when no context was retrieved.
    pub no_context_policy: NoContextPolicy,
    /// Text returned when the service refuses to answer without context.
    pub fallback_message: String,
    /// Instructions placed at the top of every prompt.
    pub system_prompt: String,
}

impl Default for GenerationSettings {
    fn default() -> Self {
        Self {
            model: "gemini-1.5-flash".to_string(),
            temperature: 0.2,
            max_output_tokens: 1024,
            request_timeout_ms: 60_000,
            retry: RetryPolicy::default().with_max_attempts(2),
            no_context_policy: NoContextPolicy::Refuse,
            fallback_message: "I don't know based on the available information.".to_string(),
            system_prompt: "Answer the user's question using ONLY the numbered context passages \
                            below. Cite every passage you use with its marker, for example [1]. \
                            If the context does not contain the answer, say that you don't know \
                            based on the available information."
                .to_string(),
        }
    }
}

impl GenerationSettings {
    /// Deadline for one generation request.
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

/// Configuration parameters for the RAG service.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RagConfig {
    /// The vector store collection all operations are scoped to.
    pub collection: String,
    /// Maximum chunk size in characters.
    pub chunk_size: usize,
    /// Number of overlapping characters between consecutive chunks.
    pub chunk_overlap: usize,
    /// Default number of results to retrieve.
    pub top_k: usize,
    /// Upper bound for a caller-supplied `top_k`.
    pub max_top_k: usize,
    /// Minimum similarity score for results (results below this are filtered out).
    pub similarity_threshold: f32,
    /// Default context budget in characters.
    pub context_budget: usize,
    /// Word-overlap ratio above which two chunks count as near-duplicates.
    pub dedup_threshold: f32,
    /// Embedding model settings.
    pub embedding: EmbeddingSettings,
    /// Vector store settings.
    pub vector_store: VectorStoreSettings,
    /// Language model settings.
    pub generation: GenerationSettings,
}

impl Default for RagConfig {
    fn default() -> Self {
        Self {
            collection: "rag_documents".to_string(),
            chunk_size: 1500,
            chunk_overlap: 150,
            top_k: 3,
            max_top_k: 10,
            similarity_threshold: 0.0,
            context_budget: 6000,
            dedup_threshold: 0.8,
            embedding: EmbeddingSettings::default(),
            vector_store: VectorStoreSettings::default(),
            generation: GenerationSettings::default(),
        }
    }
}

impl RagConfig {
    /// Create a new builder for constructing a [`RagConfig`].
    pub fn builder() -> RagConfigBuilder {
        RagConfigBuilder::default()
    }

    /// Load configuration from layered sources and validate it.
    ///
    /// Priority (highest to lowest):
    /// 1. Environment variables prefixed with `RAGKIT_`, nested keys split by
    ///    `__` (e.g. `RAGKIT_GENERATION__MODEL`)
    /// 2. The TOML file at `path`, if given and present
    /// 3. Built-in defaults
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut figment = Figment::from(Serialized::defaults(RagConfig::default()));
        if let Some(path) = path.filter(|p| p.exists()) {
            figment = figment.merge(Toml::file(path));
        }
        figment = figment.merge(Env::prefixed("RAGKIT_").split("__"));

        let config: RagConfig =
            figment.extract().map_err(|e| RagError::Configuration(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Check that parameters are consistent.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::Configuration`] describing the first violated rule.
    pub fn validate(&self) -> Result<()> {
        let fail = |message: String| Err(RagError::Configuration(message));

        if self.collection.trim().is_empty() {
            return fail("collection must not be empty".to_string());
        }
        if self.chunk_size == 0 {
            return fail("chunk_size must be greater than zero".to_string());
        }
        if self.chunk_overlap >= self.chunk_size {
            return fail(format!(
                "chunk_overlap ({}) must be less than chunk_size ({})",
                self.chunk_overlap, self.chunk_size
            ));
        }
        if self.top_k == 0 {
            return fail("top_k must be greater than zero".to_string());
        }
        if self.top_k > self.max_top_k {
            return fail(format!(
                "top_k ({}) must not exceed max_top_k ({})",
                self.top_k, self.max_top_k
            ));
        }
        if !(-1.0..=1.0).contains(&self.similarity_threshold) {
            return fail("similarity_threshold must be within [-1, 1]".to_string());
        }
        if self.context_budget == 0 {
            return fail("context_budget must be greater than zero".to_string());
        }
        if !(self.dedup_threshold > 0.0 && self.dedup_threshold <= 1.0) {
            return fail("dedup_threshold must be within (0, 1]".to_string());
        }
        if self.embedding.dimensions == 0 {
            return fail("embedding.dimensions must be greater than zero".to_string());
        }
        if self.embedding.max_batch_size == 0 {
            return fail("embedding.max_batch_size must be greater than zero".to_string());
        }
        for (name, policy) in [
            ("embedding.retry", &self.embedding.retry),
            ("vector_store.write_retry", &self.vector_store.write_retry),
            ("generation.retry", &self.generation.retry),
        ] {
            if policy.max_attempts == 0 {
                return fail(format!("{name}.max_attempts must be at least 1"));
            }
        }
        Ok(())
    }
}

/// Builder for constructing a validated [`RagConfig`].
#[derive(Debug, Clone, Default)]
pub struct RagConfigBuilder {
    config: RagConfig,
}

impl RagConfigBuilder {
    /// Set the collection name.
    pub fn collection(mut self, name: impl Into<String>) -> Self {
        self.config.collection = name.into();
        self
    }

    /// Set the maximum chunk size in characters.
    pub fn chunk_size(mut self, size: usize) -> Self {
        self.config.chunk_size = size;
        self
    }

    /// Set the overlap between consecutive chunks in characters.
    pub fn chunk_overlap(mut self, overlap: usize) -> Self {
        self.config.chunk_overlap = overlap;
        self
    }

    /// Set the default number of results to retrieve.
    pub fn top_k(mut self, k: usize) -> Self {
        self.config.top_k = k;
        self
    }

    /// Set the upper bound for caller-supplied `top_k` values.
    pub fn max_top_k(mut self, k: usize) -> Self {
        self.config.max_top_k = k;
        self
    }

    /// Set the minimum similarity threshold for filtering results.
    pub fn similarity_threshold(mut self, threshold: f32) -> Self {
        self.config.similarity_threshold = threshold;
        self
    }

    /// Set the default context budget in characters.
    pub fn context_budget(mut self, budget: usize) -> Self {
        self.config.context_budget = budget;
        self
    }

    /// Set the near-duplicate threshold.
    pub fn dedup_threshold(mut self, threshold: f32) -> Self {
        self.config.dedup_threshold = threshold;
        self
    }

    /// Set the embedding model identifier and dimension.
    pub fn embedding_model(mut self, model: impl Into<String>, dimensions: usize) -> Self {
        self.config.embedding.model = model.into();
        self.config.embedding.dimensions = dimensions;
        self
    }

    /// Set the maximum embedding batch size.
    pub fn embedding_batch_size(mut self, size: usize) -> Self {
        self.config.embedding.max_batch_size = size;
        self
    }

    /// Replace all embedding settings.
    pub fn embedding(mut self, settings: EmbeddingSettings) -> Self {
        self.config.embedding = settings;
        self
    }

    /// Replace all vector store settings.
    pub fn vector_store(mut self, settings: VectorStoreSettings) -> Self {
        self.config.vector_store = settings;
        self
    }

    /// Replace all generation settings.
    pub fn generation(mut self, settings: GenerationSettings) -> Self {
        self.config.generation = settings;
        self
    }

    /// Set the no-context policy.
    pub fn no_context_policy(mut self, policy: NoContextPolicy) -> Self {
        self.config.generation.no_context_policy = policy;
        self
    }

    /// Use `policy` for every remote call (embedding, store writes, generation).
    pub fn retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.config.embedding.retry = policy.clone();
        self.config.vector_store.write_retry = policy.clone();
        self.config.generation.retry = policy;
        self
    }

    /// Build the [`RagConfig`], validating that parameters are consistent.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::Configuration`] if any rule in
    /// [`RagConfig::validate`] is violated.
    pub fn build(self) -> Result<RagConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}
