//! Embedding providers and the batching [`Embedder`] built on top of them.

use std::sync::Arc;

use async_trait::async_trait;
use futures::{StreamExt, TryStreamExt, stream};
use tracing::{debug, error};

use crate::config::EmbeddingSettings;
use crate::error::{RagError, Result, ServiceErrorKind};
use crate::retry::{with_retry, with_timeout};

/// Batches sent to the provider concurrently by one [`Embedder::embed`] call.
const MAX_IN_FLIGHT_BATCHES: usize = 4;

/// A provider that generates vector embeddings from text input.
///
/// Implementations wrap specific embedding backends (Gemini, a local model,
/// a test double) behind a unified async interface. One call to
/// [`embed_batch`](EmbeddingProvider::embed_batch) is one remote request;
/// splitting, deadlines and retries are handled by [`Embedder`].
///
/// # Example
///
/// ```rust,ignore
/// use ragkit::EmbeddingProvider;
///
/// let provider = MyEmbeddingProvider::new();
/// let vectors = provider.embed_batch(&["hello", "world"]).await?;
/// assert_eq!(vectors[0].len(), provider.dimensions());
/// ```
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Generate embeddings for `texts` in one request, in input order.
    async fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>>;

    /// Generate the embedding used to search for `text`.
    ///
    /// Backends that embed queries differently from documents (for example
    /// with a retrieval-query task type) override this.
    async fn embed_query(&self, text: &str) -> Result<Vec<f32>> {
        self.embed_batch(&[text]).await?.into_iter().next().ok_or_else(|| {
            RagError::embedding(self.name(), ServiceErrorKind::Other, "empty response")
        })
    }

    /// Return the dimensionality of embeddings produced by this provider.
    fn dimensions(&self) -> usize;

    /// Identifier of the model (and version) producing the vectors.
    fn model_id(&self) -> &str;

    /// Short provider name used in errors and logs.
    fn name(&self) -> &str {
        "embedding"
    }
}

/// Splits embedding work into provider-sized requests and enforces the
/// configured deadline, retry policy and vector dimension.
///
/// Output always has the same length and order as the input.
pub struct Embedder {
    provider: Arc<dyn EmbeddingProvider>,
    settings: EmbeddingSettings,
}

impl Embedder {
    /// Create an embedder.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::Configuration`] if the provider's dimension differs
    /// from `settings.dimensions` or the batch size is zero.
    pub fn new(provider: Arc<dyn EmbeddingProvider>, settings: EmbeddingSettings) -> Result<Self> {
        if provider.dimensions() != settings.dimensions {
            return Err(RagError::Configuration(format!(
                "embedding provider '{}' produces {}-dimensional vectors but {} were configured",
                provider.model_id(),
                provider.dimensions(),
                settings.dimensions
            )));
        }
        if settings.max_batch_size == 0 {
            return Err(RagError::Configuration(
                "embedding.max_batch_size must be greater than zero".to_string(),
            ));
        }
        Ok(Self { provider, settings })
    }

    /// The configured vector dimension.
    pub fn dimensions(&self) -> usize {
        self.settings.dimensions
    }

    /// The maximum number of texts per request.
    pub fn max_batch_size(&self) -> usize {
        self.settings.max_batch_size
    }

    /// Identifier of the model producing the vectors.
    pub fn model_id(&self) -> &str {
        self.provider.model_id()
    }

    /// Embed `texts`, splitting them into batches of at most
    /// `max_batch_size` and reassembling the results in input order.
    ///
    /// # Errors
    ///
    /// [`RagError::EmbeddingService`] once retries are exhausted, or
    /// [`RagError::Configuration`] if the provider returns vectors of the
    /// wrong dimension.
    pub async fn embed(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        // Requests are built before the first await so the returned future
        // stays Send for callers that spawn ingestion.
        let requests: Vec<_> = texts
            .chunks(self.settings.max_batch_size)
            .map(|batch| self.embed_request(batch))
            .collect();
        let batches: Vec<Vec<Vec<f32>>> =
            stream::iter(requests).buffered(MAX_IN_FLIGHT_BATCHES).try_collect().await?;

        Ok(batches.into_iter().flatten().collect())
    }

    /// Embed a single query string.
    pub async fn embed_query(&self, text: &str) -> Result<Vec<f32>> {
        let provider = self.provider.name();
        let timeout = self.settings.request_timeout();
        let vector = with_retry(&self.settings.retry, "embed_query", || {
            with_timeout(timeout, self.provider.embed_query(text), || {
                RagError::embedding(provider, ServiceErrorKind::Timeout, "query embedding timed out")
            })
        })
        .await
        .inspect_err(|e| error!(provider, error = %e, "query embedding failed"))?;

        self.check_dimension(&vector)?;
        Ok(vector)
    }

    async fn embed_request(&self, batch: &[&str]) -> Result<Vec<Vec<f32>>> {
        let provider = self.provider.name();
        let timeout = self.settings.request_timeout();
        debug!(provider, batch_size = batch.len(), "embedding batch");

        let vectors = with_retry(&self.settings.retry, "embed_batch", || {
            with_timeout(timeout, self.provider.embed_batch(batch), || {
                RagError::embedding(provider, ServiceErrorKind::Timeout, "embedding request timed out")
            })
        })
        .await
        .inspect_err(|e| error!(provider, batch_size = batch.len(), error = %e, "embedding failed"))?;

        if vectors.len() != batch.len() {
            return Err(RagError::embedding(
                provider,
                ServiceErrorKind::Other,
                format!("requested {} embeddings but received {}", batch.len(), vectors.len()),
            ));
        }
        for vector in &vectors {
            self.check_dimension(vector)?;
        }
        Ok(vectors)
    }

    fn check_dimension(&self, vector: &[f32]) -> Result<()> {
        if vector.len() == self.settings.dimensions {
            return Ok(());
        }
        Err(RagError::Configuration(format!(
            "embedding model '{}' returned a {}-dimensional vector, expected {}",
            self.provider.model_id(),
            vector.len(),
            self.settings.dimensions
        )))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::mock::HashEmbedding;
    use crate::retry::RetryPolicy;

    fn settings(dimensions: usize, max_batch_size: usize) -> EmbeddingSettings {
        EmbeddingSettings {
            model: "hash".into(),
            dimensions,
            max_batch_size,
            request_timeout_ms: 1_000,
            retry: RetryPolicy { max_attempts: 3, base_delay_ms: 1, max_delay_ms: 5, multiplier: 2.0, jitter: false },
        }
    }

    /// Records every request size and fails the first `failures` calls.
    struct Recording {
        inner: HashEmbedding,
        requests: std::sync::Mutex<Vec<usize>>,
        failures: AtomicUsize,
        kind: ServiceErrorKind,
    }

    impl Recording {
        fn new(failures: usize, kind: ServiceErrorKind) -> Self {
            Self {
                inner: HashEmbedding::new(8),
                requests: std::sync::Mutex::new(Vec::new()),
                failures: AtomicUsize::new(failures),
                kind,
            }
        }
    }

    #[async_trait]
    impl EmbeddingProvider for Recording {
        async fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
            self.requests.lock().unwrap().push(texts.len());
            if self
                .failures
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
            {
                return Err(RagError::embedding("recording", self.kind, "injected"));
            }
            self.inner.embed_batch(texts).await
        }

        fn dimensions(&self) -> usize {
            8
        }

        fn model_id(&self) -> &str {
            "recording"
        }
    }

    #[tokio::test]
    async fn splits_into_batches_and_preserves_order() {
        let provider = Arc::new(Recording::new(0, ServiceErrorKind::Other));
        let embedder = Embedder::new(provider.clone(), settings(8, 2)).unwrap();
        let texts = ["a", "b", "c", "d", "e"];

        let vectors = embedder.embed(&texts).await.unwrap();

        assert_eq!(vectors.len(), 5);
        let mut sizes = provider.requests.lock().unwrap().clone();
        sizes.sort_unstable();
        assert_eq!(sizes, [1, 2, 2]);
        for (text, vector) in texts.iter().zip(&vectors) {
            assert_eq!(vector, &HashEmbedding::new(8).vector(text));
        }
    }

    #[tokio::test]
    async fn transient_failures_are_retried() {
        let provider = Arc::new(Recording::new(2, ServiceErrorKind::RateLimited));
        let embedder = Embedder::new(provider.clone(), settings(8, 10)).unwrap();

        let vectors = embedder.embed(&["hello"]).await.unwrap();

        assert_eq!(vectors.len(), 1);
        assert_eq!(provider.requests.lock().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn exhausted_retries_surface_embedding_error() {
        let provider = Arc::new(Recording::new(10, ServiceErrorKind::Timeout));
        let embedder = Embedder::new(provider.clone(), settings(8, 10)).unwrap();

        let err = embedder.embed(&["hello"]).await.unwrap_err();

        assert!(matches!(err, RagError::EmbeddingService { kind: ServiceErrorKind::Timeout, .. }));
        assert_eq!(provider.requests.lock().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn invalid_input_is_not_retried() {
        let provider = Arc::new(Recording::new(10, ServiceErrorKind::InvalidInput));
        let embedder = Embedder::new(provider.clone(), settings(8, 10)).unwrap();

        assert!(embedder.embed(&["hello"]).await.is_err());
        assert_eq!(provider.requests.lock().unwrap().len(), 1);
    }

    #[test]
    fn dimension_mismatch_is_a_configuration_error() {
        let err = Embedder::new(Arc::new(HashEmbedding::new(8)), settings(16, 10)).err();
        assert!(matches!(err, Some(RagError::Configuration(_))));
    }

    #[tokio::test]
    async fn empty_input_makes_no_requests() {
        let provider = Arc::new(Recording::new(0, ServiceErrorKind::Other));
        let embedder = Embedder::new(provider.clone(), settings(8, 10)).unwrap();
        assert!(embedder.embed(&[]).await.unwrap().is_empty());
        assert!(provider.requests.lock().unwrap().is_empty());
    }
}
