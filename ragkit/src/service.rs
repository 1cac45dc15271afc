//! The [`RagService`] facade: ingestion and question answering behind one type.
//!
//! # Example
//!
//! ```rust,ignore
//! use ragkit::{RagService, RagConfig, InMemoryVectorStore, QueryOptions};
//!
//! let service = RagService::builder()
//!     .config(RagConfig::default())
//!     .embedding_provider(Arc::new(my_embedder))
//!     .vector_store(Arc::new(InMemoryVectorStore::new()))
//!     .language_model(Arc::new(my_llm))
//!     .build()?;
//!
//! service.initialize().await?;
//! service.ingest_document(&document).await?;
//! let answer = service.answer_query("What colour is the sky?", QueryOptions::default()).await?;
//! ```

use std::collections::HashMap;
use std::future::Future;
use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};

use tokio_util::sync::CancellationToken;
use tracing::{info, instrument};

use crate::chunking::{Chunker, FixedSizeChunker};
use crate::config::RagConfig;
use crate::context::ContextAssembler;
use crate::document::{Answer, Document, IngestionReport};
use crate::embedding::{Embedder, EmbeddingProvider};
use crate::error::{RagError, Result};
use crate::extract::document_from_file;
use crate::generation::GenerationOrchestrator;
use crate::ingestion::IngestionPipeline;
use crate::llm::LanguageModel;
use crate::reranker::Reranker;
use crate::retriever::Retriever;
use crate::vectorstore::{MetadataFilter, VectorStore, VectorStoreClient};

/// Per-query overrides for [`RagService::answer_query`].
#[derive(Debug, Clone, Default)]
pub struct QueryOptions {
    /// Number of chunks to retrieve; defaults to `RagConfig::top_k` and is
    /// clamped to `RagConfig::max_top_k`.
    pub top_k: Option<usize>,
    /// Restrict retrieval to records matching this filter.
    pub filter: Option<MetadataFilter>,
    /// Context budget in characters; defaults to `RagConfig::context_budget`.
    pub context_budget: Option<usize>,
    /// Abort the query when this token is cancelled.
    pub cancel: Option<CancellationToken>,
}

impl QueryOptions {
    /// Set the number of chunks to retrieve.
    pub fn top_k(mut self, k: usize) -> Self {
        self.top_k = Some(k);
        self
    }

    /// Set a metadata filter.
    pub fn filter(mut self, filter: MetadataFilter) -> Self {
        self.filter = Some(filter);
        self
    }

    /// Set the context budget in characters.
    pub fn context_budget(mut self, budget: usize) -> Self {
        self.context_budget = Some(budget);
        self
    }

    /// Attach a cancellation token.
    pub fn cancel_on(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }
}

/// Retrieval-augmented question answering over one document collection.
///
/// Construct one via [`RagService::builder()`] and call
/// [`initialize`](Self::initialize) once before use. All methods take
/// `&self`; share the service behind an `Arc`.
pub struct RagService {
    config: RagConfig,
    embedder: Arc<Embedder>,
    store: VectorStoreClient,
    ingestion: IngestionPipeline,
    retriever: Retriever,
    assembler: ContextAssembler,
    orchestrator: GenerationOrchestrator,
    document_locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl RagService {
    /// Create a new [`RagServiceBuilder`].
    pub fn builder() -> RagServiceBuilder {
        RagServiceBuilder::default()
    }

    /// Return a reference to the service configuration.
    pub fn config(&self) -> &RagConfig {
        &self.config
    }

    /// Create the collection if needed and check its vector dimension.
    ///
    /// # Errors
    ///
    /// [`RagError::Configuration`] if the collection exists with a dimension
    /// other than the embedder's; [`RagError::VectorStoreUnavailable`] if
    /// the store cannot be reached.
    pub async fn initialize(&self) -> Result<()> {
        self.store.ensure_collection(self.embedder.dimensions()).await?;
        info!(
            collection = self.store.collection(),
            backend = self.store.backend(),
            dimensions = self.embedder.dimensions(),
            "rag service initialized"
        );
        Ok(())
    }

    /// Ingest or re-ingest one document.
    ///
    /// Concurrent calls for the same document ID run one after another.
    #[instrument(skip_all, fields(document.id = %document.id))]
    pub async fn ingest_document(&self, document: &Document) -> Result<IngestionReport> {
        let lock = self.document_lock(&document.id);
        let report = {
            let _guard = lock.lock().await;
            self.ingestion.ingest(document).await
        };
        drop(lock);
        self.release_document_lock(&document.id);
        report
    }

    /// Ingest several documents in order, one report per document.
    pub async fn ingest_documents(&self, documents: &[Document]) -> Result<Vec<IngestionReport>> {
        let mut reports = Vec::with_capacity(documents.len());
        for document in documents {
            reports.push(self.ingest_document(document).await?);
        }
        Ok(reports)
    }

    /// Extract a file's text (see [`extract_text`](crate::extract::extract_text))
    /// and ingest it as a document.
    ///
    /// # Errors
    ///
    /// [`RagError::UnsupportedFormat`] for unknown or disabled formats,
    /// [`RagError::InvalidInput`] for unreadable or empty files,
    /// [`RagError::Io`] if the file cannot be read.
    pub async fn ingest_file(&self, path: impl AsRef<Path>) -> Result<IngestionReport> {
        let document = document_from_file(path.as_ref()).await?;
        self.ingest_document(&document).await
    }

    /// Answer `query` from the document collection.
    ///
    /// An empty collection (or no chunk above the similarity threshold)
    /// yields the fallback answer rather than an error, subject to the
    /// configured no-context policy.
    ///
    /// # Errors
    ///
    /// [`RagError::InvalidInput`] for a blank query or `top_k == 0`,
    /// [`RagError::Retrieval`] or [`RagError::GenerationService`] when a
    /// remote call fails, [`RagError::Cancelled`] if `options.cancel` fires.
    #[instrument(skip_all, fields(query_len = query.len()))]
    pub async fn answer_query(&self, query: &str, options: QueryOptions) -> Result<Answer> {
        if query.trim().is_empty() {
            return Err(RagError::InvalidInput("query must not be empty".to_string()));
        }
        let k = match options.top_k {
            Some(0) => return Err(RagError::InvalidInput("top_k must be a positive integer".to_string())),
            Some(k) => k.min(self.config.max_top_k),
            None => self.config.top_k,
        };
        let budget = options.context_budget.unwrap_or(self.config.context_budget);
        let cancel = options.cancel.as_ref();

        let retrieved = cancellable(cancel, self.retriever.retrieve(query, k, options.filter.as_ref())).await?;
        let context = self.assembler.assemble(&retrieved, budget);
        let answer = cancellable(cancel, self.orchestrator.generate(query, &context)).await?;

        info!(
            k,
            retrieved = retrieved.len(),
            context_chunks = context.len(),
            citations = answer.citations.len(),
            grounding = ?answer.grounding,
            "answered query"
        );
        Ok(answer)
    }

    fn document_lock(&self, document_id: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.document_locks.lock().unwrap_or_else(PoisonError::into_inner);
        locks.entry(document_id.to_string()).or_default().clone()
    }

    /// Drop the lock entry once no other ingestion of the document holds it.
    fn release_document_lock(&self, document_id: &str) {
        let mut locks = self.document_locks.lock().unwrap_or_else(PoisonError::into_inner);
        if locks.get(document_id).is_some_and(|l| Arc::strong_count(l) == 1) {
            locks.remove(document_id);
        }
    }
}

/// Run `fut` unless `cancel` fires first; checked before the first poll.
async fn cancellable<T>(
    cancel: Option<&CancellationToken>,
    fut: impl Future<Output = Result<T>>,
) -> Result<T> {
    let Some(token) = cancel else {
        return fut.await;
    };
    if token.is_cancelled() {
        return Err(RagError::Cancelled);
    }
    tokio::select! {
        biased;
        _ = token.cancelled() => Err(RagError::Cancelled),
        result = fut => result,
    }
}

/// Builder for constructing a [`RagService`].
///
/// The embedding provider, vector store and language model are required.
/// The chunker defaults to a [`FixedSizeChunker`] using the configured
/// chunk size and overlap; the reranker is optional.
#[derive(Default)]
pub struct RagServiceBuilder {
    config: Option<RagConfig>,
    embedding_provider: Option<Arc<dyn EmbeddingProvider>>,
    vector_store: Option<Arc<dyn VectorStore>>,
    language_model: Option<Arc<dyn LanguageModel>>,
    chunker: Option<Arc<dyn Chunker>>,
    reranker: Option<Arc<dyn Reranker>>,
}

impl RagServiceBuilder {
    /// Set the service configuration (defaults to [`RagConfig::default`]).
    pub fn config(mut self, config: RagConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Set the embedding provider.
    pub fn embedding_provider(mut self, provider: Arc<dyn EmbeddingProvider>) -> Self {
        self.embedding_provider = Some(provider);
        self
    }

    /// Set the vector store backend.
    pub fn vector_store(mut self, store: Arc<dyn VectorStore>) -> Self {
        self.vector_store = Some(store);
        self
    }

    /// Set the language model.
    pub fn language_model(mut self, model: Arc<dyn LanguageModel>) -> Self {
        self.language_model = Some(model);
        self
    }

    /// Replace the default chunker.
    pub fn chunker(mut self, chunker: Arc<dyn Chunker>) -> Self {
        self.chunker = Some(chunker);
        self
    }

    /// Set an optional reranker applied after vector search.
    pub fn reranker(mut self, reranker: Arc<dyn Reranker>) -> Self {
        self.reranker = Some(reranker);
        self
    }

    /// Build the [`RagService`], validating configuration and components.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::Configuration`] if a required component is
    /// missing, the configuration is invalid, or the embedding provider's
    /// dimension disagrees with the configuration.
    pub fn build(self) -> Result<RagService> {
        let config = self.config.unwrap_or_default();
        config.validate()?;
        let provider = self.embedding_provider.ok_or_else(|| {
            RagError::Configuration("embedding_provider is required".to_string())
        })?;
        let vector_store = self
            .vector_store
            .ok_or_else(|| RagError::Configuration("vector_store is required".to_string()))?;
        let language_model = self
            .language_model
            .ok_or_else(|| RagError::Configuration("language_model is required".to_string()))?;
        let chunker = self.chunker.unwrap_or_else(|| {
            Arc::new(FixedSizeChunker::new(config.chunk_size, config.chunk_overlap))
        });

        let embedder = Arc::new(Embedder::new(provider, config.embedding.clone())?);
        let store =
            VectorStoreClient::new(vector_store, config.collection.clone(), &config.vector_store);
        let ingestion = IngestionPipeline::new(
            embedder.clone(),
            store.clone(),
            chunker,
            config.vector_store.write_retry.clone(),
        );
        let mut retriever = Retriever::new(
            embedder.clone(),
            store.clone(),
            config.similarity_threshold,
            &config.embedding.retry,
        );
        if let Some(reranker) = self.reranker {
            retriever = retriever.with_reranker(reranker);
        }
        let orchestrator = GenerationOrchestrator::new(language_model, config.generation.clone())?;

        Ok(RagService {
            assembler: ContextAssembler::new(config.dedup_threshold),
            config,
            embedder,
            store,
            ingestion,
            retriever,
            orchestrator,
            document_locks: Mutex::new(HashMap::new()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::Grounding;
    use crate::inmemory::InMemoryVectorStore;
    use crate::mock::{HashEmbedding, ScriptedLlm};

    fn service(llm: Arc<ScriptedLlm>) -> RagService {
        let config = RagConfig::builder().embedding_model("hash-embedding-v1", 64).build().unwrap();
        RagService::builder()
            .config(config)
            .embedding_provider(Arc::new(HashEmbedding::new(64)))
            .vector_store(Arc::new(InMemoryVectorStore::new()))
            .language_model(llm)
            .build()
            .unwrap()
    }

    #[test]
    fn missing_components_are_configuration_errors() {
        let err = RagService::builder().build().err();
        assert!(matches!(err, Some(RagError::Configuration(msg)) if msg.contains("embedding_provider")));
    }

    #[test]
    fn dimension_disagreement_fails_at_build() {
        let err = RagService::builder()
            .embedding_provider(Arc::new(HashEmbedding::new(64)))
            .vector_store(Arc::new(InMemoryVectorStore::new()))
            .language_model(Arc::new(ScriptedLlm::replying("")))
            .build()
            .err();
        assert!(matches!(err, Some(RagError::Configuration(_))));
    }

    fn assert_send<T: Send>(_: T) {}

    #[test]
    fn service_futures_are_send() {
        let service = service(Arc::new(ScriptedLlm::replying("")));
        let doc = Document::new("doc", "text");
        assert_send(service.ingest_document(&doc));
        assert_send(service.ingest_documents(std::slice::from_ref(&doc)));
        assert_send(service.answer_query("q", QueryOptions::default()));
    }

    #[tokio::test]
    async fn cancelled_query_returns_cancelled() {
        let service = service(Arc::new(ScriptedLlm::replying("blue")));
        service.initialize().await.unwrap();
        let token = CancellationToken::new();
        token.cancel();

        let err = service
            .answer_query("What colour is the sky?", QueryOptions::default().cancel_on(token))
            .await
            .unwrap_err();
        assert!(matches!(err, RagError::Cancelled));
    }

    #[tokio::test]
    async fn zero_top_k_is_rejected_and_large_values_clamped() {
        let service = service(Arc::new(ScriptedLlm::replying("blue")));
        service.initialize().await.unwrap();
        assert!(matches!(
            service.answer_query("sky?", QueryOptions::default().top_k(0)).await,
            Err(RagError::InvalidInput(_))
        ));
        let answer = service.answer_query("sky?", QueryOptions::default().top_k(500)).await.unwrap();
        assert_eq!(answer.grounding, Grounding::NoContextRefused);
    }

    #[tokio::test]
    async fn lock_entries_are_released_after_ingestion() {
        let service = service(Arc::new(ScriptedLlm::replying("")));
        service.initialize().await.unwrap();
        service.ingest_document(&Document::new("doc", "The sky is blue.")).await.unwrap();
        assert!(service.document_locks.lock().unwrap().is_empty());
    }
}
