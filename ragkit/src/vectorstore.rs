//! Vector store trait and the collection-scoped [`VectorStoreClient`].

use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, error};

use crate::config::VectorStoreSettings;
use crate::document::{RetrievalResult, ScoredChunk, ScoredRecord, StoredRecord, VectorRecord};
use crate::error::{RagError, Result};
use crate::retry::with_timeout;

/// A conjunction of `key == value` clauses over record metadata.
///
/// ```rust,ignore
/// let filter = MetadataFilter::new().eq("source", "handbook.pdf");
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetadataFilter {
    clauses: BTreeMap<String, String>,
}

impl MetadataFilter {
    /// An empty filter that matches every record.
    pub fn new() -> Self {
        Self::default()
    }

    /// Require `key` to equal `value`.
    pub fn eq(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.clauses.insert(key.into(), value.into());
        self
    }

    /// Whether the filter has no clauses.
    pub fn is_empty(&self) -> bool {
        self.clauses.is_empty()
    }

    /// The clauses, ordered by key.
    pub fn clauses(&self) -> impl Iterator<Item = (&str, &str)> {
        self.clauses.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Whether `metadata` satisfies every clause.
    pub fn matches(&self, metadata: &HashMap<String, String>) -> bool {
        self.clauses.iter().all(|(k, v)| metadata.get(k) == Some(v))
    }
}

/// A storage backend for vector embeddings with similarity search.
///
/// Implementations manage named collections of [`VectorRecord`]s. They are
/// expected to make upserts and deletes of a single ID atomic; nothing more
/// is assumed. A query with no matches returns an empty `Vec`.
///
/// # Example
///
/// ```rust,ignore
/// use ragkit::{VectorStore, InMemoryVectorStore};
///
/// let store = InMemoryVectorStore::new();
/// store.create_collection("docs", 384).await?;
/// store.upsert("docs", &records).await?;
/// let results = store.query("docs", &query_embedding, 5, None).await?;
/// ```
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Short backend name used in errors and logs.
    fn backend(&self) -> &str;

    /// Create a named collection. No-op if it already exists.
    async fn create_collection(&self, name: &str, dimensions: usize) -> Result<()>;

    /// Delete a named collection and all its data.
    async fn delete_collection(&self, name: &str) -> Result<()>;

    /// Vector dimension of a collection, or `None` if it does not exist.
    async fn collection_dimensions(&self, name: &str) -> Result<Option<usize>>;

    /// Insert or replace records by ID.
    async fn upsert(&self, collection: &str, records: &[VectorRecord]) -> Result<()>;

    /// Delete records by ID. Unknown IDs are ignored.
    async fn delete(&self, collection: &str, ids: &[&str]) -> Result<()>;

    /// Return up to `k` records most similar to `vector` that satisfy `filter`.
    async fn query(
        &self,
        collection: &str,
        vector: &[f32],
        k: usize,
        filter: Option<&MetadataFilter>,
    ) -> Result<Vec<ScoredRecord>>;

    /// All records whose `document_id` metadata equals `document_id`.
    async fn records_for_document(
        &self,
        collection: &str,
        document_id: &str,
    ) -> Result<Vec<StoredRecord>>;
}

/// Typed access to one collection of a [`VectorStore`].
///
/// Every call names the collection explicitly and is rejected with
/// [`RagError::InvalidCollection`] unless it is the bound one. Calls are
/// bounded by the configured deadline; expiry surfaces as
/// [`RagError::VectorStoreUnavailable`]. The client never retries; callers
/// pick their own policy.
#[derive(Clone)]
pub struct VectorStoreClient {
    store: Arc<dyn VectorStore>,
    collection: String,
    timeout: Duration,
}

impl VectorStoreClient {
    /// Bind `store` to `collection`.
    pub fn new(
        store: Arc<dyn VectorStore>,
        collection: impl Into<String>,
        settings: &VectorStoreSettings,
    ) -> Self {
        Self { store, collection: collection.into(), timeout: settings.request_timeout() }
    }

    /// The bound collection.
    pub fn collection(&self) -> &str {
        &self.collection
    }

    /// The backend name.
    pub fn backend(&self) -> &str {
        self.store.backend()
    }

    /// Create the bound collection if needed and verify its dimension.
    ///
    /// # Errors
    ///
    /// [`RagError::Configuration`] if the collection exists with a different
    /// dimension. This is fatal and never retried.
    pub async fn ensure_collection(&self, dimensions: usize) -> Result<()> {
        let existing = self
            .timed("collection_dimensions", self.store.collection_dimensions(&self.collection))
            .await?;
        match existing {
            Some(found) if found != dimensions => Err(RagError::Configuration(format!(
                "collection '{}' stores {found}-dimensional vectors but the embedder produces {dimensions}",
                self.collection
            ))),
            Some(_) => Ok(()),
            None => {
                self.timed(
                    "create_collection",
                    self.store.create_collection(&self.collection, dimensions),
                )
                .await?;
                debug!(collection = %self.collection, dimensions, "created collection");
                Ok(())
            }
        }
    }

    /// Insert or replace `records` in `collection`.
    pub async fn upsert(&self, collection: &str, records: &[VectorRecord]) -> Result<()> {
        self.check_collection(collection)?;
        if let Some(stray) = records.iter().find(|r| r.collection != collection) {
            return Err(RagError::invalid_collection(
                stray.collection.clone(),
                format!("record '{}' cannot be written to collection '{collection}'", stray.id),
            ));
        }
        if records.is_empty() {
            return Ok(());
        }
        self.timed("upsert", self.store.upsert(collection, records)).await
    }

    /// Delete records by chunk ID from `collection`.
    pub async fn delete(&self, collection: &str, ids: &[&str]) -> Result<()> {
        self.check_collection(collection)?;
        if ids.is_empty() {
            return Ok(());
        }
        self.timed("delete", self.store.delete(collection, ids)).await
    }

    /// Top-`k` similarity search in `collection`.
    ///
    /// Results are ordered by descending score with ties broken by ascending
    /// chunk ID. The backend is asked for `2k` candidates before the cut to
    /// `k`. No match is an empty result, not an error.
    ///
    /// # Errors
    ///
    /// [`RagError::InvalidInput`] if `k` is zero.
    pub async fn query(
        &self,
        collection: &str,
        vector: &[f32],
        k: usize,
        filter: Option<&MetadataFilter>,
    ) -> Result<RetrievalResult> {
        self.check_collection(collection)?;
        if k == 0 {
            return Err(RagError::InvalidInput("k must be a positive integer".to_string()));
        }
        let filter = filter.filter(|f| !f.is_empty());
        // Backends truncate in their own tie order; fetch extra so the
        // score/ID ordering decides which records survive the cut.
        let fetch = k.saturating_mul(2);
        let records =
            self.timed("query", self.store.query(collection, vector, fetch, filter)).await?;

        let mut result =
            RetrievalResult::ranked(records.into_iter().map(ScoredChunk::from).collect());
        result.chunks.truncate(k);
        Ok(result)
    }

    /// Stored records of one document in `collection`.
    pub async fn records_for_document(
        &self,
        collection: &str,
        document_id: &str,
    ) -> Result<Vec<StoredRecord>> {
        self.check_collection(collection)?;
        self.timed(
            "records_for_document",
            self.store.records_for_document(collection, document_id),
        )
        .await
    }

    fn check_collection(&self, collection: &str) -> Result<()> {
        if collection == self.collection {
            return Ok(());
        }
        Err(RagError::invalid_collection(
            collection,
            format!("this client is bound to collection '{}'", self.collection),
        ))
    }

    async fn timed<T>(&self, operation: &str, fut: impl Future<Output = Result<T>>) -> Result<T> {
        let backend = self.store.backend();
        let limit = self.timeout;
        with_timeout(limit, fut, || {
            RagError::store_unavailable(
                backend,
                format!("{operation} timed out after {}ms", limit.as_millis()),
            )
        })
        .await
        .inspect_err(|e| {
            error!(backend, operation, collection = %self.collection, error = %e, "vector store call failed")
        })
    }
}
