//! Query-time retrieval: embed, search, rerank, threshold, rank.

use std::sync::Arc;

use tracing::{debug, error};

use crate::document::RetrievalResult;
use crate::embedding::Embedder;
use crate::error::{RagError, Result};
use crate::reranker::Reranker;
use crate::retry::{RetryPolicy, with_retry};
use crate::vectorstore::{MetadataFilter, VectorStoreClient};

/// Finds the chunks most relevant to a query.
///
/// Holds no mutable state; one instance serves any number of concurrent
/// queries.
pub struct Retriever {
    embedder: Arc<Embedder>,
    store: VectorStoreClient,
    reranker: Option<Arc<dyn Reranker>>,
    min_score: f32,
    retry: RetryPolicy,
}

impl Retriever {
    /// Create a retriever. Results scoring below `min_score` are dropped.
    ///
    /// `backoff` supplies the delay between the first attempt and the single
    /// retry a transient failure gets; its attempt budget is ignored.
    pub fn new(
        embedder: Arc<Embedder>,
        store: VectorStoreClient,
        min_score: f32,
        backoff: &RetryPolicy,
    ) -> Self {
        Self {
            embedder,
            store,
            reranker: None,
            min_score,
            retry: backoff.clone().with_max_attempts(2),
        }
    }

    /// Rerank search results with `reranker` before thresholding.
    pub fn with_reranker(mut self, reranker: Arc<dyn Reranker>) -> Self {
        self.reranker = Some(reranker);
        self
    }

    /// Retrieve up to `k` chunks for `query`, optionally restricted by `filter`.
    ///
    /// # Errors
    ///
    /// [`RagError::InvalidInput`] for a blank query or `k == 0`; every other
    /// failure is wrapped in [`RagError::Retrieval`] after one retry if it
    /// was transient.
    pub async fn retrieve(
        &self,
        query: &str,
        k: usize,
        filter: Option<&MetadataFilter>,
    ) -> Result<RetrievalResult> {
        if query.trim().is_empty() {
            return Err(RagError::InvalidInput("query must not be empty".to_string()));
        }
        if k == 0 {
            return Err(RagError::InvalidInput("k must be a positive integer".to_string()));
        }

        let result = with_retry(&self.retry, "retrieve", || self.retrieve_once(query, k, filter))
            .await
            .map_err(|e| {
                error!(k, error = %e, "retrieval failed");
                RagError::retrieval(e)
            })?;

        debug!(k, result_count = result.len(), "retrieval completed");
        Ok(result)
    }

    async fn retrieve_once(
        &self,
        query: &str,
        k: usize,
        filter: Option<&MetadataFilter>,
    ) -> Result<RetrievalResult> {
        let vector = self.embedder.embed_query(query).await?;
        let result = self.store.query(self.store.collection(), &vector, k, filter).await?;

        let chunks = match &self.reranker {
            Some(reranker) => reranker.rerank(query, result.chunks).await?,
            None => result.chunks,
        };

        let mut result = RetrievalResult::ranked(
            chunks.into_iter().filter(|c| c.score >= self.min_score).collect(),
        );
        result.chunks.truncate(k);
        Ok(result)
    }
}
