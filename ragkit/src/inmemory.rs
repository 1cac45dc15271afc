//! In-memory vector store using cosine similarity.
//!
//! [`InMemoryVectorStore`] keeps every collection in a `HashMap` behind a
//! `tokio::sync::RwLock`. It backs the test suite and small deployments that
//! can afford to rebuild their index on restart.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::document::{ScoredRecord, StoredRecord, VectorRecord, by_relevance, keys};
use crate::error::{RagError, Result};
use crate::vectorstore::{MetadataFilter, VectorStore};

const BACKEND: &str = "in-memory";

#[derive(Debug)]
struct Collection {
    dimensions: usize,
    records: HashMap<String, VectorRecord>,
}

/// An in-memory vector store using cosine similarity for search.
///
/// Collections are stored as nested maps: collection name, then record ID.
///
/// # Example
///
/// ```rust,ignore
/// use ragkit::{InMemoryVectorStore, VectorStore};
///
/// let store = InMemoryVectorStore::new();
/// store.create_collection("docs", 384).await?;
/// ```
#[derive(Debug, Default)]
pub struct InMemoryVectorStore {
    collections: RwLock<HashMap<String, Collection>>,
}

impl InMemoryVectorStore {
    /// Create a new empty in-memory vector store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of records stored in `collection` (zero if it does not exist).
    pub async fn len(&self, collection: &str) -> usize {
        self.collections.read().await.get(collection).map_or(0, |c| c.records.len())
    }
}

fn missing(collection: &str) -> RagError {
    RagError::invalid_collection(collection, "collection does not exist")
}

/// Cosine similarity of `a` and `b`; 0.0 if either has zero magnitude.
fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

#[async_trait]
impl VectorStore for InMemoryVectorStore {
    fn backend(&self) -> &str {
        BACKEND
    }

    async fn create_collection(&self, name: &str, dimensions: usize) -> Result<()> {
        let mut collections = self.collections.write().await;
        collections
            .entry(name.to_string())
            .or_insert_with(|| Collection { dimensions, records: HashMap::new() });
        Ok(())
    }

    async fn delete_collection(&self, name: &str) -> Result<()> {
        self.collections.write().await.remove(name);
        Ok(())
    }

    async fn collection_dimensions(&self, name: &str) -> Result<Option<usize>> {
        Ok(self.collections.read().await.get(name).map(|c| c.dimensions))
    }

    async fn upsert(&self, collection: &str, records: &[VectorRecord]) -> Result<()> {
        let mut collections = self.collections.write().await;
        let store = collections.get_mut(collection).ok_or_else(|| missing(collection))?;
        if let Some(bad) = records.iter().find(|r| r.vector.len() != store.dimensions) {
            return Err(RagError::Configuration(format!(
                "record '{}' has {} dimensions, collection '{collection}' expects {}",
                bad.id,
                bad.vector.len(),
                store.dimensions
            )));
        }
        for record in records {
            store.records.insert(record.id.clone(), record.clone());
        }
        Ok(())
    }

    async fn delete(&self, collection: &str, ids: &[&str]) -> Result<()> {
        let mut collections = self.collections.write().await;
        let store = collections.get_mut(collection).ok_or_else(|| missing(collection))?;
        for id in ids {
            store.records.remove(*id);
        }
        Ok(())
    }

    async fn query(
        &self,
        collection: &str,
        vector: &[f32],
        k: usize,
        filter: Option<&MetadataFilter>,
    ) -> Result<Vec<ScoredRecord>> {
        let collections = self.collections.read().await;
        let store = collections.get(collection).ok_or_else(|| missing(collection))?;

        let mut scored: Vec<ScoredRecord> = store
            .records
            .values()
            .filter(|record| filter.is_none_or(|f| f.matches(&record.metadata)))
            .map(|record| ScoredRecord {
                id: record.id.clone(),
                score: cosine_similarity(&record.vector, vector),
                text: record.text.clone(),
                metadata: record.metadata.clone(),
            })
            .collect();

        scored.sort_by(|a, b| by_relevance((a.score, &a.id), (b.score, &b.id)));
        scored.truncate(k);
        Ok(scored)
    }

    async fn records_for_document(
        &self,
        collection: &str,
        document_id: &str,
    ) -> Result<Vec<StoredRecord>> {
        let collections = self.collections.read().await;
        let store = collections.get(collection).ok_or_else(|| missing(collection))?;
        Ok(store
            .records
            .values()
            .filter(|r| r.metadata.get(keys::DOCUMENT_ID).map(String::as_str) == Some(document_id))
            .map(|r| StoredRecord { id: r.id.clone(), metadata: r.metadata.clone() })
            .collect())
    }
}
