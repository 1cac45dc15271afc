//! Qdrant vector store backend.
//!
//! Provides [`QdrantVectorStore`] which implements [`VectorStore`] using
//! the [qdrant-client](https://docs.rs/qdrant-client) crate over gRPC.
//!
//! Qdrant point IDs must be integers or UUIDs, so each chunk ID is mapped to
//! a deterministic UUID v5 and the original ID is kept in the payload.
//!
//! # Example
//!
//! ```rust,ignore
//! use ragkit::qdrant::QdrantVectorStore;
//!
//! let store = QdrantVectorStore::new("http://localhost:6334")?;
//! store.create_collection("docs", 768).await?;
//! let results = store.query("docs", &query_embedding, 5, None).await?;
//! ```

use std::collections::HashMap;

use async_trait::async_trait;
use qdrant_client::qdrant::value::Kind;
use qdrant_client::qdrant::vectors_config::Config as VectorsConfigKind;
use qdrant_client::qdrant::{
    Condition, CreateCollectionBuilder, DeletePointsBuilder, Distance, Filter, PointId,
    PointStruct, PointsIdsList, ScrollPointsBuilder, SearchPointsBuilder, UpsertPointsBuilder,
    Value as QdrantValue, VectorParamsBuilder,
};
use qdrant_client::{Payload, Qdrant};
use serde_json::Value;
use tracing::debug;
use uuid::Uuid;

use crate::document::{ScoredRecord, StoredRecord, VectorRecord, keys};
use crate::error::{RagError, Result};
use crate::vectorstore::{MetadataFilter, VectorStore};

const BACKEND: &str = "qdrant";
const SCROLL_PAGE: u32 = 256;

/// A [`VectorStore`] backed by [Qdrant](https://qdrant.tech/).
///
/// Collections use cosine distance. Record metadata is stored under the
/// `metadata` payload key and filtered with `metadata.<key>` conditions.
pub struct QdrantVectorStore {
    client: Qdrant,
}

impl QdrantVectorStore {
    /// Create a new Qdrant vector store connecting to the given URL.
    pub fn new(url: &str) -> Result<Self> {
        let client = Qdrant::from_url(url).build().map_err(Self::map_err)?;
        Ok(Self { client })
    }

    /// Create a new Qdrant vector store with default URL (`http://localhost:6334`).
    pub fn default_url() -> Result<Self> {
        Self::new("http://localhost:6334")
    }

    /// Create a new Qdrant vector store from an existing client.
    pub fn from_client(client: Qdrant) -> Self {
        Self { client }
    }

    fn map_err(e: qdrant_client::QdrantError) -> RagError {
        RagError::store_unavailable(BACKEND, e.to_string())
    }

    /// Deterministic point ID for a chunk ID.
    fn point_id(chunk_id: &str) -> PointId {
        Uuid::new_v5(&Uuid::NAMESPACE_OID, chunk_id.as_bytes()).to_string().into()
    }

    fn extract_string(value: &QdrantValue) -> Option<String> {
        match &value.kind {
            Some(Kind::StringValue(s)) => Some(s.clone()),
            _ => None,
        }
    }

    fn payload(record: &VectorRecord) -> Payload {
        let metadata: serde_json::Map<String, Value> =
            record.metadata.iter().map(|(k, v)| (k.clone(), Value::String(v.clone()))).collect();
        let payload = serde_json::json!({
            "id": record.id,
            "text": record.text,
            "metadata": metadata,
        });
        Payload::try_from(payload).unwrap_or_default()
    }

    fn metadata(payload: &HashMap<String, QdrantValue>) -> HashMap<String, String> {
        payload
            .get("metadata")
            .and_then(|v| match &v.kind {
                Some(Kind::StructValue(s)) => Some(
                    s.fields
                        .iter()
                        .filter_map(|(k, v)| Self::extract_string(v).map(|s| (k.clone(), s)))
                        .collect(),
                ),
                _ => None,
            })
            .unwrap_or_default()
    }

    fn filter(filter: &MetadataFilter) -> Option<Filter> {
        if filter.is_empty() {
            return None;
        }
        Some(Filter::must(
            filter.clauses().map(|(k, v)| Condition::matches(format!("metadata.{k}"), v.to_string())),
        ))
    }
}

#[async_trait]
impl VectorStore for QdrantVectorStore {
    fn backend(&self) -> &str {
        BACKEND
    }

    async fn create_collection(&self, name: &str, dimensions: usize) -> Result<()> {
        if self.client.collection_exists(name).await.map_err(Self::map_err)? {
            debug!(collection = name, "qdrant collection already exists, skipping creation");
            return Ok(());
        }

        self.client
            .create_collection(
                CreateCollectionBuilder::new(name)
                    .vectors_config(VectorParamsBuilder::new(dimensions as u64, Distance::Cosine)),
            )
            .await
            .map_err(Self::map_err)?;

        debug!(collection = name, dimensions, "created qdrant collection");
        Ok(())
    }

    async fn delete_collection(&self, name: &str) -> Result<()> {
        self.client.delete_collection(name).await.map_err(Self::map_err)?;
        debug!(collection = name, "deleted qdrant collection");
        Ok(())
    }

    async fn collection_dimensions(&self, name: &str) -> Result<Option<usize>> {
        if !self.client.collection_exists(name).await.map_err(Self::map_err)? {
            return Ok(None);
        }
        let info = self.client.collection_info(name).await.map_err(Self::map_err)?;
        let size = info
            .result
            .and_then(|r| r.config)
            .and_then(|c| c.params)
            .and_then(|p| p.vectors_config)
            .and_then(|v| v.config)
            .and_then(|config| match config {
                VectorsConfigKind::Params(params) => Some(params.size),
                VectorsConfigKind::ParamsMap(_) => None,
            })
            .ok_or_else(|| {
                RagError::Configuration(format!(
                    "qdrant collection '{name}' does not use a single unnamed vector"
                ))
            })?;
        Ok(Some(size as usize))
    }

    async fn upsert(&self, collection: &str, records: &[VectorRecord]) -> Result<()> {
        if records.is_empty() {
            return Ok(());
        }

        let points: Vec<PointStruct> = records
            .iter()
            .map(|r| PointStruct::new(Self::point_id(&r.id), r.vector.clone(), Self::payload(r)))
            .collect();

        self.client
            .upsert_points(UpsertPointsBuilder::new(collection, points).wait(true))
            .await
            .map_err(Self::map_err)?;

        debug!(collection, count = records.len(), "upserted records to qdrant");
        Ok(())
    }

    async fn delete(&self, collection: &str, ids: &[&str]) -> Result<()> {
        if ids.is_empty() {
            return Ok(());
        }

        let point_ids: Vec<PointId> = ids.iter().map(|id| Self::point_id(id)).collect();
        self.client
            .delete_points(
                DeletePointsBuilder::new(collection)
                    .points(PointsIdsList { ids: point_ids })
                    .wait(true),
            )
            .await
            .map_err(Self::map_err)?;

        debug!(collection, count = ids.len(), "deleted points from qdrant");
        Ok(())
    }

    async fn query(
        &self,
        collection: &str,
        vector: &[f32],
        k: usize,
        filter: Option<&MetadataFilter>,
    ) -> Result<Vec<ScoredRecord>> {
        let mut request =
            SearchPointsBuilder::new(collection, vector.to_vec(), k as u64).with_payload(true);
        if let Some(filter) = filter.and_then(Self::filter) {
            request = request.filter(filter);
        }
        let response = self.client.search_points(request).await.map_err(Self::map_err)?;

        Ok(response
            .result
            .into_iter()
            .map(|scored| ScoredRecord {
                id: scored.payload.get("id").and_then(Self::extract_string).unwrap_or_default(),
                text: scored.payload.get("text").and_then(Self::extract_string).unwrap_or_default(),
                metadata: Self::metadata(&scored.payload),
                score: scored.score,
            })
            .collect())
    }

    async fn records_for_document(
        &self,
        collection: &str,
        document_id: &str,
    ) -> Result<Vec<StoredRecord>> {
        let filter = Filter::must([Condition::matches(
            format!("metadata.{}", keys::DOCUMENT_ID),
            document_id.to_string(),
        )]);

        let mut records = Vec::new();
        let mut offset: Option<PointId> = None;
        loop {
            let mut request = ScrollPointsBuilder::new(collection)
                .filter(filter.clone())
                .with_payload(true)
                .limit(SCROLL_PAGE);
            if let Some(offset) = offset.take() {
                request = request.offset(offset);
            }
            let page = self.client.scroll(request).await.map_err(Self::map_err)?;
            records.extend(page.result.into_iter().map(|point| StoredRecord {
                id: point.payload.get("id").and_then(Self::extract_string).unwrap_or_default(),
                metadata: Self::metadata(&point.payload),
            }));
            match page.next_page_offset {
                Some(next) => offset = Some(next),
                None => break,
            }
        }
        Ok(records)
    }
}
