//! ChromaDB vector store backend over the Chroma HTTP API (v1).
//!
//! This module is only available when the `chroma` feature is enabled.
//! Collections are created with cosine distance; scores are reported as
//! `1 - distance` so that higher means more similar, like every other
//! backend.

use std::collections::HashMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tokio::sync::RwLock;
use tracing::{debug, error};

use crate::document::{ScoredRecord, StoredRecord, VectorRecord, keys};
use crate::error::{RagError, Result};
use crate::vectorstore::{MetadataFilter, VectorStore};

const BACKEND: &str = "chroma";

/// Collection metadata key recording the vector dimension.
const DIMENSIONS_KEY: &str = "dimensions";

/// A [`VectorStore`] backed by a ChromaDB server.
///
/// # Example
///
/// ```rust,ignore
/// use ragkit::chroma::ChromaVectorStore;
///
/// let store = ChromaVectorStore::new("localhost", 8000)?;
/// store.heartbeat().await?;
/// store.create_collection("rag_documents", 768).await?;
/// ```
pub struct ChromaVectorStore {
    client: reqwest::Client,
    base_url: String,
    /// Collection name to Chroma collection ID.
    ids: RwLock<HashMap<String, String>>,
}

impl ChromaVectorStore {
    /// Connect to the Chroma server at `host:port`.
    pub fn new(host: &str, port: u16) -> Result<Self> {
        Self::with_url(format!("http://{host}:{port}"))
    }

    /// Connect to the Chroma server at `url`.
    pub fn with_url(url: impl Into<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(std::time::Duration::from_secs(5))
            .build()
            .map_err(|e| RagError::Configuration(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            base_url: url.into().trim_end_matches('/').to_string(),
            ids: RwLock::new(HashMap::new()),
        })
    }

    /// Connect using `CHROMA_HOST` and `CHROMA_PORT` (defaults `localhost:8000`).
    pub fn from_env() -> Result<Self> {
        let host = std::env::var("CHROMA_HOST").unwrap_or_else(|_| "localhost".to_string());
        let port = match std::env::var("CHROMA_PORT") {
            Ok(port) => port
                .parse()
                .map_err(|_| RagError::Configuration(format!("CHROMA_PORT '{port}' is not a port")))?,
            Err(_) => 8000,
        };
        Self::new(&host, port)
    }

    /// Check that the server is reachable.
    pub async fn heartbeat(&self) -> Result<()> {
        let url = format!("{}/api/v1/heartbeat", self.base_url);
        let response = self.client.get(&url).send().await.map_err(unavailable)?;
        check_status(response).await.map(|_| ())
    }

    fn url(&self, path: &str) -> String {
        format!("{}/api/v1/{path}", self.base_url)
    }

    async fn post<T: Serialize + ?Sized>(&self, path: &str, body: &T) -> Result<reqwest::Response> {
        let response = self.client.post(self.url(path)).json(body).send().await.map_err(unavailable)?;
        check_status(response).await
    }

    /// Fetch a collection by name; `None` if it does not exist.
    async fn fetch_collection(&self, name: &str) -> Result<Option<CollectionInfo>> {
        let response =
            self.client.get(self.url(&format!("collections/{name}"))).send().await.map_err(unavailable)?;
        let status = response.status();
        if status.is_success() {
            return response.json().await.map(Some).map_err(unavailable);
        }
        let body = response.text().await.unwrap_or_default();
        // Older servers answer a missing collection with 500 and a ValueError.
        if status.as_u16() == 404 || body.contains("does not exist") {
            return Ok(None);
        }
        Err(status_error(status, &body))
    }

    /// Resolve a collection name to its Chroma ID, caching the result.
    async fn collection_id(&self, name: &str) -> Result<String> {
        if let Some(id) = self.ids.read().await.get(name) {
            return Ok(id.clone());
        }
        let info = self
            .fetch_collection(name)
            .await?
            .ok_or_else(|| RagError::invalid_collection(name, "collection does not exist"))?;
        self.ids.write().await.insert(name.to_string(), info.id.clone());
        Ok(info.id)
    }
}

// ── Chroma API request/response types ──────────────────────────────

#[derive(Deserialize)]
struct CollectionInfo {
    id: String,
    #[serde(default)]
    metadata: Option<HashMap<String, Value>>,
}

#[derive(Serialize)]
struct CreateCollectionRequest<'a> {
    name: &'a str,
    metadata: Value,
    get_or_create: bool,
}

#[derive(Serialize)]
struct UpsertRequest<'a> {
    ids: Vec<&'a str>,
    embeddings: Vec<&'a [f32]>,
    documents: Vec<&'a str>,
    metadatas: Vec<&'a HashMap<String, String>>,
}

#[derive(Serialize)]
struct QueryRequest<'a> {
    query_embeddings: [&'a [f32]; 1],
    n_results: usize,
    #[serde(rename = "where", skip_serializing_if = "Option::is_none")]
    filter: Option<Value>,
    include: [&'static str; 3],
}

#[derive(Deserialize)]
struct QueryResponse {
    ids: Vec<Vec<String>>,
    #[serde(default)]
    distances: Option<Vec<Vec<f32>>>,
    #[serde(default)]
    documents: Option<Vec<Vec<Option<String>>>>,
    #[serde(default)]
    metadatas: Option<Vec<Vec<Option<HashMap<String, Value>>>>>,
}

#[derive(Deserialize)]
struct GetResponse {
    ids: Vec<String>,
    #[serde(default)]
    metadatas: Option<Vec<Option<HashMap<String, Value>>>>,
}

// ── helpers ────────────────────────────────────────────────────────

fn unavailable(e: reqwest::Error) -> RagError {
    RagError::store_unavailable(BACKEND, e.to_string())
}

fn status_error(status: reqwest::StatusCode, body: &str) -> RagError {
    if status.is_server_error() {
        RagError::store_unavailable(BACKEND, format!("HTTP {status}: {body}"))
    } else {
        RagError::InvalidInput(format!("Chroma rejected the request (HTTP {status}): {body}"))
    }
}

async fn check_status(response: reqwest::Response) -> Result<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    error!(backend = BACKEND, %status, body = %body, "chroma request failed");
    Err(status_error(status, &body))
}

/// Translate a filter into a Chroma `where` clause.
fn where_clause(filter: &MetadataFilter) -> Option<Value> {
    let clauses: Vec<Value> = filter.clauses().map(|(k, v)| json!({ k: { "$eq": v } })).collect();
    match clauses.len() {
        0 => None,
        1 => clauses.into_iter().next(),
        _ => Some(json!({ "$and": clauses })),
    }
}

/// Chroma returns typed metadata values; records use strings throughout.
fn string_metadata(metadata: Option<HashMap<String, Value>>) -> HashMap<String, String> {
    metadata
        .unwrap_or_default()
        .into_iter()
        .map(|(k, v)| match v {
            Value::String(s) => (k, s),
            other => (k, other.to_string()),
        })
        .collect()
}

fn scored_records(response: QueryResponse) -> Vec<ScoredRecord> {
    let ids = response.ids.into_iter().next().unwrap_or_default();
    let mut distances = response.distances.and_then(|d| d.into_iter().next()).unwrap_or_default().into_iter();
    let mut documents = response.documents.and_then(|d| d.into_iter().next()).unwrap_or_default().into_iter();
    let mut metadatas = response.metadatas.and_then(|m| m.into_iter().next()).unwrap_or_default().into_iter();

    ids.into_iter()
        .map(|id| ScoredRecord {
            id,
            score: 1.0 - distances.next().unwrap_or(1.0),
            text: documents.next().flatten().unwrap_or_default(),
            metadata: string_metadata(metadatas.next().flatten()),
        })
        .collect()
}

// ── VectorStore implementation ─────────────────────────────────────

#[async_trait]
impl VectorStore for ChromaVectorStore {
    fn backend(&self) -> &str {
        BACKEND
    }

    async fn create_collection(&self, name: &str, dimensions: usize) -> Result<()> {
        let request = CreateCollectionRequest {
            name,
            metadata: json!({ "hnsw:space": "cosine", (DIMENSIONS_KEY): dimensions }),
            get_or_create: true,
        };
        let info: CollectionInfo = self.post("collections", &request).await?.json().await.map_err(unavailable)?;
        debug!(backend = BACKEND, collection = name, id = %info.id, dimensions, "collection ready");
        self.ids.write().await.insert(name.to_string(), info.id);
        Ok(())
    }

    async fn delete_collection(&self, name: &str) -> Result<()> {
        let response = self
            .client
            .delete(self.url(&format!("collections/{name}")))
            .send()
            .await
            .map_err(unavailable)?;
        self.ids.write().await.remove(name);
        check_status(response).await.map(|_| ())
    }

    async fn collection_dimensions(&self, name: &str) -> Result<Option<usize>> {
        let Some(info) = self.fetch_collection(name).await? else {
            return Ok(None);
        };
        let dimensions = info
            .metadata
            .as_ref()
            .and_then(|m| m.get(DIMENSIONS_KEY))
            .and_then(Value::as_u64)
            .and_then(|d| usize::try_from(d).ok())
            .ok_or_else(|| {
                RagError::Configuration(format!(
                    "chroma collection '{name}' does not record its vector dimension"
                ))
            })?;
        self.ids.write().await.insert(name.to_string(), info.id);
        Ok(Some(dimensions))
    }

    async fn upsert(&self, collection: &str, records: &[VectorRecord]) -> Result<()> {
        if records.is_empty() {
            return Ok(());
        }
        let id = self.collection_id(collection).await?;
        let request = UpsertRequest {
            ids: records.iter().map(|r| r.id.as_str()).collect(),
            embeddings: records.iter().map(|r| r.vector.as_slice()).collect(),
            documents: records.iter().map(|r| r.text.as_str()).collect(),
            metadatas: records.iter().map(|r| &r.metadata).collect(),
        };
        self.post(&format!("collections/{id}/upsert"), &request).await?;
        debug!(backend = BACKEND, collection, count = records.len(), "upserted records");
        Ok(())
    }

    async fn delete(&self, collection: &str, ids: &[&str]) -> Result<()> {
        if ids.is_empty() {
            return Ok(());
        }
        let id = self.collection_id(collection).await?;
        self.post(&format!("collections/{id}/delete"), &json!({ "ids": ids })).await?;
        Ok(())
    }

    async fn query(
        &self,
        collection: &str,
        vector: &[f32],
        k: usize,
        filter: Option<&MetadataFilter>,
    ) -> Result<Vec<ScoredRecord>> {
        let id = self.collection_id(collection).await?;
        let request = QueryRequest {
            query_embeddings: [vector],
            n_results: k,
            filter: filter.and_then(where_clause),
            include: ["documents", "metadatas", "distances"],
        };
        let response: QueryResponse = self
            .post(&format!("collections/{id}/query"), &request)
            .await?
            .json()
            .await
            .map_err(unavailable)?;
        Ok(scored_records(response))
    }

    async fn records_for_document(
        &self,
        collection: &str,
        document_id: &str,
    ) -> Result<Vec<StoredRecord>> {
        let id = self.collection_id(collection).await?;
        let request = json!({
            "where": { (keys::DOCUMENT_ID): { "$eq": document_id } },
            "include": ["metadatas"],
        });
        let response: GetResponse =
            self.post(&format!("collections/{id}/get"), &request).await?.json().await.map_err(unavailable)?;

        let metadatas = response.metadatas.unwrap_or_default();
        Ok(response
            .ids
            .into_iter()
            .zip(metadatas.into_iter().chain(std::iter::repeat(None)))
            .map(|(id, metadata)| StoredRecord { id, metadata: string_metadata(metadata) })
            .collect())
    }
}
