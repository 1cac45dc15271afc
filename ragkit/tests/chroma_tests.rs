//! Chroma backend against a local stand-in for the Chroma v1 HTTP API.

#![cfg(feature = "chroma")]

mod common;

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use common::{config, embedding, llm, service_over};
use ragkit::{
    ChromaVectorStore, Document, Grounding, MetadataFilter, QueryOptions, RagError, VectorRecord,
    VectorStore,
};
use serde_json::{Map, Value, json};

struct Record {
    embedding: Vec<f32>,
    document: String,
    metadata: Map<String, Value>,
}

struct Collection {
    id: String,
    name: String,
    metadata: Value,
    records: BTreeMap<String, Record>,
}

impl Collection {
    fn dimensions(&self) -> Option<usize> {
        self.metadata["dimensions"].as_u64().map(|d| d as usize)
    }

    fn info(&self) -> Value {
        json!({ "id": self.id, "name": self.name, "metadata": self.metadata })
    }
}

/// In-process Chroma with just enough behavior for the backend's calls.
#[derive(Clone, Default)]
struct FakeChroma {
    collections: Arc<Mutex<Vec<Collection>>>,
    lookups: Arc<AtomicUsize>,
    /// Answer unknown collections like pre-0.5 servers: 500 with a ValueError.
    legacy_errors: bool,
}

impl FakeChroma {
    fn legacy() -> Self {
        Self { legacy_errors: true, ..Self::default() }
    }

    fn lookups(&self) -> usize {
        self.lookups.load(Ordering::SeqCst)
    }
}

fn cosine_distance(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm = |v: &[f32]| v.iter().map(|x| x * x).sum::<f32>().sqrt();
    1.0 - dot / (norm(a) * norm(b))
}

fn matches_where(clause: &Value, metadata: &Map<String, Value>) -> bool {
    let Some(clause) = clause.as_object() else {
        return true;
    };
    clause.iter().all(|(key, condition)| match key.as_str() {
        "$and" => condition.as_array().is_some_and(|all| all.iter().all(|c| matches_where(c, metadata))),
        _ => metadata.get(key) == condition.get("$eq"),
    })
}

async fn heartbeat() -> Json<Value> {
    Json(json!({ "nanosecond heartbeat": 1 }))
}

async fn create_collection(State(chroma): State<FakeChroma>, Json(body): Json<Value>) -> Json<Value> {
    let name = body["name"].as_str().unwrap_or_default().to_string();
    let mut collections = chroma.collections.lock().unwrap();
    if let Some(existing) = collections.iter().find(|c| c.name == name) {
        return Json(existing.info());
    }
    let collection = Collection {
        id: format!("uuid-{}", collections.len() + 1),
        name,
        metadata: body["metadata"].clone(),
        records: BTreeMap::new(),
    };
    let info = collection.info();
    collections.push(collection);
    Json(info)
}

async fn get_collection(State(chroma): State<FakeChroma>, Path(name): Path<String>) -> Response {
    chroma.lookups.fetch_add(1, Ordering::SeqCst);
    let collections = chroma.collections.lock().unwrap();
    match collections.iter().find(|c| c.name == name) {
        Some(collection) => Json(collection.info()).into_response(),
        None if chroma.legacy_errors => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "error": format!("ValueError('Collection {name} does not exist.')") })),
        )
            .into_response(),
        None => (StatusCode::NOT_FOUND, Json(json!({ "error": "NotFoundError" }))).into_response(),
    }
}

async fn delete_collection(State(chroma): State<FakeChroma>, Path(name): Path<String>) -> StatusCode {
    chroma.collections.lock().unwrap().retain(|c| c.name != name);
    StatusCode::OK
}

async fn collection_op(
    State(chroma): State<FakeChroma>,
    Path((id, op)): Path<(String, String)>,
    Json(body): Json<Value>,
) -> Response {
    let mut collections = chroma.collections.lock().unwrap();
    let Some(collection) = collections.iter_mut().find(|c| c.id == id) else {
        return (StatusCode::NOT_FOUND, Json(json!({ "error": "NotFoundError" }))).into_response();
    };

    match op.as_str() {
        "upsert" => {
            let ids = body["ids"].as_array().cloned().unwrap_or_default();
            for (i, id) in ids.iter().enumerate() {
                let embedding: Vec<f32> = body["embeddings"][i]
                    .as_array()
                    .map(|v| v.iter().filter_map(Value::as_f64).map(|x| x as f32).collect())
                    .unwrap_or_default();
                if Some(embedding.len()) != collection.dimensions() {
                    let message = format!("Embedding dimension {} does not match collection", embedding.len());
                    return (StatusCode::BAD_REQUEST, Json(json!({ "error": message }))).into_response();
                }
                collection.records.insert(
                    id.as_str().unwrap_or_default().to_string(),
                    Record {
                        embedding,
                        document: body["documents"][i].as_str().unwrap_or_default().to_string(),
                        metadata: body["metadatas"][i].as_object().cloned().unwrap_or_default(),
                    },
                );
            }
            Json(json!(true)).into_response()
        }
        "delete" => {
            for id in body["ids"].as_array().into_iter().flatten() {
                collection.records.remove(id.as_str().unwrap_or_default());
            }
            Json(json!([])).into_response()
        }
        "query" => {
            let query: Vec<f32> = body["query_embeddings"][0]
                .as_array()
                .map(|v| v.iter().filter_map(Value::as_f64).map(|x| x as f32).collect())
                .unwrap_or_default();
            let n = body["n_results"].as_u64().unwrap_or(10) as usize;
            let mut hits: Vec<(&String, &Record, f32)> = collection
                .records
                .iter()
                .filter(|(_, r)| matches_where(&body["where"], &r.metadata))
                .map(|(id, r)| (id, r, cosine_distance(&r.embedding, &query)))
                .collect();
            hits.sort_by(|a, b| a.2.total_cmp(&b.2));
            hits.truncate(n);
            Json(json!({
                "ids": [hits.iter().map(|h| h.0).collect::<Vec<_>>()],
                "distances": [hits.iter().map(|h| h.2).collect::<Vec<_>>()],
                "documents": [hits.iter().map(|h| &h.1.document).collect::<Vec<_>>()],
                "metadatas": [hits.iter().map(|h| &h.1.metadata).collect::<Vec<_>>()],
            }))
            .into_response()
        }
        "get" => {
            let found: Vec<(&String, &Record)> = collection
                .records
                .iter()
                .filter(|(_, r)| matches_where(&body["where"], &r.metadata))
                .collect();
            Json(json!({
                "ids": found.iter().map(|f| f.0).collect::<Vec<_>>(),
                "metadatas": found.iter().map(|f| &f.1.metadata).collect::<Vec<_>>(),
            }))
            .into_response()
        }
        _ => StatusCode::NOT_FOUND.into_response(),
    }
}

async fn spawn_chroma(chroma: FakeChroma) -> (String, tokio::task::JoinHandle<()>) {
    let app = Router::new()
        .route("/api/v1/heartbeat", get(heartbeat))
        .route("/api/v1/collections", post(create_collection))
        .route("/api/v1/collections/{name}", get(get_collection).delete(delete_collection))
        .route("/api/v1/collections/{id}/{op}", post(collection_op))
        .with_state(chroma);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.expect("bind test listener");
    let addr = listener.local_addr().expect("listener addr");
    let handle = tokio::spawn(async move {
        axum::serve(listener, app).await.expect("server run");
    });
    (format!("http://{addr}"), handle)
}

fn record(id: &str, document_id: &str, vector: Vec<f32>) -> VectorRecord {
    VectorRecord {
        id: id.to_string(),
        collection: "docs".to_string(),
        vector,
        text: format!("text of {id}"),
        metadata: HashMap::from([("document_id".to_string(), document_id.to_string())]),
    }
}

fn ids<T>(items: &[T], id: impl Fn(&T) -> &str) -> Vec<String> {
    items.iter().map(|item| id(item).to_string()).collect()
}

#[tokio::test]
async fn records_round_trip_through_the_http_api() {
    let (base, handle) = spawn_chroma(FakeChroma::default()).await;
    let store = ChromaVectorStore::with_url(&base).unwrap();
    store.heartbeat().await.unwrap();

    store.create_collection("docs", 2).await.unwrap();
    assert_eq!(store.collection_dimensions("docs").await.unwrap(), Some(2));
    store
        .upsert(
            "docs",
            &[
                record("a_0", "a", vec![1.0, 0.0]),
                record("a_1", "a", vec![0.6, 0.8]),
                record("b_0", "b", vec![0.0, 1.0]),
            ],
        )
        .await
        .unwrap();

    let hits = store.query("docs", &[1.0, 0.0], 2, None).await.unwrap();
    assert_eq!(ids(&hits, |h| h.id.as_str()), ["a_0", "a_1"]);
    assert!((hits[0].score - 1.0).abs() < 1e-5);
    assert!((hits[1].score - 0.6).abs() < 1e-5);
    assert_eq!(hits[0].text, "text of a_0");
    assert_eq!(hits[0].metadata.get("document_id").map(String::as_str), Some("a"));

    let filter = MetadataFilter::new().eq("document_id", "b");
    let hits = store.query("docs", &[1.0, 0.0], 5, Some(&filter)).await.unwrap();
    assert_eq!(ids(&hits, |h| h.id.as_str()), ["b_0"]);

    let stored = store.records_for_document("docs", "a").await.unwrap();
    assert_eq!(ids(&stored, |r| r.id.as_str()), ["a_0", "a_1"]);

    store.delete("docs", &["a_0", "a_1"]).await.unwrap();
    assert!(store.records_for_document("docs", "a").await.unwrap().is_empty());

    store.delete_collection("docs").await.unwrap();
    assert_eq!(store.collection_dimensions("docs").await.unwrap(), None);

    handle.abort();
}

#[tokio::test]
async fn missing_collections_are_absent_on_current_and_legacy_servers() {
    for chroma in [FakeChroma::default(), FakeChroma::legacy()] {
        let (base, handle) = spawn_chroma(chroma).await;
        let store = ChromaVectorStore::with_url(&base).unwrap();

        assert_eq!(store.collection_dimensions("nope").await.unwrap(), None);
        let err = store.upsert("nope", &[record("x", "x", vec![1.0, 0.0])]).await.unwrap_err();
        assert!(matches!(err, RagError::InvalidCollection { .. }), "{err:?}");

        handle.abort();
    }
}

#[tokio::test]
async fn collection_ids_are_looked_up_once() {
    let chroma = FakeChroma::default();
    let (base, handle) = spawn_chroma(chroma.clone()).await;
    ChromaVectorStore::with_url(&base).unwrap().create_collection("docs", 2).await.unwrap();

    let store = ChromaVectorStore::with_url(&base).unwrap();
    store.upsert("docs", &[record("a_0", "a", vec![1.0, 0.0])]).await.unwrap();
    store.query("docs", &[1.0, 0.0], 1, None).await.unwrap();
    store.records_for_document("docs", "a").await.unwrap();
    store.delete("docs", &["a_0"]).await.unwrap();

    assert_eq!(chroma.lookups(), 1);

    handle.abort();
}

#[tokio::test]
async fn rejected_writes_are_invalid_input() {
    let (base, handle) = spawn_chroma(FakeChroma::default()).await;
    let store = ChromaVectorStore::with_url(&base).unwrap();
    store.create_collection("docs", 2).await.unwrap();

    let err = store.upsert("docs", &[record("a_0", "a", vec![1.0, 0.0, 0.0])]).await.unwrap_err();

    assert!(matches!(err, RagError::InvalidInput(_)), "{err:?}");
    assert!(!err.is_transient());
    assert!(err.to_string().contains("does not match"));

    handle.abort();
}

#[tokio::test]
async fn unreachable_server_is_unavailable() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.expect("bind test listener");
    let addr = listener.local_addr().expect("listener addr");
    drop(listener);

    let store = ChromaVectorStore::with_url(format!("http://{addr}")).unwrap();
    let err = store.heartbeat().await.unwrap_err();

    assert!(matches!(err, RagError::VectorStoreUnavailable { .. }), "{err:?}");
    assert!(err.is_transient());
}

#[tokio::test]
async fn service_answers_from_a_chroma_collection() {
    let (base, handle) = spawn_chroma(FakeChroma::default()).await;
    let store = Arc::new(ChromaVectorStore::with_url(&base).unwrap());
    let service = service_over(
        store,
        config().build().unwrap(),
        embedding(),
        llm("The sky is blue [1]."),
    )
    .await;

    let docs = [
        Document::new("doc1", "The sky is blue."),
        Document::new("doc2", "Paris is the capital of France."),
    ];
    let reports = service.ingest_documents(&docs).await.unwrap();
    assert!(reports.iter().all(|r| r.created == 1 && r.is_complete()));

    let again = service.ingest_document(&docs[0]).await.unwrap();
    assert!(again.is_noop());
    assert_eq!(again.unchanged, 1);

    let answer = service.answer_query("The sky is blue.", QueryOptions::default()).await.unwrap();
    assert_eq!(answer.grounding, Grounding::Grounded);
    assert_eq!(answer.citations[0].document_id, "doc1");

    handle.abort();
}
