//! Shared setup for the integration tests.

#![allow(dead_code)]

use std::sync::Arc;

use ragkit::mock::{HashEmbedding, ScriptedLlm};
use ragkit::{InMemoryVectorStore, RagConfig, RagService, VectorStore};

pub const DIM: usize = 64;

/// A fresh 64-dimensional hash embedding.
pub fn embedding() -> Arc<HashEmbedding> {
    Arc::new(HashEmbedding::new(DIM))
}

/// A model that always answers `reply`.
pub fn llm(reply: &str) -> Arc<ScriptedLlm> {
    Arc::new(ScriptedLlm::replying(reply))
}

/// Default test configuration: 64-dimensional hash embeddings.
pub fn config() -> ragkit::RagConfigBuilder {
    RagConfig::builder().collection("test_docs").embedding_model("hash-embedding-v1", DIM)
}

/// An initialized service over `store`.
pub async fn service_over(
    store: Arc<dyn VectorStore>,
    config: RagConfig,
    embedding: Arc<HashEmbedding>,
    llm: Arc<ScriptedLlm>,
) -> RagService {
    let service = RagService::builder()
        .config(config)
        .embedding_provider(embedding)
        .vector_store(store)
        .language_model(llm)
        .build()
        .unwrap();
    service.initialize().await.unwrap();
    service
}

/// An initialized service over a fresh in-memory store.
pub async fn service(
    config: RagConfig,
    embedding: Arc<HashEmbedding>,
    llm: Arc<ScriptedLlm>,
) -> (RagService, Arc<InMemoryVectorStore>) {
    let store = Arc::new(InMemoryVectorStore::new());
    let service = service_over(store.clone(), config, embedding, llm).await;
    (service, store)
}
