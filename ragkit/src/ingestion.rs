//! Document ingestion: chunk, diff against the store, embed, upsert, prune.
//!
//! Ingestion is not atomic. A failing batch is recorded per chunk in the
//! [`IngestionReport`] and the remaining batches still run, unless the error
//! is fatal ([`RagError::is_fatal`]), which aborts the document. Because every
//! write is an idempotent upsert or delete keyed by chunk ID, re-running the
//! same document converges to the intended state.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tracing::{debug, error, info, warn};

use crate::chunking::Chunker;
use crate::document::{
    Chunk, ChunkOperation, Document, FailedChunk, IngestionReport, StoredRecord, VectorRecord,
    keys,
};
use crate::embedding::Embedder;
use crate::error::{RagError, Result};
use crate::retry::{RetryPolicy, with_retry};
use crate::vectorstore::VectorStoreClient;

/// Writes documents into the configured collection.
///
/// Owns the write path: nothing else upserts or deletes records.
pub struct IngestionPipeline {
    embedder: Arc<Embedder>,
    store: VectorStoreClient,
    chunker: Arc<dyn Chunker>,
    write_retry: RetryPolicy,
}

/// A chunk that has to be (re)written, and whether a previous version existed.
struct PendingChunk {
    chunk: Chunk,
    replaces: bool,
}

impl IngestionPipeline {
    /// Create a pipeline writing through `store`.
    pub fn new(
        embedder: Arc<Embedder>,
        store: VectorStoreClient,
        chunker: Arc<dyn Chunker>,
        write_retry: RetryPolicy,
    ) -> Self {
        Self { embedder, store, chunker, write_retry }
    }

    /// Ingest (or re-ingest) one document.
    ///
    /// Chunks whose index, content hash and embedding model match what is
    /// already stored are skipped; changed and new chunks are embedded and
    /// upserted in batches of the embedder's `max_batch_size`; records for
    /// chunk indices that no longer exist are deleted.
    ///
    /// # Errors
    ///
    /// [`RagError::InvalidInput`] for an empty document ID. If the existing
    /// records cannot be read the document is aborted before anything is
    /// written. A fatal error such as a vector dimension mismatch aborts the
    /// document where it occurs. Every other failure is reported per chunk.
    pub async fn ingest(&self, document: &Document) -> Result<IngestionReport> {
        if document.id.trim().is_empty() {
            return Err(RagError::InvalidInput("document id must not be empty".to_string()));
        }

        let mut report = IngestionReport::new(document.id.clone());
        let chunks = self.chunker.chunk(document);
        let existing = self.existing_records(&document.id).await?;

        let model_id = self.embedder.model_id().to_string();
        let mut pending = Vec::new();
        for mut chunk in chunks.iter().cloned() {
            chunk.metadata.insert(keys::EMBEDDING_MODEL.to_string(), model_id.clone());
            match existing.get(&chunk.id) {
                Some(stored)
                    if stored.content_hash() == Some(chunk.content_hash.as_str())
                        && stored.embedding_model() == Some(model_id.as_str()) =>
                {
                    report.unchanged += 1;
                }
                Some(_) => pending.push(PendingChunk { chunk, replaces: true }),
                None => pending.push(PendingChunk { chunk, replaces: false }),
            }
        }

        for batch in pending.chunks(self.embedder.max_batch_size()) {
            self.write_batch(batch, &mut report).await?;
        }

        let current: HashSet<&str> = chunks.iter().map(|c| c.id.as_str()).collect();
        let stale: Vec<&StoredRecord> =
            existing.values().filter(|r| !current.contains(r.id.as_str())).collect();
        if !stale.is_empty() {
            self.delete_stale(&stale, &mut report).await?;
        }

        if report.is_complete() {
            info!(
                document.id = %document.id,
                chunk_count = chunks.len(),
                created = report.created,
                updated = report.updated,
                deleted = report.deleted,
                unchanged = report.unchanged,
                "ingested document"
            );
        } else {
            warn!(
                document.id = %document.id,
                chunk_count = chunks.len(),
                failed = report.failed_count(),
                "ingested document with failures"
            );
        }
        Ok(report)
    }

    /// Ingest several documents in order, one report per document.
    ///
    /// # Errors
    ///
    /// Stops at the first document that cannot be ingested at all (see
    /// [`ingest`](Self::ingest)); per-chunk failures stay in the reports.
    pub async fn ingest_batch(&self, documents: &[Document]) -> Result<Vec<IngestionReport>> {
        let mut reports = Vec::with_capacity(documents.len());
        for document in documents {
            reports.push(self.ingest(document).await?);
        }
        Ok(reports)
    }

    async fn existing_records(&self, document_id: &str) -> Result<HashMap<String, StoredRecord>> {
        let collection = self.store.collection();
        let records = with_retry(&self.write_retry, "records_for_document", || {
            self.store.records_for_document(collection, document_id)
        })
        .await
        .inspect_err(|e| {
            error!(document.id = %document_id, error = %e, "failed to read existing records")
        })?;
        Ok(records.into_iter().map(|r| (r.id.clone(), r)).collect())
    }

    async fn write_batch(&self, batch: &[PendingChunk], report: &mut IngestionReport) -> Result<()> {
        let texts: Vec<&str> = batch.iter().map(|p| p.chunk.text.as_str()).collect();
        let vectors = match self.embedder.embed(&texts).await {
            Ok(vectors) => vectors,
            Err(e) if e.is_fatal() => {
                error!(document.id = %report.document_id, error = %e, "aborting ingestion");
                return Err(e);
            }
            Err(e) => {
                error!(document.id = %report.document_id, batch_size = batch.len(), error = %e, "embedding failed during ingestion");
                record_failures(report, batch.iter().map(|p| p.chunk.index), ChunkOperation::Embed, &e);
                return Ok(());
            }
        };

        let collection = self.store.collection();
        let records: Vec<VectorRecord> = batch
            .iter()
            .zip(vectors)
            .map(|(p, vector)| VectorRecord::from_chunk(collection, &p.chunk, vector))
            .collect();

        let upserted =
            with_retry(&self.write_retry, "upsert", || self.store.upsert(collection, &records))
                .await;
        match upserted {
            Ok(()) => {
                let replaced = batch.iter().filter(|p| p.replaces).count();
                report.updated += replaced;
                report.created += batch.len() - replaced;
                debug!(document.id = %report.document_id, batch_size = batch.len(), "upserted batch");
            }
            Err(e) if e.is_fatal() => {
                error!(document.id = %report.document_id, error = %e, "aborting ingestion");
                return Err(e);
            }
            Err(e) => {
                error!(document.id = %report.document_id, batch_size = batch.len(), error = %e, "upsert failed during ingestion");
                record_failures(report, batch.iter().map(|p| p.chunk.index), ChunkOperation::Upsert, &e);
            }
        }
        Ok(())
    }

    async fn delete_stale(&self, stale: &[&StoredRecord], report: &mut IngestionReport) -> Result<()> {
        let collection = self.store.collection();
        let ids: Vec<&str> = stale.iter().map(|r| r.id.as_str()).collect();
        let deleted =
            with_retry(&self.write_retry, "delete", || self.store.delete(collection, &ids)).await;
        match deleted {
            Ok(()) => report.deleted += stale.len(),
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => {
                error!(document.id = %report.document_id, stale = stale.len(), error = %e, "failed to delete stale chunks");
                let indices = stale.iter().map(|r| r.chunk_index().unwrap_or_default());
                record_failures(report, indices, ChunkOperation::Delete, &e);
            }
        }
        Ok(())
    }
}

fn record_failures(
    report: &mut IngestionReport,
    indices: impl Iterator<Item = usize>,
    operation: ChunkOperation,
    error: &RagError,
) {
    let reason = error.to_string();
    report.failed.extend(indices.map(|chunk_index| FailedChunk {
        chunk_index,
        operation,
        reason: reason.clone(),
    }));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunking::FixedSizeChunker;
    use crate::config::{EmbeddingSettings, VectorStoreSettings};
    use crate::inmemory::InMemoryVectorStore;
    use crate::mock::HashEmbedding;

    async fn pipeline(chunk_size: usize, overlap: usize) -> (IngestionPipeline, Arc<InMemoryVectorStore>) {
        let store = Arc::new(InMemoryVectorStore::new());
        let client = VectorStoreClient::new(store.clone(), "docs", &VectorStoreSettings::default());
        client.ensure_collection(32).await.unwrap();
        let settings = EmbeddingSettings { dimensions: 32, max_batch_size: 2, ..Default::default() };
        let embedder = Arc::new(Embedder::new(Arc::new(HashEmbedding::new(32)), settings).unwrap());
        let pipeline = IngestionPipeline::new(
            embedder,
            client,
            Arc::new(FixedSizeChunker::new(chunk_size, overlap)),
            RetryPolicy::no_retry(),
        );
        (pipeline, store)
    }

    #[tokio::test]
    async fn first_ingest_creates_every_chunk() {
        let (pipeline, store) = pipeline(10, 2).await;
        let doc = Document::new("doc", "alpha beta gamma delta epsilon");

        let report = pipeline.ingest(&doc).await.unwrap();

        assert_eq!(report.created, 4);
        assert_eq!((report.updated, report.deleted, report.unchanged), (0, 0, 0));
        assert!(report.is_complete());
        assert_eq!(store.len("docs").await, 4);
    }

    #[tokio::test]
    async fn reingesting_unchanged_document_is_a_noop() {
        let (pipeline, _) = pipeline(10, 2).await;
        let doc = Document::new("doc", "alpha beta gamma delta epsilon");
        pipeline.ingest(&doc).await.unwrap();

        let report = pipeline.ingest(&doc).await.unwrap();

        assert!(report.is_noop());
        assert_eq!(report.unchanged, 4);
    }

    #[tokio::test]
    async fn shrinking_document_updates_and_prunes() {
        let (pipeline, store) = pipeline(10, 2).await;
        pipeline.ingest(&Document::new("doc", "alpha beta gamma delta epsilon")).await.unwrap();

        let report = pipeline.ingest(&Document::new("doc", "alpha beta zeta")).await.unwrap();

        assert_eq!(report.unchanged, 1);
        assert_eq!(report.updated, 1);
        assert_eq!(report.deleted, 2);
        assert_eq!(store.len("docs").await, 2);
    }

    #[tokio::test]
    async fn empty_document_removes_previous_chunks() {
        let (pipeline, store) = pipeline(10, 2).await;
        pipeline.ingest(&Document::new("doc", "alpha beta gamma")).await.unwrap();

        let report = pipeline.ingest(&Document::new("doc", "   ")).await.unwrap();

        assert_eq!(report.deleted, 2);
        assert_eq!(store.len("docs").await, 0);
    }

    #[tokio::test]
    async fn blank_id_is_rejected() {
        let (pipeline, _) = pipeline(10, 2).await;
        assert!(matches!(
            pipeline.ingest(&Document::new(" ", "text")).await,
            Err(RagError::InvalidInput(_))
        ));
    }

    #[tokio::test]
    async fn missing_collection_aborts_before_writing() {
        let store = Arc::new(InMemoryVectorStore::new());
        let client = VectorStoreClient::new(store.clone(), "docs", &VectorStoreSettings::default());
        let settings = EmbeddingSettings { dimensions: 32, ..Default::default() };
        let embedder = Arc::new(Embedder::new(Arc::new(HashEmbedding::new(32)), settings).unwrap());
        let pipeline = IngestionPipeline::new(
            embedder,
            client,
            Arc::new(FixedSizeChunker::new(10, 2)),
            RetryPolicy::no_retry(),
        );

        let err = pipeline.ingest(&Document::new("doc", "alpha")).await.unwrap_err();
        assert!(matches!(err, RagError::InvalidCollection { .. }));
    }

    /// Claims 8 dimensions but returns 3-element vectors.
    struct WrongDimension {
        calls: std::sync::atomic::AtomicUsize,
    }

    #[async_trait::async_trait]
    impl crate::embedding::EmbeddingProvider for WrongDimension {
        async fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
            self.calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            Ok(texts.iter().map(|_| vec![1.0, 0.0, 0.0]).collect())
        }

        fn dimensions(&self) -> usize {
            8
        }

        fn model_id(&self) -> &str {
            "wrong-dimension"
        }
    }

    #[tokio::test]
    async fn dimension_mismatch_aborts_the_document() {
        let store = Arc::new(InMemoryVectorStore::new());
        let client = VectorStoreClient::new(store.clone(), "docs", &VectorStoreSettings::default());
        client.ensure_collection(8).await.unwrap();
        let provider = Arc::new(WrongDimension { calls: Default::default() });
        let settings = EmbeddingSettings { dimensions: 8, max_batch_size: 1, ..Default::default() };
        let pipeline = IngestionPipeline::new(
            Arc::new(Embedder::new(provider.clone(), settings).unwrap()),
            client,
            Arc::new(FixedSizeChunker::new(10, 2)),
            RetryPolicy::no_retry(),
        );

        let err = pipeline.ingest(&Document::new("doc", "alpha beta gamma delta epsilon")).await.unwrap_err();

        assert!(matches!(err, RagError::Configuration(_)));
        assert_eq!(provider.calls.load(std::sync::atomic::Ordering::SeqCst), 1);
        assert_eq!(store.len("docs").await, 0);
    }
}
