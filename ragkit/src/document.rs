//! Data types for documents, chunks, stored records, retrieval results and answers.

use std::cmp::Ordering;
use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Metadata keys written by the ingestion pipeline on every record.
pub mod keys {
    /// ID of the parent document.
    pub const DOCUMENT_ID: &str = "document_id";
    /// Zero-based position of the chunk within its document.
    pub const CHUNK_INDEX: &str = "chunk_index";
    /// SHA-256 of the chunk text, hex encoded.
    pub const CONTENT_HASH: &str = "content_hash";
    /// Character offset where the chunk starts.
    pub const CHUNK_START: &str = "chunk_start";
    /// Character offset where the chunk ends (exclusive).
    pub const CHUNK_END: &str = "chunk_end";
    /// Identifier of the embedding model that produced the vector.
    pub const EMBEDDING_MODEL: &str = "embedding_model";
    /// Origin label; `"unknown"` when the document carried no metadata.
    pub const SOURCE: &str = "source";
    /// Document title.
    pub const TITLE: &str = "title";
    /// Document URI.
    pub const URI: &str = "uri";
    /// Document timestamp, RFC 3339.
    pub const TIMESTAMP: &str = "timestamp";
}

/// Where a document came from.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct DocumentSource {
    /// Human-readable title.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    /// URI pointing to the original source.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uri: Option<String>,
    /// When the source was created or last modified.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
}

impl DocumentSource {
    fn is_empty(&self) -> bool {
        self.title.is_none() && self.uri.is_none() && self.timestamp.is_none()
    }
}

/// A source document containing text content and metadata.
///
/// The `id` is the stable external identity: ingesting a document with an
/// existing ID replaces the previous version.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Document {
    /// Stable identifier for the document.
    pub id: String,
    /// The text content of the document.
    pub text: String,
    /// Title, URI and timestamp of the source.
    #[serde(default)]
    pub source: DocumentSource,
    /// Additional key-value metadata.
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

impl Document {
    /// Create a document with no source information or metadata.
    pub fn new(id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            text: text.into(),
            source: DocumentSource::default(),
            metadata: HashMap::new(),
        }
    }

    /// Set the document title.
    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.source.title = Some(title.into());
        self
    }

    /// Set the document URI.
    pub fn with_uri(mut self, uri: impl Into<String>) -> Self {
        self.source.uri = Some(uri.into());
        self
    }

    /// Set the document timestamp.
    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.source.timestamp = Some(timestamp);
        self
    }

    /// Add a metadata entry.
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Flatten source information and metadata into a record metadata map.
    ///
    /// Documents without any metadata are labelled `source = "unknown"`.
    pub fn record_metadata(&self) -> HashMap<String, String> {
        let mut metadata = self.metadata.clone();
        if let Some(title) = &self.source.title {
            metadata.insert(keys::TITLE.to_string(), title.clone());
        }
        if let Some(uri) = &self.source.uri {
            metadata.insert(keys::URI.to_string(), uri.clone());
        }
        if let Some(timestamp) = &self.source.timestamp {
            metadata.insert(keys::TIMESTAMP.to_string(), timestamp.to_rfc3339());
        }
        if self.metadata.is_empty() && self.source.is_empty() {
            metadata.insert(keys::SOURCE.to_string(), "unknown".to_string());
        }
        metadata.insert(keys::DOCUMENT_ID.to_string(), self.id.clone());
        metadata
    }
}

/// A contiguous span of a [`Document`]'s text; the unit of embedding and retrieval.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Chunk {
    /// Unique identifier, `{document_id}_{index}`.
    pub id: String,
    /// The ID of the parent [`Document`].
    pub document_id: String,
    /// Zero-based position within the parent document.
    pub index: usize,
    /// The text content of the chunk.
    pub text: String,
    /// Character offset of the first character in the parent text.
    pub start: usize,
    /// Character offset one past the last character in the parent text.
    pub end: usize,
    /// SHA-256 of `text`, hex encoded.
    pub content_hash: String,
    /// Metadata inherited from the parent document plus chunk fields.
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

impl Chunk {
    /// Build the chunk ID used for a document's `index`-th chunk.
    pub fn make_id(document_id: &str, index: usize) -> String {
        format!("{document_id}_{index}")
    }

    /// Title of the parent document, if recorded.
    pub fn title(&self) -> Option<&str> {
        self.metadata.get(keys::TITLE).map(String::as_str)
    }

    /// URI of the parent document, if recorded.
    pub fn uri(&self) -> Option<&str> {
        self.metadata.get(keys::URI).map(String::as_str)
    }

    /// Number of characters in the chunk text.
    pub fn char_len(&self) -> usize {
        self.text.chars().count()
    }

    /// Rebuild a chunk from a stored record.
    pub fn from_record(id: String, text: String, metadata: HashMap<String, String>) -> Self {
        let number = |key: &str| metadata.get(key).and_then(|v| v.parse::<usize>().ok());
        Self {
            document_id: metadata.get(keys::DOCUMENT_ID).cloned().unwrap_or_default(),
            index: number(keys::CHUNK_INDEX).unwrap_or_default(),
            start: number(keys::CHUNK_START).unwrap_or_default(),
            end: number(keys::CHUNK_END).unwrap_or_default(),
            content_hash: metadata.get(keys::CONTENT_HASH).cloned().unwrap_or_default(),
            id,
            text,
            metadata,
        }
    }
}

/// A record as persisted in a vector store collection.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct VectorRecord {
    /// Chunk ID.
    pub id: String,
    /// Collection the record belongs to.
    pub collection: String,
    /// The embedding vector.
    pub vector: Vec<f32>,
    /// Chunk text.
    pub text: String,
    /// Flat string metadata.
    pub metadata: HashMap<String, String>,
}

impl VectorRecord {
    /// Build the record for `chunk` in `collection`.
    pub fn from_chunk(collection: &str, chunk: &Chunk, vector: Vec<f32>) -> Self {
        Self {
            id: chunk.id.clone(),
            collection: collection.to_string(),
            vector,
            text: chunk.text.clone(),
            metadata: chunk.metadata.clone(),
        }
    }
}

/// A stored record returned by a similarity query.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScoredRecord {
    /// Record ID.
    pub id: String,
    /// Similarity score (higher is more similar).
    pub score: f32,
    /// Record text.
    pub text: String,
    /// Record metadata.
    pub metadata: HashMap<String, String>,
}

/// A stored record's identity and metadata, without its vector.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StoredRecord {
    /// Record ID.
    pub id: String,
    /// Record metadata.
    pub metadata: HashMap<String, String>,
}

impl StoredRecord {
    /// The chunk index recorded in metadata, if present and valid.
    pub fn chunk_index(&self) -> Option<usize> {
        self.metadata.get(keys::CHUNK_INDEX).and_then(|v| v.parse().ok())
    }

    /// The content hash recorded in metadata.
    pub fn content_hash(&self) -> Option<&str> {
        self.metadata.get(keys::CONTENT_HASH).map(String::as_str)
    }

    /// The embedding model recorded in metadata.
    pub fn embedding_model(&self) -> Option<&str> {
        self.metadata.get(keys::EMBEDDING_MODEL).map(String::as_str)
    }
}

/// A retrieved [`Chunk`] paired with a relevance score.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoredChunk {
    /// The retrieved chunk.
    pub chunk: Chunk,
    /// The similarity score (higher is more relevant).
    pub score: f32,
}

impl From<ScoredRecord> for ScoredChunk {
    fn from(record: ScoredRecord) -> Self {
        Self { chunk: Chunk::from_record(record.id, record.text, record.metadata), score: record.score }
    }
}

/// Retrieval order over `(score, id)` pairs: descending score, then
/// ascending ID. NaN scores rank below every number.
pub(crate) fn by_relevance(a: (f32, &str), b: (f32, &str)) -> Ordering {
    let key = |score: f32| if score.is_nan() { f32::NEG_INFINITY } else { score };
    key(b.0).total_cmp(&key(a.0)).then_with(|| a.1.cmp(b.1))
}

/// Ranked output of a retrieval: highest score first, ties by chunk ID ascending.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RetrievalResult {
    /// The ranked chunks.
    pub chunks: Vec<ScoredChunk>,
}

impl RetrievalResult {
    /// Sort `chunks` into retrieval order and wrap them.
    pub fn ranked(mut chunks: Vec<ScoredChunk>) -> Self {
        chunks.sort_by(|a, b| by_relevance((a.score, &a.chunk.id), (b.score, &b.chunk.id)));
        Self { chunks }
    }

    /// Number of retrieved chunks.
    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    /// Whether nothing was retrieved.
    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }
}

/// Chunks selected for the prompt, in selection order.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AssembledContext {
    /// The selected chunks.
    pub chunks: Vec<ScoredChunk>,
}

impl AssembledContext {
    /// Total size in characters of the selected chunk texts.
    pub fn size(&self) -> usize {
        self.chunks.iter().map(|c| c.chunk.char_len()).sum()
    }

    /// Whether no chunk was selected.
    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    /// Number of selected chunks.
    pub fn len(&self) -> usize {
        self.chunks.len()
    }
}

/// A reference from an answer back to a context chunk.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Citation {
    /// The marker number used in the prompt and answer, e.g. `1` for `[1]`.
    pub marker: usize,
    /// ID of the cited chunk.
    pub chunk_id: String,
    /// ID of the cited chunk's document.
    pub document_id: String,
    /// Title of the cited document, if known.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    /// URI of the cited document, if known.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uri: Option<String>,
}

/// How well an answer is supported by retrieved context.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Grounding {
    /// The model answered from retrieved context.
    Grounded,
    /// No relevant context was found and the fallback message was returned.
    NoContextRefused,
    /// No relevant context was found; the model answered from its own knowledge.
    NoSupportingContext,
}

/// The final answer to a query.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Answer {
    /// The generated (or fallback) text.
    pub text: String,
    /// Citations in order of first appearance in `text`.
    pub citations: Vec<Citation>,
    /// Whether the answer is backed by context.
    pub grounding: Grounding,
    /// Model that produced the answer; empty for refusals.
    pub model: String,
    /// Texts of the chunks handed to the model.
    pub retrieved_context: Vec<String>,
}

impl Answer {
    /// Whether the answer is the context-free fallback or flagged as unsupported.
    pub fn is_fallback(&self) -> bool {
        self.grounding != Grounding::Grounded
    }
}

/// Which write step failed for a chunk.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ChunkOperation {
    /// Computing the chunk's embedding.
    Embed,
    /// Writing the record to the store.
    Upsert,
    /// Removing a stale record from the store.
    Delete,
}

/// A chunk whose ingestion step failed.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FailedChunk {
    /// Index of the chunk in the (new or previous) chunking.
    pub chunk_index: usize,
    /// The step that failed.
    pub operation: ChunkOperation,
    /// The error message.
    pub reason: String,
}

/// Outcome of ingesting one document.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct IngestionReport {
    /// The ingested document.
    pub document_id: String,
    /// Chunks written for indices that did not exist before.
    pub created: usize,
    /// Chunks re-written because their content or embedding model changed.
    pub updated: usize,
    /// Stale chunks removed.
    pub deleted: usize,
    /// Chunks skipped because they were already stored unchanged.
    pub unchanged: usize,
    /// Chunks whose embed, upsert or delete step failed.
    pub failed: Vec<FailedChunk>,
}

impl IngestionReport {
    /// Create an empty report for `document_id`.
    pub fn new(document_id: impl Into<String>) -> Self {
        Self { document_id: document_id.into(), ..Self::default() }
    }

    /// Number of failed chunk operations.
    pub fn failed_count(&self) -> usize {
        self.failed.len()
    }

    /// Whether every chunk reached its intended state.
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }

    /// Whether the ingestion changed nothing in the store.
    pub fn is_noop(&self) -> bool {
        self.created == 0 && self.updated == 0 && self.deleted == 0 && self.failed.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scored(id: &str, score: f32) -> ScoredChunk {
        ScoredChunk {
            chunk: Chunk::from_record(id.to_string(), String::new(), HashMap::new()),
            score,
        }
    }

    #[test]
    fn ranked_orders_by_score_then_id() {
        let result =
            RetrievalResult::ranked(vec![scored("b", 0.5), scored("c", 0.9), scored("a", 0.5)]);
        let ids: Vec<&str> = result.chunks.iter().map(|c| c.chunk.id.as_str()).collect();
        assert_eq!(ids, ["c", "a", "b"]);
    }

    #[test]
    fn nan_scores_rank_last() {
        let result = RetrievalResult::ranked(vec![
            scored("n", f32::NAN),
            scored("b", 0.1),
            scored("m", f32::NAN),
            scored("a", -0.4),
        ]);
        let ids: Vec<&str> = result.chunks.iter().map(|c| c.chunk.id.as_str()).collect();
        assert_eq!(ids, ["b", "a", "m", "n"]);
    }

    #[test]
    fn metadata_defaults_to_unknown_source() {
        let metadata = Document::new("doc", "text").record_metadata();
        assert_eq!(metadata.get(keys::SOURCE).map(String::as_str), Some("unknown"));
        assert_eq!(metadata.get(keys::DOCUMENT_ID).map(String::as_str), Some("doc"));

        let titled = Document::new("doc", "text").with_title("Doc").record_metadata();
        assert!(!titled.contains_key(keys::SOURCE));
        assert_eq!(titled.get(keys::TITLE).map(String::as_str), Some("Doc"));
    }

    #[test]
    fn chunk_round_trips_through_record_metadata() {
        let metadata = HashMap::from([
            (keys::DOCUMENT_ID.to_string(), "doc".to_string()),
            (keys::CHUNK_INDEX.to_string(), "2".to_string()),
            (keys::CHUNK_START.to_string(), "10".to_string()),
            (keys::CHUNK_END.to_string(), "20".to_string()),
            (keys::CONTENT_HASH.to_string(), "abc".to_string()),
        ]);
        let chunk = Chunk::from_record("doc_2".into(), "hello".into(), metadata);
        assert_eq!(chunk.document_id, "doc");
        assert_eq!((chunk.index, chunk.start, chunk.end), (2, 10, 20));
        assert_eq!(chunk.content_hash, "abc");
    }
}
