//! # ragkit
//!
//! Retrieval-augmented generation over a private document collection:
//! documents are chunked, embedded and stored in a vector database; questions
//! are answered by retrieving the closest chunks, assembling them into a
//! bounded context and asking a language model for a cited answer.
//!
//! ## Components
//!
//! - [`Embedder`]: batching, deadlines and retries around an [`EmbeddingProvider`]
//! - [`VectorStoreClient`]: a [`VectorStore`] bound to one collection
//! - [`IngestionPipeline`]: idempotent chunk, embed, upsert and prune
//! - [`Retriever`]: query embedding, similarity search, optional [`Reranker`]
//! - [`ContextAssembler`]: budgeted, de-duplicated context selection
//! - [`GenerationOrchestrator`]: prompt, [`LanguageModel`] call, citations
//! - [`RagService`]: the facade tying them together
//!
//! ## Features
//!
//! | Feature  | Enables                                         |
//! |----------|-------------------------------------------------|
//! | `gemini` | Gemini embedding and generation over HTTP       |
//! | `chroma` | ChromaDB vector store over its HTTP API         |
//! | `qdrant` | Qdrant vector store via `qdrant-client`         |
//! | `pdf`    | PDF text extraction via `pdf-extract`           |
//! | `office` | DOCX and XLSX text extraction                   |
//! | `full`   | everything above                                |
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use ragkit::{Document, InMemoryVectorStore, QueryOptions, RagConfig, RagService};
//!
//! let service = RagService::builder()
//!     .config(RagConfig::load(Some("ragkit.toml".as_ref()))?)
//!     .embedding_provider(Arc::new(embedder))
//!     .vector_store(Arc::new(InMemoryVectorStore::new()))
//!     .language_model(Arc::new(llm))
//!     .build()?;
//! service.initialize().await?;
//!
//! service.ingest_document(&Document::new("doc1", "The sky is blue.")).await?;
//! let answer = service.answer_query("What colour is the sky?", QueryOptions::default()).await?;
//! ```

pub mod chunking;
pub mod config;
pub mod context;
pub mod document;
pub mod embedding;
pub mod error;
pub mod extract;
pub mod generation;
pub mod inmemory;
pub mod ingestion;
pub mod llm;
pub mod mock;
pub mod reranker;
pub mod retriever;
pub mod retry;
pub mod service;
pub mod vectorstore;

#[cfg(feature = "chroma")]
pub mod chroma;
#[cfg(feature = "gemini")]
pub mod gemini;
#[cfg(feature = "qdrant")]
pub mod qdrant;

pub use chunking::{Chunker, FixedSizeChunker, content_hash};
pub use config::{
    EmbeddingSettings, GenerationSettings, NoContextPolicy, RagConfig, RagConfigBuilder,
    VectorStoreSettings,
};
pub use context::{ContextAssembler, word_overlap};
pub use document::{
    Answer, AssembledContext, Chunk, ChunkOperation, Citation, Document, DocumentSource,
    FailedChunk, Grounding, IngestionReport, RetrievalResult, ScoredChunk, ScoredRecord,
    StoredRecord, VectorRecord,
};
pub use embedding::{Embedder, EmbeddingProvider};
pub use error::{RagError, Result, ServiceErrorKind};
pub use extract::{FileFormat, document_from_file, extract_text};
pub use generation::GenerationOrchestrator;
pub use inmemory::InMemoryVectorStore;
pub use ingestion::IngestionPipeline;
pub use llm::{GenerationRequest, LanguageModel};
pub use reranker::{KeywordBoostReranker, NoOpReranker, Reranker};
pub use retriever::Retriever;
pub use retry::{RetryPolicy, with_retry};
pub use service::{QueryOptions, RagService, RagServiceBuilder};
pub use vectorstore::{MetadataFilter, VectorStore, VectorStoreClient};

pub use tokio_util::sync::CancellationToken;

#[cfg(feature = "chroma")]
pub use chroma::ChromaVectorStore;
#[cfg(feature = "gemini")]
pub use gemini::{GeminiEmbeddingProvider, GeminiModel};
#[cfg(feature = "qdrant")]
pub use qdrant::QdrantVectorStore;
