//! # RAG Basic Example
//!
//! Demonstrates the core RAG flow: ingest documents, answer questions with
//! citations, and re-ingest without re-embedding unchanged chunks.
//!
//! Uses `InMemoryVectorStore`, a deterministic `HashEmbedding` and an
//! `ExtractiveModel` so it runs with **zero API keys**.
//!
//! Run: `cargo run -p ragkit-demos --example rag_basic`

use std::sync::Arc;

use ragkit::mock::HashEmbedding;
use ragkit::{Document, InMemoryVectorStore, MetadataFilter, QueryOptions, RagConfig, RagService};
use ragkit_demos::ExtractiveModel;

fn documents() -> Vec<Document> {
    vec![
        Document::new("doc1", "The sky is blue. Water boils at 100°C.")
            .with_title("Everyday physics")
            .with_metadata("topic", "science"),
        Document::new(
            "doc2",
            "Rust is a systems programming language focused on safety, speed, \
             and concurrency. It achieves memory safety without a garbage collector \
             through its ownership system.",
        )
        .with_title("About Rust")
        .with_uri("https://www.rust-lang.org")
        .with_metadata("topic", "programming"),
        Document::new(
            "doc3",
            "Retrieval-Augmented Generation combines a retrieval system with a \
             language model. Documents are chunked, embedded, and stored in a vector \
             database. At query time the most relevant chunks are retrieved and given \
             to the model as context.",
        )
        .with_title("RAG in one paragraph")
        .with_metadata("topic", "programming"),
    ]
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    ragkit_telemetry::init_telemetry("rag_basic")?;

    // -- 1. Configure -----------------------------------------------------
    // Small chunks keep the demo readable; 64-dimensional hash embeddings.
    let config = RagConfig::builder()
        .collection("knowledge_base")
        .chunk_size(200)
        .chunk_overlap(40)
        .top_k(3)
        .similarity_threshold(0.05)
        .embedding_model("hash-embedding-v1", 64)
        .build()?;

    // -- 2. Wire the service ----------------------------------------------
    let service = RagService::builder()
        .config(config)
        .embedding_provider(Arc::new(HashEmbedding::new(64)))
        .vector_store(Arc::new(InMemoryVectorStore::new()))
        .language_model(Arc::new(ExtractiveModel))
        .build()?;
    service.initialize().await?;

    // -- 3. Ingest --------------------------------------------------------
    let docs = documents();
    println!("Ingesting {} documents...", docs.len());
    for report in service.ingest_documents(&docs).await? {
        println!(
            "  {} → created={} updated={} deleted={} unchanged={}",
            report.document_id, report.created, report.updated, report.deleted, report.unchanged
        );
    }

    // -- 4. Ask questions -------------------------------------------------
    let questions = [
        ("What colour is the sky?", QueryOptions::default()),
        ("How does Rust achieve memory safety?", QueryOptions::default().top_k(2)),
        (
            "What is stored in a vector database?",
            QueryOptions::default().filter(MetadataFilter::new().eq("topic", "programming")),
        ),
        ("Who won the 1998 world cup?", QueryOptions::default()),
    ];

    for (question, options) in questions {
        println!("\nQ: {question}");
        let answer = service.answer_query(question, options).await?;
        println!("A: {} ({:?})", answer.text, answer.grounding);
        for citation in &answer.citations {
            println!(
                "   [{}] {} ({})",
                citation.marker,
                citation.title.as_deref().unwrap_or(&citation.document_id),
                citation.chunk_id
            );
        }
    }

    // -- 5. Re-ingest: unchanged chunks are skipped -----------------------
    let report = service.ingest_document(&docs[0]).await?;
    println!("\nRe-ingested {}: no-op = {}", report.document_id, report.is_noop());

    let edited = Document::new("doc1", "The sky is blue.").with_title("Everyday physics");
    let report = service.ingest_document(&edited).await?;
    println!(
        "Edited {} → updated={} deleted={} unchanged={}",
        report.document_id, report.updated, report.deleted, report.unchanged
    );

    println!("\nDone.");
    Ok(())
}
