//! # RAG over ChromaDB
//!
//! Ingests a small corpus into a ChromaDB collection, answers questions with
//! citations, then edits and removes documents to show incremental
//! re-ingestion against a persistent store.
//!
//! Uses a deterministic `HashEmbedding` and an `ExtractiveModel`, so only a
//! running Chroma server is needed:
//!
//! ```text
//! docker run -p 8000:8000 chromadb/chroma:0.4.24
//! ```
//!
//! Requires: `CHROMA_HOST` / `CHROMA_PORT` (defaults `localhost:8000`).
//!
//! Run: `cargo run -p ragkit-demos --example rag_chroma --features chroma`

use std::sync::Arc;

use ragkit::mock::HashEmbedding;
use ragkit::{ChromaVectorStore, Document, QueryOptions, RagConfig, RagService};
use ragkit_demos::ExtractiveModel;

const COLLECTION: &str = "ragkit_chroma_demo";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    ragkit_telemetry::init_telemetry("rag_chroma")?;

    let store = Arc::new(ChromaVectorStore::from_env()?);
    store.heartbeat().await?;
    println!("Connected to Chroma.");

    let config = RagConfig::builder()
        .collection(COLLECTION)
        .chunk_size(160)
        .chunk_overlap(30)
        .top_k(2)
        .similarity_threshold(0.05)
        .embedding_model("hash-embedding-v1", 64)
        .build()?;

    let service = RagService::builder()
        .config(config)
        .embedding_provider(Arc::new(HashEmbedding::new(64)))
        .vector_store(store)
        .language_model(Arc::new(ExtractiveModel))
        .build()?;
    service.initialize().await?;

    let docs = [
        Document::new(
            "onboarding",
            "New hires receive a laptop on their first day. Accounts for email and chat \
             are created by IT before the start date.",
        )
        .with_title("Onboarding checklist"),
        Document::new(
            "expenses",
            "Travel expenses must be submitted within 30 days with receipts attached. \
             Meals are reimbursed up to $60 per day.",
        )
        .with_title("Expense policy"),
    ];

    // Running the demo twice shows unchanged chunks being skipped.
    for report in service.ingest_documents(&docs).await? {
        println!(
            "{} → created={} updated={} unchanged={}",
            report.document_id, report.created, report.updated, report.unchanged
        );
    }

    for question in ["When do new hires get a laptop?", "How much is reimbursed for meals?"] {
        let answer = service.answer_query(question, QueryOptions::default()).await?;
        println!("\nQ: {question}\nA: {}", answer.text);
        for citation in &answer.citations {
            println!("   [{}] {}", citation.marker, citation.title.as_deref().unwrap_or(&citation.document_id));
        }
    }

    let shorter = Document::new("expenses", "Meals are reimbursed up to $75 per day.")
        .with_title("Expense policy");
    let report = service.ingest_document(&shorter).await?;
    println!(
        "\nEdited {} → updated={} deleted={} unchanged={}",
        report.document_id, report.updated, report.deleted, report.unchanged
    );

    Ok(())
}
