//! # RAG HR Policy Assistant on Gemini
//!
//! Answers employee questions about company policies with Gemini embeddings
//! and generation. A `KeywordBoostReranker` nudges chunks that share words
//! with the question ahead of purely semantic matches. Extra `.txt` or `.md`
//! files given on the command line are ingested alongside the built-in
//! policies.
//!
//! Requires: `GOOGLE_API_KEY` environment variable. Settings are read from
//! `ragkit.toml` (if present) and `RAGKIT_*` environment variables.
//!
//! Run: `cargo run -p ragkit-demos --example rag_gemini --features gemini -- [FILES...]`

use std::path::Path;
use std::sync::Arc;

use ragkit::{
    Document, GeminiEmbeddingProvider, GeminiModel, InMemoryVectorStore, KeywordBoostReranker,
    QueryOptions, RagConfig, RagService,
};

fn policy_documents() -> Vec<Document> {
    vec![
        Document::new(
            "pto_policy",
            "Full-time employees accrue 20 days of PTO per year, prorated for the first \
             year of employment. Submit PTO requests through the HR portal at least 5 \
             business days in advance. Up to 5 unused PTO days carry over to the next \
             calendar year; days beyond the carryover limit expire on December 31.",
        )
        .with_title("Paid Time Off Policy")
        .with_uri("policies/pto.md")
        .with_metadata("policy", "pto"),
        Document::new(
            "remote_work",
            "Employees who have completed their 90-day probation period are eligible for \
             remote work. The company operates a hybrid model: employees are expected in \
             the office Tuesday through Thursday. The company provides a laptop, monitor \
             and a $500 home office stipend for remote-eligible employees.",
        )
        .with_title("Remote Work Policy")
        .with_uri("policies/remote_work.md")
        .with_metadata("policy", "remote_work"),
        Document::new(
            "expense_policy",
            "Submit expense reports within 30 days of the expense. Attach original \
             receipts for all expenses over $25. Meals are reimbursed up to $75 per person \
             for client dinners and $25 per person for team lunches. Hotels are covered \
             up to $250 per night in standard markets.",
        )
        .with_title("Expense Reimbursement Policy")
        .with_uri("policies/expenses.md")
        .with_metadata("policy", "expenses"),
    ]
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    ragkit_telemetry::init_telemetry("rag_gemini")?;

    let config = RagConfig::load(Some(Path::new("ragkit.toml")))?;

    let service = RagService::builder()
        .embedding_provider(Arc::new(GeminiEmbeddingProvider::from_env(&config.embedding)?))
        .language_model(Arc::new(GeminiModel::from_env(&config.generation)?))
        .vector_store(Arc::new(InMemoryVectorStore::new()))
        .reranker(Arc::new(KeywordBoostReranker::new(0.05)))
        .config(config)
        .build()?;
    service.initialize().await?;

    let documents = policy_documents();
    println!("Ingesting {} policy documents...", documents.len());
    for report in service.ingest_documents(&documents).await? {
        println!("  {} → {} chunk(s) created", report.document_id, report.created);
    }

    for path in std::env::args().skip(1) {
        match service.ingest_file(&path).await {
            Ok(report) => println!("  {path} → {} chunk(s) created", report.created),
            Err(e) => eprintln!("  skipping {path}: {e}"),
        }
    }

    let questions = [
        "How many PTO days can I carry over?",
        "Which days do I need to be in the office?",
        "What is the limit for a team lunch?",
        "What is the parental leave policy?",
    ];

    for question in questions {
        println!("\nQ: {question}");
        let answer = service.answer_query(question, QueryOptions::default()).await?;
        println!("A: {}", answer.text);
        for citation in &answer.citations {
            println!(
                "   [{}] {} {}",
                citation.marker,
                citation.title.as_deref().unwrap_or(&citation.document_id),
                citation.uri.as_deref().unwrap_or_default()
            );
        }
    }

    Ok(())
}
