//! Storage-layer tests against a real pgvector-enabled Postgres.
//!
//! Requires DATABASE_URL with the migrations applied.
//! Run with: cargo test -p evidex-ingestion --test test_storage_db -- --ignored --nocapture

use std::sync::Arc;

use evidex_ingestion::models::{Chunk, EmbeddedChunk, SectionType};
use evidex_ingestion::storage::{connect, Deduper, StorageWriter, StoreOptions};

fn test_chunk(pmid: &str, index: usize) -> EmbeddedChunk {
    let content = format!("Chunk {index} of article {pmid} for storage tests.");
    let content_with_context = format!("[Title: Storage test]\n[Test Journal, 2024]\n\n{content}");
    let token_estimate = content_with_context.len().div_ceil(4);
    EmbeddedChunk {
        chunk: Chunk {
            pmid: pmid.to_string(),
            chunk_index: index,
            content,
            content_with_context,
            section_type: SectionType::Abstract,
            title: "Storage test".to_string(),
            journal: Some("Test Journal".to_string()),
            publication_year: 2024,
            doi: None,
            authors: vec!["Tester T".to_string()],
            evidence_level: 3,
            study_design: None,
            sample_size: Some(10),
            mesh_terms: vec!["Testing".to_string()],
            mesh_major: vec![],
            chemicals: vec![],
            keywords: vec![],
            token_estimate,
        },
        embedding: vec![0.01_f32; 1536],
    }
}

async fn writer() -> Arc<StorageWriter> {
    let url = std::env::var("DATABASE_URL").expect("DATABASE_URL required for this test");
    let pool = connect(&url).await.expect("store connection failed");
    Arc::new(StorageWriter::new(pool, StoreOptions::default()))
}

#[tokio::test]
#[ignore] // Requires a live database
async fn test_upsert_is_idempotent() {
    let writer = writer().await;
    let records: Vec<EmbeddedChunk> = (0..4).map(|i| test_chunk("99900001", i)).collect();

    let first = writer.store(&records).await;
    assert_eq!(first.stored, 4);
    assert!(first.errors.is_empty());

    let before = writer.chunk_count().await.expect("count failed");
    // A second ingest of the same inputs must add zero new rows.
    let second = writer.store(&records).await;
    assert_eq!(second.stored, 4);
    let after = writer.chunk_count().await.expect("count failed");
    assert_eq!(before, after, "re-ingest created new rows");
}

#[tokio::test]
#[ignore] // Requires a live database
async fn test_existing_pmids_is_a_subset() {
    let writer = writer().await;
    writer.store(&[test_chunk("99900002", 0)]).await;

    let asked: Vec<String> = vec![
        "99900002".to_string(),
        "00000000".to_string(), // never ingested
    ];
    let existing = writer.get_existing_pmids(&asked).await;
    assert!(existing.contains("99900002"));
    assert!(!existing.contains("00000000"));
    assert!(existing.iter().all(|p| asked.contains(p)), "result must be a subset of the input");
}

#[tokio::test]
#[ignore] // Requires a live database
async fn test_deduper_skips_stored_articles() {
    let writer = writer().await;
    writer.store(&[test_chunk("99900003", 0)]).await;

    let deduper = Deduper::new(writer);
    let (fresh, duplicates) = deduper
        .filter_new(vec!["99900003".to_string(), "99900004".to_string()])
        .await;
    assert_eq!(duplicates, 1);
    assert_eq!(fresh, vec!["99900004".to_string()]);
}
