//! Storage writer — upserts embedded chunks into the `medical_evidence`
//! table (Postgres + pgvector) keyed by (pmid, chunk_index).
//!
//! Batches are small to fit per-transaction timeouts. A failing batch is
//! retried with exponential backoff, then recursively halved until single
//! rows either land or become terminal errors. A global semaphore caps
//! concurrent writes regardless of how many workers call in.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use futures::FutureExt;
use rand::Rng;
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, QueryBuilder};
use tokio::sync::Semaphore;
use tracing::{debug, instrument, warn};

use evidex_common::error::Result;

use crate::models::{EmbeddedChunk, Stage, StageError};

#[derive(Debug, Clone)]
pub struct StoreOptions {
    pub batch_size: usize,
    /// Batches at or below this size are not split further.
    pub min_batch_size: usize,
    pub max_retries: u32,
    pub max_concurrent_writes: usize,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            batch_size: 15,
            min_batch_size: 5,
            max_retries: 5,
            max_concurrent_writes: 3,
        }
    }
}

#[derive(Debug, Default)]
pub struct StoreReport {
    pub stored: usize,
    pub errors: Vec<StageError>,
}

/// Open the pgvector-enabled Postgres pool.
pub async fn connect(database_url: &str) -> Result<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(database_url)
        .await?;
    Ok(pool)
}

pub struct StorageWriter {
    pool: PgPool,
    options: StoreOptions,
    write_slots: Arc<Semaphore>,
    consecutive_errors: AtomicU32,
}

impl StorageWriter {
    pub fn new(pool: PgPool, options: StoreOptions) -> Self {
        let write_slots = Arc::new(Semaphore::new(options.max_concurrent_writes.max(1)));
        Self {
            pool,
            options,
            write_slots,
            consecutive_errors: AtomicU32::new(0),
        }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Upsert all records. Every chunk is either stored or accounted for in
    /// the report's errors — nothing is dropped silently.
    #[instrument(skip(self, records), fields(n = records.len()))]
    pub async fn store(&self, records: &[EmbeddedChunk]) -> StoreReport {
        let mut report = StoreReport::default();
        let batches: Vec<&[EmbeddedChunk]> = records.chunks(self.options.batch_size).collect();
        let last = batches.len().saturating_sub(1);

        for (i, batch) in batches.into_iter().enumerate() {
            let (stored, errors) = self.store_batch(batch).await;
            report.stored += stored;
            report.errors.extend(errors);

            if i < last {
                tokio::time::sleep(self.inter_batch_delay(batch.len())).await;
            }
        }
        report
    }

    /// Base delay scales inversely with batch size; consecutive errors add
    /// up to 20 s on top, plus jitter.
    fn inter_batch_delay(&self, batch_size: usize) -> Duration {
        let base = (3_000i64 - 10 * batch_size as i64).max(1_000) as u64;
        let penalty = (self.consecutive_errors.load(Ordering::Relaxed) as u64 * 5_000).min(20_000);
        let jitter = rand::thread_rng().gen_range(0..500);
        Duration::from_millis(base + penalty + jitter)
    }

    /// Retry, then split. Boxed because it recurses.
    fn store_batch<'a>(
        &'a self,
        batch: &'a [EmbeddedChunk],
    ) -> BoxFuture<'a, (usize, Vec<StageError>)> {
        async move {
            if batch.is_empty() {
                return (0, Vec::new());
            }

            let mut last_error = String::new();
            for attempt in 0..=self.options.max_retries {
                let outcome = {
                    // Permit scope bounds the global write-concurrency cap.
                    // The semaphore is owned by this writer and never closed.
                    let _permit = self.write_slots.acquire().await.ok();
                    self.upsert_batch(batch).await
                };
                match outcome {
                    Ok(()) => {
                        self.consecutive_errors.store(0, Ordering::Relaxed);
                        return (batch.len(), Vec::new());
                    }
                    Err(e) => {
                        last_error = e.to_string();
                        if !is_retryable(&e) {
                            warn!(batch = batch.len(), "non-retryable store error: {last_error}");
                            break;
                        }
                        if attempt < self.options.max_retries {
                            let wait = Duration::from_secs(2u64 << attempt.min(4));
                            debug!(batch = batch.len(), attempt, ?wait, "store retry: {last_error}");
                            tokio::time::sleep(wait).await;
                        }
                    }
                }
            }

            self.consecutive_errors.fetch_add(1, Ordering::Relaxed);

            if batch.len() > self.options.min_batch_size {
                // Halve and let the server breathe between the halves.
                let (left, right) = batch.split_at(batch.len() / 2);
                warn!(
                    batch = batch.len(),
                    "store batch failed; splitting into {} + {}",
                    left.len(),
                    right.len()
                );
                let (stored_l, mut errors_l) = self.store_batch(left).await;
                let pause = rand::thread_rng().gen_range(3_000..4_000);
                tokio::time::sleep(Duration::from_millis(pause)).await;
                let (stored_r, errors_r) = self.store_batch(right).await;
                errors_l.extend(errors_r);
                (stored_l + stored_r, errors_l)
            } else {
                let errors = batch
                    .iter()
                    .map(|record| {
                        StageError::for_pmid(Stage::Store, &record.chunk.pmid, &last_error)
                    })
                    .collect();
                (0, errors)
            }
        }
        .boxed()
    }

    async fn upsert_batch(&self, batch: &[EmbeddedChunk]) -> std::result::Result<(), sqlx::Error> {
        let mut qb: QueryBuilder<sqlx::Postgres> = QueryBuilder::new(
            "INSERT INTO medical_evidence (pmid, chunk_index, section_type, content, \
             content_with_context, title, journal, publication_year, doi, authors, \
             evidence_level, study_design, sample_size, mesh_terms, mesh_major, \
             chemicals, keywords, token_estimate, embedding) ",
        );
        qb.push_values(batch, |mut row, record| {
            let c = &record.chunk;
            row.push_bind(&c.pmid)
                .push_bind(c.chunk_index as i32)
                .push_bind(c.section_type.as_str())
                .push_bind(&c.content)
                .push_bind(&c.content_with_context)
                .push_bind(&c.title)
                .push_bind(&c.journal)
                .push_bind(c.publication_year)
                .push_bind(&c.doi)
                .push_bind(&c.authors)
                .push_bind(c.evidence_level as i16)
                .push_bind(&c.study_design)
                .push_bind(c.sample_size.map(|n| n as i64))
                .push_bind(&c.mesh_terms)
                .push_bind(&c.mesh_major)
                .push_bind(&c.chemicals)
                .push_bind(&c.keywords)
                .push_bind(c.token_estimate as i32)
                .push_bind(pgvector::Vector::from(record.embedding.clone()));
        });
        qb.push(
            " ON CONFLICT (pmid, chunk_index) DO UPDATE SET \
             section_type = EXCLUDED.section_type, \
             content = EXCLUDED.content, \
             content_with_context = EXCLUDED.content_with_context, \
             title = EXCLUDED.title, \
             journal = EXCLUDED.journal, \
             publication_year = EXCLUDED.publication_year, \
             doi = EXCLUDED.doi, \
             authors = EXCLUDED.authors, \
             evidence_level = EXCLUDED.evidence_level, \
             study_design = EXCLUDED.study_design, \
             sample_size = EXCLUDED.sample_size, \
             mesh_terms = EXCLUDED.mesh_terms, \
             mesh_major = EXCLUDED.mesh_major, \
             chemicals = EXCLUDED.chemicals, \
             keywords = EXCLUDED.keywords, \
             token_estimate = EXCLUDED.token_estimate, \
             embedding = EXCLUDED.embedding, \
             updated_at = now()",
        );
        qb.build().execute(&self.pool).await?;
        Ok(())
    }

    /// Which of the given PMIDs already have rows. Queries in slices of
    /// 1000; a failing slice is logged and skipped, so the result may be a
    /// partial (still valid) subset.
    #[instrument(skip(self, pmids), fields(n = pmids.len()))]
    pub async fn get_existing_pmids(&self, pmids: &[String]) -> HashSet<String> {
        let mut existing = HashSet::new();
        for slice in pmids.chunks(1_000) {
            let rows: std::result::Result<Vec<String>, sqlx::Error> = sqlx::query_scalar(
                "SELECT DISTINCT pmid FROM medical_evidence WHERE pmid = ANY($1)",
            )
            .bind(slice)
            .fetch_all(&self.pool)
            .await;
            match rows {
                Ok(rows) => existing.extend(rows),
                Err(e) => warn!("existence query failed for a slice of {}: {e}", slice.len()),
            }
        }
        existing
    }

    /// Total chunk rows, for the CLI summary.
    pub async fn chunk_count(&self) -> Result<i64> {
        let n = sqlx::query_scalar("SELECT COUNT(*) FROM medical_evidence")
            .fetch_one(&self.pool)
            .await?;
        Ok(n)
    }
}

/// Timeouts and server/edge hiccups are retryable; constraint violations and
/// friends are not.
fn is_retryable(error: &sqlx::Error) -> bool {
    if let sqlx::Error::Database(db) = error {
        // 57014 query_canceled (statement timeout), 53300 too_many_connections.
        if let Some(code) = db.code() {
            if code == "57014" || code == "53300" {
                return true;
            }
        }
    }
    let message = error.to_string().to_lowercase();
    message.contains("timeout")
        || message.contains("timed out")
        || message.contains("520")
        || message.contains("cloudflare")
        || message.contains("fetch failed")
        || message.contains("connection reset")
        || message.contains("broken pipe")
}

// ── Deduper ───────────────────────────────────────────────────────────────────

/// Thin wrapper over the writer's existence query. Its output is
/// authoritative: returned PMIDs are skipped outright — partially written
/// articles are simply overwritten by upsert on re-ingest.
pub struct Deduper {
    writer: Arc<StorageWriter>,
}

impl Deduper {
    pub fn new(writer: Arc<StorageWriter>) -> Self {
        Self { writer }
    }

    /// Partition PMIDs into (new, already-present count), preserving order.
    pub async fn filter_new(&self, pmids: Vec<String>) -> (Vec<String>, usize) {
        if pmids.is_empty() {
            return (pmids, 0);
        }
        let existing = self.writer.get_existing_pmids(&pmids).await;
        let total = pmids.len();
        let fresh: Vec<String> = pmids
            .into_iter()
            .filter(|p| !existing.contains(p))
            .collect();
        let duplicates = total - fresh.len();
        (fresh, duplicates)
    }
}
