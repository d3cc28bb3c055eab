//! End-to-end ingestion of a single job.
//!
//! Orchestrates the full flow for one topic or one XML dump:
//!   1. Search PubMed for PMIDs (or iterate article blobs from the file)
//!   2. Deduplicate against storage; keep only new articles
//!   3. Fetch + parse in outer batches
//!   4. Filter by evidence level, chunk, buffer
//!   5. Embed buffered chunks in batch groups, pair vectors by position
//!   6. Upsert to storage
//!   7. Emit progress events over a broadcast channel
//!
//! The pipeline is non-destructive: per-item and per-batch failures are
//! recorded and the loop continues. Only an outer step failing (search, file
//! open) fails the job.

use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;
use tokio::io::AsyncReadExt;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use evidex_common::error::{EvidexError, Result};

use crate::chunker::{chunk_article, validate_chunk};
use crate::embedding::EmbeddingClient;
use crate::models::{
    Article, Chunk, EmbeddedChunk, IngestionConfig, JobKind, JobStatus, Stage, StageError,
};
use crate::parser::parse_article;
use crate::pubmed::{build_query, PubMedClient};
use crate::storage::{Deduper, StorageWriter};
use crate::stream::ArticleStream;

/// Files above this size are streamed instead of read whole.
const STREAM_THRESHOLD_BYTES: u64 = 100 * 1024 * 1024;
const READ_CHUNK_BYTES: usize = 1 << 20;

/// Shared clients, constructed once per process and reused by every worker.
pub struct PipelineDeps {
    pub pubmed: Arc<PubMedClient>,
    pub embedder: Arc<EmbeddingClient>,
    pub writer: Arc<StorageWriter>,
}

/// Progress snapshot emitted after each pipeline step (cloneable for
/// broadcast).
#[derive(Debug, Clone, Serialize)]
pub struct ProgressEvent {
    pub job_index: usize,
    pub job: String,
    pub stage: String,
    pub message: String,
    pub articles_processed: u64,
    pub chunks_created: u64,
    pub errors: u64,
}

/// What one job run produced. Counters reflect what actually happened:
/// `chunks_created` counts rows that reached storage.
#[derive(Debug)]
pub struct JobOutcome {
    pub status: JobStatus,
    pub articles_processed: u64,
    pub chunks_created: u64,
    pub duplicates_skipped: u64,
    pub errors: Vec<StageError>,
    pub duration_ms: u64,
}

/// Run one job to completion (or cancellation).
#[instrument(skip_all, fields(job = %job.label()))]
pub async fn run_job(
    job_index: usize,
    job: &JobKind,
    config: &IngestionConfig,
    deps: &PipelineDeps,
    progress: Option<broadcast::Sender<ProgressEvent>>,
    cancel: &CancellationToken,
) -> JobOutcome {
    let started = Instant::now();
    let mut runner = JobRunner {
        config,
        deps,
        progress,
        cancel,
        job_index,
        label: job.label(),
        articles_processed: 0,
        chunks_created: 0,
        duplicates_skipped: 0,
        errors: Vec::new(),
        buffer: Vec::new(),
        cancelled: false,
    };

    let outer = match job {
        JobKind::Topic { topic, max_results } => runner.run_topic(topic, *max_results).await,
        JobKind::File { file } => runner.run_file(file).await,
    };

    let status = match outer {
        Err(e) => {
            warn!("job failed at an outer step: {e}");
            runner
                .errors
                .push(StageError::new(Stage::Fetch, e.to_string()));
            JobStatus::Failed
        }
        Ok(()) if runner.cancelled => JobStatus::Processing,
        Ok(()) if runner.errors.is_empty() => JobStatus::Completed,
        Ok(()) => JobStatus::Failed,
    };

    let outcome = JobOutcome {
        status,
        articles_processed: runner.articles_processed,
        chunks_created: runner.chunks_created,
        duplicates_skipped: runner.duplicates_skipped,
        errors: runner.errors,
        duration_ms: started.elapsed().as_millis() as u64,
    };
    info!(
        status = ?outcome.status,
        articles = outcome.articles_processed,
        chunks = outcome.chunks_created,
        duplicates = outcome.duplicates_skipped,
        errors = outcome.errors.len(),
        duration_ms = outcome.duration_ms,
        "job finished"
    );
    outcome
}

struct JobRunner<'a> {
    config: &'a IngestionConfig,
    deps: &'a PipelineDeps,
    progress: Option<broadcast::Sender<ProgressEvent>>,
    cancel: &'a CancellationToken,
    job_index: usize,
    label: String,
    articles_processed: u64,
    chunks_created: u64,
    duplicates_skipped: u64,
    errors: Vec<StageError>,
    buffer: Vec<Chunk>,
    cancelled: bool,
}

impl JobRunner<'_> {
    fn emit(&self, stage: Stage, message: impl Into<String>) {
        if let Some(tx) = &self.progress {
            let _ = tx.send(ProgressEvent {
                job_index: self.job_index,
                job: self.label.clone(),
                stage: stage.as_str().to_string(),
                message: message.into(),
                articles_processed: self.articles_processed,
                chunks_created: self.chunks_created,
                errors: self.errors.len() as u64,
            });
        }
    }

    // ── Topic jobs ───────────────────────────────────────────────────────────

    async fn run_topic(&mut self, topic: &str, max_results: usize) -> Result<()> {
        let query = build_query(topic, self.config);
        debug!(%query, "searching PubMed");

        let searched = tokio::select! {
            _ = self.cancel.cancelled() => None,
            r = self.deps.pubmed.search(&query, max_results) => Some(r),
        };
        let pmids = match searched {
            None => {
                self.cancelled = true;
                return Ok(());
            }
            Some(result) => result?,
        };
        if pmids.is_empty() {
            self.emit(Stage::Fetch, "search returned no articles");
            return Ok(());
        }

        let deduper = Deduper::new(Arc::clone(&self.deps.writer));
        let deduped = tokio::select! {
            _ = self.cancel.cancelled() => None,
            r = deduper.filter_new(pmids) => Some(r),
        };
        let (fresh, duplicates) = match deduped {
            None => {
                self.cancelled = true;
                return Ok(());
            }
            Some(result) => result,
        };
        self.duplicates_skipped += duplicates as u64;
        self.articles_processed += duplicates as u64;
        self.emit(
            Stage::Fetch,
            format!("{} new articles, {duplicates} already stored", fresh.len()),
        );

        for batch in fresh.chunks(self.config.fetch_batch_size) {
            if self.cancel.is_cancelled() {
                self.cancelled = true;
                break;
            }
            let fetched = tokio::select! {
                _ = self.cancel.cancelled() => None,
                r = self.deps.pubmed.fetch(batch) => Some(r),
            };
            let xml = match fetched {
                None => {
                    self.cancelled = true;
                    break;
                }
                Some(Ok(xml)) => xml,
                Some(Err(e)) => {
                    warn!("fetch batch of {} failed: {e}", batch.len());
                    self.errors
                        .push(StageError::new(Stage::Fetch, e.to_string()));
                    continue;
                }
            };

            let articles = self.parse_blobs(crate::stream::extract_articles(&xml));
            self.process_articles(articles).await;
        }

        self.flush_buffer().await;
        Ok(())
    }

    // ── File jobs ────────────────────────────────────────────────────────────

    async fn run_file(&mut self, path: &std::path::Path) -> Result<()> {
        let meta = tokio::fs::metadata(path).await.map_err(|e| {
            EvidexError::Pipeline(format!("cannot open {}: {e}", path.display()))
        })?;

        if meta.len() <= STREAM_THRESHOLD_BYTES {
            let xml = tokio::fs::read_to_string(path).await?;
            let blobs = crate::stream::extract_articles(&xml);
            self.process_blob_batches(blobs).await;
        } else {
            info!(
                size_mb = meta.len() / (1024 * 1024),
                "large dump; streaming article blobs"
            );
            let mut file = tokio::fs::File::open(path).await?;
            let mut splitter = ArticleStream::new();
            let mut read_buf = vec![0u8; READ_CHUNK_BYTES];
            let mut pending_blobs = Vec::new();

            loop {
                if self.cancel.is_cancelled() {
                    self.cancelled = true;
                    break;
                }
                let n = file.read(&mut read_buf).await?;
                if n == 0 {
                    break;
                }
                pending_blobs.extend(splitter.push(&read_buf[..n]));
                while pending_blobs.len() >= self.config.fetch_batch_size {
                    let batch: Vec<String> = pending_blobs
                        .drain(..self.config.fetch_batch_size)
                        .collect();
                    let articles = self.parse_and_dedupe(batch).await;
                    self.process_articles(articles).await;
                }
            }
            splitter.finish();
            self.process_blob_batches(pending_blobs).await;
        }

        self.flush_buffer().await;
        Ok(())
    }

    async fn process_blob_batches(&mut self, blobs: Vec<String>) {
        let batch_size = self.config.fetch_batch_size;
        for batch in blobs.chunks(batch_size) {
            if self.cancel.is_cancelled() {
                self.cancelled = true;
                return;
            }
            let articles = self.parse_and_dedupe(batch.to_vec()).await;
            self.process_articles(articles).await;
        }
    }

    // ── Shared stages ────────────────────────────────────────────────────────

    fn parse_blobs(&mut self, blobs: Vec<String>) -> Vec<Article> {
        let mut articles = Vec::new();
        for blob in &blobs {
            match parse_article(blob) {
                Ok(article) => articles.push(article),
                Err(e) => {
                    self.errors
                        .push(StageError::new(Stage::Parse, e.to_string()));
                }
            }
        }
        articles
    }

    /// File-mode articles carry no prior search step, so dedupe happens on
    /// the parsed PMIDs.
    async fn parse_and_dedupe(&mut self, blobs: Vec<String>) -> Vec<Article> {
        let articles = self.parse_blobs(blobs);
        if articles.is_empty() {
            return articles;
        }
        let pmids: Vec<String> = articles.iter().map(|a| a.pmid.clone()).collect();
        let looked_up = tokio::select! {
            _ = self.cancel.cancelled() => None,
            e = self.deps.writer.get_existing_pmids(&pmids) => Some(e),
        };
        let existing = match looked_up {
            None => {
                self.cancelled = true;
                return Vec::new();
            }
            Some(existing) => existing,
        };
        let duplicates = articles
            .iter()
            .filter(|a| existing.contains(&a.pmid))
            .count();
        self.duplicates_skipped += duplicates as u64;
        self.articles_processed += duplicates as u64;
        articles
            .into_iter()
            .filter(|a| !existing.contains(&a.pmid))
            .collect()
    }

    async fn process_articles(&mut self, articles: Vec<Article>) {
        for article in &articles {
            self.articles_processed += 1;

            // File jobs have no search query to constrain dates server-side.
            let year = article.pub_date.year;
            if self.config.from_year.is_some_and(|from| year < from)
                || self.config.to_year.is_some_and(|to| year > to)
            {
                debug!(pmid = %article.pmid, year, "outside the year range; skipped");
                continue;
            }

            if let Some(min_level) = self.config.min_evidence_level {
                if article.evidence_level > min_level {
                    debug!(
                        pmid = %article.pmid,
                        level = article.evidence_level,
                        "below minimum evidence level; skipped"
                    );
                    continue;
                }
            }

            let chunks = chunk_article(article, &self.config.chunking);
            if chunks.is_empty() {
                self.errors.push(StageError::for_pmid(
                    Stage::Chunk,
                    &article.pmid,
                    "article produced no chunks",
                ));
                continue;
            }
            for chunk in &chunks {
                for warning in validate_chunk(chunk) {
                    debug!(pmid = %chunk.pmid, index = chunk.chunk_index, "chunk integrity: {warning}");
                }
            }
            self.buffer.extend(chunks);
        }

        if self.buffer.len() >= self.config.embed_batch_size {
            self.flush_buffer().await;
        }
    }

    /// Embed the buffered chunks, pair vectors by position, and store.
    /// Chunks of a terminally failed embedding batch are dropped for this
    /// run; each such batch is one stage=embed error.
    async fn flush_buffer(&mut self) {
        if self.buffer.is_empty() {
            return;
        }
        let chunks = std::mem::take(&mut self.buffer);
        self.emit(Stage::Embed, format!("embedding {} chunks", chunks.len()));

        let texts: Vec<String> = chunks
            .iter()
            .map(|c| c.content_with_context.clone())
            .collect();
        let embedded = tokio::select! {
            _ = self.cancel.cancelled() => None,
            o = self.deps.embedder.embed_all(&texts) => Some(o),
        };
        let outcome = match embedded {
            None => {
                // Abandoned at a suspension boundary; the resumed job will
                // re-fetch and re-embed these articles.
                self.cancelled = true;
                return;
            }
            Some(outcome) => outcome,
        };
        self.errors.extend(outcome.errors);

        let records: Vec<EmbeddedChunk> = chunks
            .into_iter()
            .zip(outcome.vectors)
            .filter_map(|(chunk, vector)| vector.map(|embedding| EmbeddedChunk { chunk, embedding }))
            .collect();
        if records.is_empty() {
            return;
        }

        self.emit(Stage::Store, format!("storing {} chunks", records.len()));
        let stored = tokio::select! {
            _ = self.cancel.cancelled() => None,
            r = self.deps.writer.store(&records) => Some(r),
        };
        let report = match stored {
            None => {
                self.cancelled = true;
                return;
            }
            Some(report) => report,
        };
        self.chunks_created += report.stored as u64;
        self.errors.extend(report.errors);
        self.emit(Stage::Store, format!("stored {} chunks", report.stored));
    }
}
