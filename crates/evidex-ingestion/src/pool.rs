//! Worker pool: runs N orchestrators in parallel over the job list.
//!
//! Jobs are atomic — one job never splits across workers. Scheduling is
//! wave-based: up to `workers` jobs run concurrently, the checkpoint is
//! rewritten when the wave finishes, and a short inter-wave delay lets
//! rate-limited upstreams recover. A cancellation signal stops new work;
//! running jobs abandon at their next suspension boundary and a final
//! checkpoint is written on the way out.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use tokio::sync::{broadcast, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::checkpoint::{Checkpoint, CheckpointStore};
use crate::models::{IngestionConfig, JobKind, JobStatus};
use crate::pipeline::{run_job, JobOutcome, PipelineDeps, ProgressEvent};

/// Per-wave pause scales with the worker count (≈3 s for 5 workers).
const INTER_WAVE_DELAY_PER_WORKER: Duration = Duration::from_millis(600);

/// Aggregate result of a pool run, for the CLI summary.
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub jobs_run: usize,
    pub completed: usize,
    pub failed: usize,
    pub total_articles: u64,
    pub total_chunks: u64,
    pub total_errors: u64,
    pub cancelled: bool,
    pub duration: Duration,
}

/// Drive every resumable job in the checkpoint to completion.
///
/// The checkpoint is the single shared document: one listener task refreshes
/// it after storage batches inside long jobs, and the wave loop rewrites it
/// after every wave. Both go through the same mutex.
pub async fn run_pool(
    checkpoint: Checkpoint,
    store: CheckpointStore,
    config: Arc<IngestionConfig>,
    deps: Arc<PipelineDeps>,
    cancel: CancellationToken,
    progress: Option<broadcast::Sender<ProgressEvent>>,
) -> RunSummary {
    let started = Instant::now();
    let workers = config.workers.max(1);

    let indices = checkpoint.resumable_indices();
    let kinds: Vec<JobKind> = checkpoint.jobs().iter().map(|j| j.kind.clone()).collect();
    let checkpoint = Arc::new(Mutex::new(checkpoint));

    info!(
        jobs = indices.len(),
        workers,
        checkpoint = %store.path().display(),
        "starting ingestion pool"
    );

    // In-job checkpoint refresher: applies progress snapshots and rewrites
    // the file on store events, at coarser granularity than the in-memory
    // counters.
    let progress_tx = progress.unwrap_or_else(|| broadcast::channel(512).0);
    let listener = tokio::spawn(refresh_from_progress(
        progress_tx.subscribe(),
        Arc::clone(&checkpoint),
        store.clone(),
    ));

    let mut cancelled = false;
    let waves: Vec<&[usize]> = indices.chunks(workers).collect();
    let wave_count = waves.len();

    for (wave_no, wave) in waves.into_iter().enumerate() {
        if cancel.is_cancelled() {
            cancelled = true;
            break;
        }

        {
            let mut cp = checkpoint.lock().await;
            for &i in wave {
                let job = &mut cp.jobs_mut()[i];
                job.status = JobStatus::Processing;
                job.started_at.get_or_insert_with(Utc::now);
            }
            cp.recompute_stats();
            save_or_warn(&store, &cp);
        }

        let mut handles = Vec::with_capacity(wave.len());
        for &i in wave {
            let kind = kinds[i].clone();
            let config = Arc::clone(&config);
            let deps = Arc::clone(&deps);
            let cancel = cancel.clone();
            let tx = progress_tx.clone();
            handles.push((
                i,
                tokio::spawn(async move {
                    run_job(i, &kind, &config, &deps, Some(tx), &cancel).await
                }),
            ));
        }

        {
            let mut wave_outcomes = Vec::with_capacity(handles.len());
            for (i, handle) in handles {
                match handle.await {
                    Ok(outcome) => wave_outcomes.push((i, outcome)),
                    Err(e) => {
                        warn!(job = i, "worker task failed: {e}");
                        wave_outcomes.push((
                            i,
                            JobOutcome {
                                status: JobStatus::Failed,
                                articles_processed: 0,
                                chunks_created: 0,
                                duplicates_skipped: 0,
                                errors: vec![crate::models::StageError::new(
                                    crate::models::Stage::Fetch,
                                    format!("worker task failed: {e}"),
                                )],
                                duration_ms: 0,
                            },
                        ));
                    }
                }
            }

            let mut cp = checkpoint.lock().await;
            for (i, outcome) in wave_outcomes {
                apply_outcome(&mut cp, i, &outcome);
                if outcome.status == JobStatus::Processing {
                    cancelled = true;
                }
            }
            cp.recompute_stats();
            save_or_warn(&store, &cp);
        }

        if wave_no + 1 < wave_count && !cancel.is_cancelled() {
            let pause = INTER_WAVE_DELAY_PER_WORKER * workers as u32;
            debug!(?pause, "inter-wave delay");
            tokio::select! {
                _ = cancel.cancelled() => {}
                _ = tokio::time::sleep(pause) => {}
            }
        }
    }

    drop(progress_tx);
    let _ = listener.await;

    // Final checkpoint write, also on cancellation.
    let summary = {
        let mut cp = checkpoint.lock().await;
        cp.recompute_stats();
        save_or_warn(&store, &cp);

        let jobs = cp.jobs();
        RunSummary {
            jobs_run: indices.len(),
            completed: jobs
                .iter()
                .filter(|j| j.status == JobStatus::Completed)
                .count(),
            failed: jobs.iter().filter(|j| j.status == JobStatus::Failed).count(),
            total_articles: cp.stats.total_articles,
            total_chunks: cp.stats.total_chunks,
            total_errors: cp.stats.total_errors,
            cancelled,
            duration: started.elapsed(),
        }
    };

    info!(
        completed = summary.completed,
        failed = summary.failed,
        articles = summary.total_articles,
        chunks = summary.total_chunks,
        errors = summary.total_errors,
        cancelled = summary.cancelled,
        "ingestion pool finished"
    );
    summary
}

/// Counters are per-run and assigned absolutely: a resumed job reruns in
/// full, so accumulation would double count.
fn apply_outcome(checkpoint: &mut Checkpoint, index: usize, outcome: &JobOutcome) {
    let job = &mut checkpoint.jobs_mut()[index];
    job.status = outcome.status;
    job.articles_processed = outcome.articles_processed;
    job.chunks_created = outcome.chunks_created;
    job.errors = outcome.errors.len() as u64;
    if matches!(outcome.status, JobStatus::Completed | JobStatus::Failed) {
        job.completed_at = Some(Utc::now());
    }
}

async fn refresh_from_progress(
    mut rx: broadcast::Receiver<ProgressEvent>,
    checkpoint: Arc<Mutex<Checkpoint>>,
    store: CheckpointStore,
) {
    loop {
        match rx.recv().await {
            Ok(event) => {
                let mut cp = checkpoint.lock().await;
                if let Some(job) = cp.jobs_mut().get_mut(event.job_index) {
                    job.articles_processed = event.articles_processed;
                    job.chunks_created = event.chunks_created;
                    job.errors = event.errors;
                }
                if event.stage == "store" {
                    cp.recompute_stats();
                    save_or_warn(&store, &cp);
                }
            }
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                debug!(skipped, "progress listener lagged");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

fn save_or_warn(store: &CheckpointStore, checkpoint: &Checkpoint) {
    if let Err(e) = store.save(checkpoint) {
        warn!("checkpoint write failed: {e}");
    }
}
