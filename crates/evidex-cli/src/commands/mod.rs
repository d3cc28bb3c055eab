//! Subcommand implementations and shared run setup.

pub mod bulk;
pub mod check_env;
pub mod ingest;
pub mod monitor;
pub mod scale;

use std::sync::Arc;

use anyhow::Context;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use evidex_common::env::Env;
use evidex_common::rate_limit::{pubmed_rps, RateLimiter};
use evidex_ingestion::embedding::{EmbeddingClient, EmbeddingConfig};
use evidex_ingestion::pipeline::PipelineDeps;
use evidex_ingestion::pool::RunSummary;
use evidex_ingestion::pubmed::PubMedClient;
use evidex_ingestion::storage::{self, StorageWriter, StoreOptions};

/// Connect to the store, run migrations, and wire up the shared clients.
pub(crate) async fn build_deps(
    env: &Env,
    ncbi_key: Option<String>,
    store_options: StoreOptions,
    embed_batch_size: usize,
) -> anyhow::Result<Arc<PipelineDeps>> {
    info!("connecting to the evidence store");
    let pool = storage::connect(&env.database_url)
        .await
        .context("store connection failed; is DATABASE_URL reachable?")?;

    sqlx::migrate!("../../migrations")
        .run(&pool)
        .await
        .context("schema migration failed")?;

    let limiter = RateLimiter::new(pubmed_rps(ncbi_key.is_some()), 1.0);
    let pubmed =
        PubMedClient::new(ncbi_key, limiter.clone()).context("PubMed client init failed")?;

    let mut embed_config = EmbeddingConfig::new(env.embedding_api_key.clone());
    embed_config.base_url = env.embedding_base_url.clone();
    embed_config.batch_size = embed_batch_size;
    let embedder =
        EmbeddingClient::new(embed_config, limiter).context("embedding client init failed")?;

    let writer = StorageWriter::new(pool, store_options);

    Ok(Arc::new(PipelineDeps {
        pubmed: Arc::new(pubmed),
        embedder: Arc::new(embedder),
        writer: Arc::new(writer),
    }))
}

/// Ctrl-C flips the shared cancellation token; workers abandon at their next
/// suspension point and a final checkpoint is written.
pub(crate) fn cancel_on_ctrl_c() -> CancellationToken {
    let token = CancellationToken::new();
    let signal_token = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received; finishing in-flight work and checkpointing");
            signal_token.cancel();
        }
    });
    token
}

pub(crate) fn print_run_summary(summary: &RunSummary) {
    let secs = summary.duration.as_secs_f64().max(f64::EPSILON);
    println!();
    println!("=== Ingestion summary ===");
    println!("  jobs:      {} run, {} completed, {} failed", summary.jobs_run, summary.completed, summary.failed);
    println!("  articles:  {}", summary.total_articles);
    println!("  chunks:    {}", summary.total_chunks);
    println!("  errors:    {}", summary.total_errors);
    println!("  duration:  {:.1}s ({:.1} chunks/s)", secs, summary.total_chunks as f64 / secs);
    if summary.cancelled {
        println!("  note:      run was cancelled; resume with --resume");
    }
}

pub(crate) fn exit_code_for_errors(total_errors: u64) -> i32 {
    if total_errors == 0 {
        0
    } else {
        1
    }
}
