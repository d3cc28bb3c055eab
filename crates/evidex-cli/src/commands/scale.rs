//! `evidex scale` — checkpointed, multi-worker topic ingestion for
//! million-article runs.

use std::path::PathBuf;
use std::sync::Arc;

use clap::Args;
use tracing::info;

use evidex_common::env::Env;
use evidex_ingestion::checkpoint::{Checkpoint, CheckpointStore};
use evidex_ingestion::models::{IngestionConfig, JobState, HIGH_EVIDENCE_TYPES};
use evidex_ingestion::pool::run_pool;
use evidex_ingestion::storage::StoreOptions;

use crate::topics::{load_topics_file, RECOMMENDED_TOPICS};

#[derive(Args)]
pub struct ScaleArgs {
    /// Parallel workers
    #[arg(long, default_value_t = 5)]
    pub workers: usize,

    /// Maximum articles per topic
    #[arg(long, default_value_t = 5_000)]
    pub max_per_topic: usize,

    #[arg(long)]
    pub from_year: Option<i32>,

    #[arg(long)]
    pub to_year: Option<i32>,

    /// Restrict the search to level 1–2 publication types
    #[arg(long)]
    pub high_evidence: bool,

    /// Checkpoint file path
    #[arg(long, default_value = "ingestion-checkpoint.json")]
    pub checkpoint: PathBuf,

    /// Resume from the checkpoint instead of starting over
    #[arg(long)]
    pub resume: bool,

    /// File with one topic per line; defaults to the recommended list
    #[arg(long)]
    pub topics_file: Option<PathBuf>,

    /// NCBI API key (falls back to NCBI_API_KEY)
    #[arg(long)]
    pub ncbi_key: Option<String>,
}

pub async fn run(args: ScaleArgs) -> anyhow::Result<i32> {
    let env = Env::load()?;
    let ncbi_key = args.ncbi_key.clone().or_else(|| env.ncbi_api_key.clone());

    let store = CheckpointStore::new(&args.checkpoint);
    let checkpoint = if args.resume && store.exists() {
        let loaded = store.load()?;
        info!(
            resumable = loaded.resumable_indices().len(),
            total = loaded.jobs().len(),
            "resuming from checkpoint"
        );
        loaded
    } else {
        if args.resume {
            info!(
                "no checkpoint at {}; starting a fresh run",
                args.checkpoint.display()
            );
        }
        let topics = match &args.topics_file {
            Some(path) => load_topics_file(path)?,
            None => RECOMMENDED_TOPICS.iter().map(|s| s.to_string()).collect(),
        };
        let jobs = topics
            .into_iter()
            .map(|t| JobState::topic(t, args.max_per_topic))
            .collect();
        Checkpoint::for_topics(jobs)
    };

    let config = Arc::new(IngestionConfig {
        max_per_topic: args.max_per_topic,
        from_year: args.from_year,
        to_year: args.to_year,
        publication_types: args
            .high_evidence
            .then(|| HIGH_EVIDENCE_TYPES.iter().map(|s| s.to_string()).collect()),
        workers: args.workers,
        ..Default::default()
    });

    let deps = super::build_deps(&env, ncbi_key, StoreOptions::default(), config.embed_batch_size).await?;
    let cancel = super::cancel_on_ctrl_c();

    let summary = run_pool(checkpoint, store, config, deps, cancel, None).await;
    super::print_run_summary(&summary);
    Ok(super::exit_code_for_errors(summary.total_errors))
}
