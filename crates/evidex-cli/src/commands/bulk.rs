//! `evidex bulk` — ingest local PubMed XML dump files.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Args;
use tracing::info;

use evidex_common::env::Env;
use evidex_ingestion::checkpoint::{Checkpoint, CheckpointStore};
use evidex_ingestion::models::{IngestionConfig, JobState};
use evidex_ingestion::pool::run_pool;
use evidex_ingestion::storage::StoreOptions;

#[derive(Args)]
pub struct BulkArgs {
    /// One XML dump file
    #[arg(long, conflicts_with = "dir")]
    pub file: Option<PathBuf>,

    /// Directory of .xml dump files
    #[arg(long)]
    pub dir: Option<PathBuf>,

    /// Parallel workers
    #[arg(long, default_value_t = 5)]
    pub workers: usize,

    #[arg(long)]
    pub from_year: Option<i32>,

    #[arg(long)]
    pub to_year: Option<i32>,

    /// Keep only articles classified at CEBM level 1–2
    #[arg(long)]
    pub high_evidence: bool,

    /// Articles parsed per batch
    #[arg(long, default_value_t = 200)]
    pub batch_size: usize,

    /// Chunks per embedding request
    #[arg(long, default_value_t = 200)]
    pub embedding_batch_size: usize,

    /// Checkpoint file path
    #[arg(long, default_value = "ingestion-checkpoint.json")]
    pub checkpoint: PathBuf,

    /// Resume from the checkpoint instead of starting over
    #[arg(long)]
    pub resume: bool,
}

fn collect_files(args: &BulkArgs) -> anyhow::Result<Vec<PathBuf>> {
    if let Some(file) = &args.file {
        anyhow::ensure!(file.exists(), "file {} does not exist", file.display());
        return Ok(vec![file.clone()]);
    }
    if let Some(dir) = &args.dir {
        let mut files: Vec<PathBuf> = std::fs::read_dir(dir)
            .with_context(|| format!("cannot read directory {}", dir.display()))?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|p| p.extension().is_some_and(|ext| ext == "xml"))
            .collect();
        files.sort();
        anyhow::ensure!(!files.is_empty(), "no .xml files in {}", dir.display());
        return Ok(files);
    }
    anyhow::bail!("one of --file or --dir is required");
}

pub async fn run(args: BulkArgs) -> anyhow::Result<i32> {
    let env = Env::load()?;

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
        let files = collect_files(&args)?;
        info!(files = files.len(), "bulk ingestion over local dumps");
        Checkpoint::for_files(files.into_iter().map(JobState::file).collect())
    };

    let config = Arc::new(IngestionConfig {
        from_year: args.from_year,
        to_year: args.to_year,
        // No search query exists here to pre-filter; classification decides.
        min_evidence_level: args.high_evidence.then_some(2),
        workers: args.workers,
        fetch_batch_size: args.batch_size,
        embed_batch_size: args.embedding_batch_size,
        ..Default::default()
    });

    let deps = super::build_deps(&env, None, StoreOptions::default(), config.embed_batch_size).await?;
    let cancel = super::cancel_on_ctrl_c();

    let summary = run_pool(checkpoint, store, config, deps, cancel, None).await;
    super::print_run_summary(&summary);
    Ok(super::exit_code_for_errors(summary.total_errors))
}
