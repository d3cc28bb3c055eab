//! `evidex ingest` — topic ingestion for small, in-process runs.

use std::path::PathBuf;

use clap::Args;
use tracing::info;

use evidex_common::env::Env;
use evidex_common::rate_limit::{pubmed_rps, RateLimiter};
use evidex_ingestion::models::{IngestionConfig, JobKind, JobStatus, HIGH_EVIDENCE_TYPES};
use evidex_ingestion::pipeline::run_job;
use evidex_ingestion::pubmed::{build_query, PubMedClient};
use evidex_ingestion::storage::StoreOptions;

use crate::topics::{load_topics_file, RECOMMENDED_TOPICS};

#[derive(Args)]
pub struct IngestArgs {
    /// Single topic query
    #[arg(long, conflicts_with_all = ["topics_file", "recommended"])]
    pub topic: Option<String>,

    /// File with one topic per line (# comments allowed)
    #[arg(long, conflicts_with = "recommended")]
    pub topics_file: Option<PathBuf>,

    /// Use the built-in recommended clinical topic list
    #[arg(long)]
    pub recommended: bool,

    /// Maximum articles per topic
    #[arg(long, default_value_t = 100)]
    pub max: usize,

    #[arg(long)]
    pub from_year: Option<i32>,

    #[arg(long)]
    pub to_year: Option<i32>,

    /// Restrict the search to level 1–2 publication types
    #[arg(long)]
    pub high_evidence: bool,

    /// Search and report counts without parsing, embedding, or storing
    #[arg(long)]
    pub dry_run: bool,

    /// NCBI API key (falls back to NCBI_API_KEY)
    #[arg(long)]
    pub ncbi_key: Option<String>,
}

impl IngestArgs {
    fn resolve_topics(&self) -> anyhow::Result<Vec<String>> {
        if let Some(topic) = &self.topic {
            return Ok(vec![topic.clone()]);
        }
        if let Some(path) = &self.topics_file {
            return load_topics_file(path);
        }
        if self.recommended {
            return Ok(RECOMMENDED_TOPICS.iter().map(|s| s.to_string()).collect());
        }
        anyhow::bail!("one of --topic, --topics-file, or --recommended is required");
    }

    fn config(&self) -> IngestionConfig {
        IngestionConfig {
            max_per_topic: self.max,
            from_year: self.from_year,
            to_year: self.to_year,
            publication_types: self
                .high_evidence
                .then(|| HIGH_EVIDENCE_TYPES.iter().map(|s| s.to_string()).collect()),
            workers: 1,
            ..Default::default()
        }
    }
}

pub async fn run(args: IngestArgs) -> anyhow::Result<i32> {
    let topics = args.resolve_topics()?;
    let config = args.config();
    let ncbi_key = args
        .ncbi_key
        .clone()
        .or_else(|| std::env::var("NCBI_API_KEY").ok().filter(|k| !k.is_empty()));

    if args.dry_run {
        return dry_run(&topics, &config, ncbi_key).await;
    }

    let env = Env::load()?;
    let ncbi_key = ncbi_key.or_else(|| env.ncbi_api_key.clone());
    let deps = super::build_deps(&env, ncbi_key, StoreOptions::default(), config.embed_batch_size).await?;
    let cancel = super::cancel_on_ctrl_c();

    let mut total_articles = 0u64;
    let mut total_chunks = 0u64;
    let mut total_errors = 0u64;
    let started = std::time::Instant::now();

    for (i, topic) in topics.iter().enumerate() {
        if cancel.is_cancelled() {
            break;
        }
        info!(topic = %topic, "ingesting topic {}/{}", i + 1, topics.len());
        let job = JobKind::Topic {
            topic: topic.clone(),
            max_results: config.max_per_topic,
        };
        let outcome = run_job(i, &job, &config, &deps, None, &cancel).await;

        println!(
            "[{}/{}] {:<45} {:>5} articles  {:>6} chunks  {:>3} errors  {}",
            i + 1,
            topics.len(),
            truncate(topic, 45),
            outcome.articles_processed,
            outcome.chunks_created,
            outcome.errors.len(),
            status_word(outcome.status),
        );

        total_articles += outcome.articles_processed;
        total_chunks += outcome.chunks_created;
        total_errors += outcome.errors.len() as u64;
    }

    let secs = started.elapsed().as_secs_f64().max(f64::EPSILON);
    println!();
    println!("=== Ingestion summary ===");
    println!("  topics:    {}", topics.len());
    println!("  articles:  {total_articles}");
    println!("  chunks:    {total_chunks}");
    println!("  errors:    {total_errors}");
    println!("  duration:  {secs:.1}s ({:.1} chunks/s)", total_chunks as f64 / secs);

    Ok(super::exit_code_for_errors(total_errors))
}

/// Report what each topic would ingest, touching only the search endpoint.
async fn dry_run(
    topics: &[String],
    config: &IngestionConfig,
    ncbi_key: Option<String>,
) -> anyhow::Result<i32> {
    let limiter = RateLimiter::new(pubmed_rps(ncbi_key.is_some()), 1.0);
    let client = PubMedClient::new(ncbi_key, limiter)?;

    println!("Dry run: searching only, nothing will be stored.\n");
    for topic in topics {
        let query = build_query(topic, config);
        let pmids = client.search(&query, config.max_per_topic).await?;
        println!("{:<45} {:>5} articles", truncate(topic, 45), pmids.len());
        println!("    query: {query}");
    }
    Ok(0)
}

fn status_word(status: JobStatus) -> &'static str {
    match status {
        JobStatus::Completed => "ok",
        JobStatus::Failed => "FAILED",
        JobStatus::Processing => "interrupted",
        JobStatus::Pending => "pending",
    }
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let cut: String = s.chars().take(max.saturating_sub(1)).collect();
        format!("{cut}…")
    }
}
