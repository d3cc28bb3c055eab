//! `evidex monitor` — read-only terminal view of a running ingestion.
//!
//! Watches the checkpoint file and redraws when it changes. Never writes.

use std::io::stdout;
use std::path::PathBuf;
use std::time::{Duration, SystemTime};

use chrono::Utc;
use clap::Args;
use crossterm::cursor::MoveTo;
use crossterm::execute;
use crossterm::terminal::{Clear, ClearType};

use evidex_ingestion::checkpoint::{Checkpoint, CheckpointStore};
use evidex_ingestion::models::{JobState, JobStatus};

#[derive(Args)]
pub struct MonitorArgs {
    /// Checkpoint file to watch
    #[arg(long, default_value = "ingestion-checkpoint.json")]
    pub checkpoint: PathBuf,

    /// Refresh interval in seconds
    #[arg(long, default_value_t = 5)]
    pub interval: u64,
}

pub async fn run(args: MonitorArgs) -> anyhow::Result<i32> {
    let store = CheckpointStore::new(&args.checkpoint);
    let mut last_modified: Option<SystemTime> = None;
    let mut drawn_once = false;

    loop {
        let modified = std::fs::metadata(store.path())
            .and_then(|m| m.modified())
            .ok();

        if modified != last_modified || !drawn_once {
            match store.load() {
                Ok(checkpoint) => {
                    render(&checkpoint)?;
                    drawn_once = true;
                }
                Err(_) if !drawn_once => {
                    println!(
                        "waiting for checkpoint at {} …",
                        store.path().display()
                    );
                    drawn_once = true;
                }
                Err(_) => {} // mid-rename blip; keep the last frame
            }
            last_modified = modified;
        }

        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            _ = tokio::time::sleep(Duration::from_secs(args.interval.max(1))) => {}
        }
    }
    Ok(0)
}

fn render(checkpoint: &Checkpoint) -> anyhow::Result<()> {
    execute!(stdout(), Clear(ClearType::All), MoveTo(0, 0))?;

    let stats = &checkpoint.stats;
    let total = stats.total_jobs.max(1);
    let done = checkpoint
        .jobs()
        .iter()
        .filter(|j| matches!(j.status, JobStatus::Completed | JobStatus::Failed))
        .count() as u64;
    let percent = done as f64 / total as f64 * 100.0;

    let elapsed = (Utc::now() - checkpoint.start_time).max(chrono::Duration::zero());
    let eta = if done > 0 && done < stats.total_jobs {
        let per_job = elapsed.num_seconds() as f64 / done as f64;
        Some(chrono::Duration::seconds(
            (per_job * (stats.total_jobs - done) as f64) as i64,
        ))
    } else {
        None
    };

    println!("Evidex ingestion — {:.1}% ({done}/{} jobs)", percent, stats.total_jobs);
    println!(
        "elapsed {}   eta {}   updated {}",
        fmt_duration(elapsed),
        eta.map_or_else(|| "-".to_string(), fmt_duration),
        checkpoint.last_update.format("%H:%M:%S"),
    );
    println!();
    println!(
        "articles {:>9}   chunks {:>9}   errors {:>6}",
        stats.total_articles, stats.total_chunks, stats.total_errors
    );
    println!();

    let processing: Vec<&JobState> = checkpoint
        .jobs()
        .iter()
        .filter(|j| j.status == JobStatus::Processing)
        .collect();
    if !processing.is_empty() {
        println!("in flight:");
        for job in processing {
            println!(
                "  {:<50} {:>6} articles {:>7} chunks",
                short(&job.kind.label()),
                job.articles_processed,
                job.chunks_created
            );
        }
        println!();
    }

    let mut completed: Vec<&JobState> = checkpoint
        .jobs()
        .iter()
        .filter(|j| j.status == JobStatus::Completed)
        .collect();
    completed.sort_by_key(|j| std::cmp::Reverse(j.completed_at));
    if !completed.is_empty() {
        println!("recently completed:");
        for job in completed.iter().take(5) {
            println!(
                "  {:<50} {:>6} articles {:>7} chunks",
                short(&job.kind.label()),
                job.articles_processed,
                job.chunks_created
            );
        }
        println!();
    }

    let failed: Vec<&JobState> = checkpoint
        .jobs()
        .iter()
        .filter(|j| j.status == JobStatus::Failed)
        .collect();
    if !failed.is_empty() {
        println!("failed:");
        for job in failed {
            println!("  {:<50} {:>6} errors", short(&job.kind.label()), job.errors);
        }
    }

    Ok(())
}

fn short(label: &str) -> String {
    if label.chars().count() <= 50 {
        label.to_string()
    } else {
        let cut: String = label.chars().take(49).collect();
        format!("{cut}…")
    }
}

fn fmt_duration(d: chrono::Duration) -> String {
    let secs = d.num_seconds().max(0);
    let (h, m, s) = (secs / 3600, (secs % 3600) / 60, secs % 60);
    if h > 0 {
        format!("{h}h {m:02}m {s:02}s")
    } else if m > 0 {
        format!("{m}m {s:02}s")
    } else {
        format!("{s}s")
    }
}
