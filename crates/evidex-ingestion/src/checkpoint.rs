//! Checkpoint persistence for long ingestion runs.
//!
//! The checkpoint is a JSON document rewritten atomically (temp file in the
//! same directory, then rename) after every wave of workers. On resume,
//! `pending` and `processing` jobs rerun in full — chunk-level upserts make
//! that idempotent — while `completed` and `failed` jobs are skipped.

use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use evidex_common::error::{EvidexError, Result};

use crate::models::{JobState, JobStatus};

pub const CHECKPOINT_VERSION: &str = "1.0";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckpointStats {
    pub total_jobs: u64,
    pub completed_jobs: u64,
    pub total_articles: u64,
    pub total_chunks: u64,
    pub total_errors: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Checkpoint {
    pub version: String,
    pub start_time: DateTime<Utc>,
    pub last_update: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub topics: Option<Vec<JobState>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub files: Option<Vec<JobState>>,
    pub stats: CheckpointStats,
}

impl Checkpoint {
    pub fn for_topics(jobs: Vec<JobState>) -> Self {
        Self::new(Some(jobs), None)
    }

    pub fn for_files(jobs: Vec<JobState>) -> Self {
        Self::new(None, Some(jobs))
    }

    fn new(topics: Option<Vec<JobState>>, files: Option<Vec<JobState>>) -> Self {
        let now = Utc::now();
        let mut checkpoint = Self {
            version: CHECKPOINT_VERSION.to_string(),
            start_time: now,
            last_update: now,
            topics,
            files,
            stats: CheckpointStats::default(),
        };
        checkpoint.recompute_stats();
        checkpoint
    }

    pub fn jobs(&self) -> &[JobState] {
        self.topics
            .as_deref()
            .or(self.files.as_deref())
            .unwrap_or(&[])
    }

    pub fn jobs_mut(&mut self) -> &mut Vec<JobState> {
        if self.topics.is_some() {
            self.topics.get_or_insert_with(Vec::new)
        } else {
            self.files.get_or_insert_with(Vec::new)
        }
    }

    /// Indices of jobs that still need work on resume.
    pub fn resumable_indices(&self) -> Vec<usize> {
        self.jobs()
            .iter()
            .enumerate()
            .filter(|(_, j)| matches!(j.status, JobStatus::Pending | JobStatus::Processing))
            .map(|(i, _)| i)
            .collect()
    }

    /// Recompute aggregate stats from the job list. Counters only ever
    /// accumulate; status moves one way except processing → pending on
    /// resume.
    pub fn recompute_stats(&mut self) {
        let jobs = self.jobs();
        self.stats = CheckpointStats {
            total_jobs: jobs.len() as u64,
            completed_jobs: jobs
                .iter()
                .filter(|j| j.status == JobStatus::Completed)
                .count() as u64,
            total_articles: jobs.iter().map(|j| j.articles_processed).sum(),
            total_chunks: jobs.iter().map(|j| j.chunks_created).sum(),
            total_errors: jobs.iter().map(|j| j.errors).sum(),
        };
        self.last_update = Utc::now();
    }
}

/// Atomic reader/writer for the checkpoint file. The orchestration side is
/// the only writer; the monitor only ever loads.
#[derive(Debug, Clone)]
pub struct CheckpointStore {
    path: PathBuf,
}

impl CheckpointStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    /// Serialize to a temp file in the target directory and rename over the
    /// destination, so readers never observe a half-written document.
    pub fn save(&self, checkpoint: &Checkpoint) -> Result<()> {
        let dir = self.path.parent().unwrap_or_else(|| Path::new("."));
        let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
        serde_json::to_writer_pretty(&mut tmp, checkpoint)?;
        tmp.flush()?;
        tmp.persist(&self.path)
            .map_err(|e| EvidexError::Io(e.error))?;
        Ok(())
    }

    pub fn load(&self) -> Result<Checkpoint> {
        let raw = std::fs::read_to_string(&self.path)?;
        Ok(serde_json::from_str(&raw)?)
    }
}
