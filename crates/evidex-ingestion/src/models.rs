//! Data models for the ingestion pipeline.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ── Article ───────────────────────────────────────────────────────────────────

/// A parsed PubMed record.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Article {
    /// PubMed identifier. Globally unique; the storage key.
    pub pmid: String,
    pub doi: Option<String>,
    pub pmc_id: Option<String>,

    pub title: String,
    /// Input order preserved.
    pub authors: Vec<Author>,
    pub journal: Journal,
    pub pub_date: PubDate,

    /// Full abstract text. For structured abstracts this is the
    /// `LABEL: text\n\n…` concatenation of the sections below.
    pub abstract_text: String,
    /// Populated only when at least two labelled `<AbstractText>` sections
    /// are present.
    pub abstract_sections: Vec<AbstractSection>,

    pub mesh_headings: Vec<MeshHeading>,
    pub publication_types: Vec<PublicationType>,
    pub chemicals: Vec<Chemical>,
    pub keywords: Vec<String>,

    /// Oxford CEBM hierarchy, 1 (strongest) through 5 (weakest).
    pub evidence_level: u8,
    pub study_design: Option<String>,
    pub sample_size: Option<u64>,
    pub url: String,
    pub full_text_url: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Author {
    pub last_name: String,
    pub fore_name: Option<String>,
    pub initials: Option<String>,
    pub affiliation: Option<String>,
    pub orcid: Option<String>,
}

impl Author {
    /// Citation form: "Lastname Initials".
    pub fn short(&self) -> String {
        match &self.initials {
            Some(i) if !i.is_empty() => format!("{} {}", self.last_name, i),
            _ => self.last_name.clone(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Journal {
    pub title: Option<String>,
    pub iso_abbreviation: Option<String>,
    pub issn: Option<String>,
    pub volume: Option<String>,
    pub issue: Option<String>,
    pub pages: Option<String>,
    pub nlm_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PubDate {
    pub year: i32,
    pub month: Option<u32>,
    pub day: Option<u32>,
    /// Free-form `<MedlineDate>` when no structured date existed.
    pub medline_date: Option<String>,
}

impl Default for PubDate {
    fn default() -> Self {
        Self {
            year: 0,
            month: None,
            day: None,
            medline_date: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AbstractSection {
    pub label: String,
    pub nlm_category: Option<String>,
    pub text: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MeshHeading {
    pub descriptor: String,
    pub ui: Option<String>,
    pub qualifiers: Vec<String>,
    pub major_topic: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublicationType {
    pub name: String,
    pub ui: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chemical {
    pub name: String,
    pub registry_number: Option<String>,
}

// ── Chunk ─────────────────────────────────────────────────────────────────────

/// Section type of a chunk, mapped from structured-abstract labels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SectionType {
    Title,
    Abstract,
    Background,
    Objective,
    Methods,
    Results,
    Conclusions,
    Discussion,
    FullAbstract,
}

impl SectionType {
    /// Infer the section type from a structured-abstract label
    /// (case-insensitive substring match).
    pub fn from_label(label: &str) -> Self {
        let l = label.to_lowercase();
        if l.contains("background") || l.contains("introduction") {
            SectionType::Background
        } else if l.contains("objective") || l.contains("aim") || l.contains("purpose") {
            SectionType::Objective
        } else if l.contains("method") {
            SectionType::Methods
        } else if l.contains("result") || l.contains("finding") {
            SectionType::Results
        } else if l.contains("conclusion") || l.contains("summary") {
            SectionType::Conclusions
        } else if l.contains("discussion") {
            SectionType::Discussion
        } else {
            SectionType::Abstract
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SectionType::Title => "title",
            SectionType::Abstract => "abstract",
            SectionType::Background => "background",
            SectionType::Objective => "objective",
            SectionType::Methods => "methods",
            SectionType::Results => "results",
            SectionType::Conclusions => "conclusions",
            SectionType::Discussion => "discussion",
            SectionType::FullAbstract => "full_abstract",
        }
    }
}

/// An embeddable unit of an article, carrying enough copied context to be
/// retrieved standalone. Upsert key: (pmid, chunk_index).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chunk {
    pub pmid: String,
    /// 0-based, strictly increasing within an article.
    pub chunk_index: usize,

    /// The raw text slice.
    pub content: String,
    /// The slice with the study-level context prefix prepended.
    pub content_with_context: String,
    pub section_type: SectionType,

    pub title: String,
    pub journal: Option<String>,
    pub publication_year: i32,
    pub doi: Option<String>,
    /// "Lastname Initials", input order.
    pub authors: Vec<String>,
    pub evidence_level: u8,
    pub study_design: Option<String>,
    pub sample_size: Option<u64>,
    pub mesh_terms: Vec<String>,
    pub mesh_major: Vec<String>,
    pub chemicals: Vec<String>,
    pub keywords: Vec<String>,

    /// ceil(len(content_with_context) / 4), computed once.
    pub token_estimate: usize,
}

/// A chunk paired with its embedding vector, ready for storage.
#[derive(Debug, Clone)]
pub struct EmbeddedChunk {
    pub chunk: Chunk,
    pub embedding: Vec<f32>,
}

// ── Errors by stage ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Fetch,
    Parse,
    Chunk,
    Embed,
    Store,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Fetch => "fetch",
            Stage::Parse => "parse",
            Stage::Chunk => "chunk",
            Stage::Embed => "embed",
            Stage::Store => "store",
        }
    }
}

/// One recorded pipeline failure. Per-item and per-batch failures accumulate;
/// they never abort the surrounding loop.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageError {
    pub stage: Stage,
    pub message: String,
    pub pmid: Option<String>,
    pub at: DateTime<Utc>,
}

impl StageError {
    pub fn new(stage: Stage, message: impl Into<String>) -> Self {
        Self {
            stage,
            message: message.into(),
            pmid: None,
            at: Utc::now(),
        }
    }

    pub fn for_pmid(stage: Stage, pmid: &str, message: impl Into<String>) -> Self {
        Self {
            stage,
            message: message.into(),
            pmid: Some(pmid.to_string()),
            at: Utc::now(),
        }
    }
}

// ── Jobs ──────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

/// What a job processes: a topic query or a local XML dump.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum JobKind {
    Topic {
        topic: String,
        #[serde(rename = "maxResults")]
        max_results: usize,
    },
    File {
        file: PathBuf,
    },
}

impl JobKind {
    /// Human-readable job label for logs and summaries.
    pub fn label(&self) -> String {
        match self {
            JobKind::Topic { topic, .. } => topic.clone(),
            JobKind::File { file } => file.display().to_string(),
        }
    }
}

/// A unit of work for the worker pool, with its cumulative counters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobState {
    #[serde(flatten)]
    pub kind: JobKind,
    pub status: JobStatus,
    pub articles_processed: u64,
    pub chunks_created: u64,
    pub errors: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl JobState {
    pub fn topic(topic: impl Into<String>, max_results: usize) -> Self {
        Self::new(JobKind::Topic {
            topic: topic.into(),
            max_results,
        })
    }

    pub fn file(path: impl Into<PathBuf>) -> Self {
        Self::new(JobKind::File { file: path.into() })
    }

    fn new(kind: JobKind) -> Self {
        Self {
            kind,
            status: JobStatus::Pending,
            articles_processed: 0,
            chunks_created: 0,
            errors: 0,
            started_at: None,
            completed_at: None,
        }
    }
}

// ── Run configuration ─────────────────────────────────────────────────────────

/// Frozen inputs to a run. Built once by the CLI, shared by all workers.
#[derive(Debug, Clone)]
pub struct IngestionConfig {
    pub max_per_topic: usize,
    pub chunking: crate::chunker::ChunkerConfig,
    pub from_year: Option<i32>,
    pub to_year: Option<i32>,
    /// `None` disables the language clause.
    pub language: Option<String>,
    pub require_abstract: bool,
    pub humans_only: bool,
    /// OR-ed into the search query when present.
    pub publication_types: Option<Vec<String>>,
    /// Weakest acceptable CEBM level; articles classified above it are
    /// dropped before chunking. 2 keeps meta-analyses, guidelines and RCTs.
    pub min_evidence_level: Option<u8>,
    pub workers: usize,
    pub fetch_batch_size: usize,
    pub embed_batch_size: usize,
    pub store_batch_size: usize,
    pub ncbi_api_key: Option<String>,
}

impl Default for IngestionConfig {
    fn default() -> Self {
        Self {
            max_per_topic: 100,
            chunking: crate::chunker::ChunkerConfig::default(),
            from_year: None,
            to_year: None,
            language: Some("english".to_string()),
            require_abstract: true,
            humans_only: true,
            publication_types: None,
            min_evidence_level: None,
            workers: 5,
            fetch_batch_size: 200,
            embed_batch_size: 200,
            store_batch_size: 15,
            ncbi_api_key: None,
        }
    }
}

/// Publication types accepted under `--high-evidence` (CEBM levels 1–2).
pub const HIGH_EVIDENCE_TYPES: &[&str] = &[
    "Meta-Analysis",
    "Systematic Review",
    "Randomized Controlled Trial",
    "Practice Guideline",
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_author_short_form() {
        let a = Author {
            last_name: "Smith".to_string(),
            fore_name: Some("John".to_string()),
            initials: Some("JA".to_string()),
            affiliation: None,
            orcid: None,
        };
        assert_eq!(a.short(), "Smith JA");

        let no_initials = Author {
            last_name: "Osler".to_string(),
            ..Default::default()
        };
        assert_eq!(no_initials.short(), "Osler");
    }

    #[test]
    fn test_section_type_from_label() {
        assert_eq!(SectionType::from_label("BACKGROUND"), SectionType::Background);
        assert_eq!(SectionType::from_label("Introduction"), SectionType::Background);
        assert_eq!(SectionType::from_label("Aims"), SectionType::Objective);
        assert_eq!(SectionType::from_label("METHODS AND MATERIALS"), SectionType::Methods);
        assert_eq!(SectionType::from_label("Main findings"), SectionType::Results);
        assert_eq!(SectionType::from_label("CONCLUSIONS"), SectionType::Conclusions);
        assert_eq!(SectionType::from_label("Discussion"), SectionType::Discussion);
        assert_eq!(SectionType::from_label("UNLABELLED"), SectionType::Abstract);
    }

    #[test]
    fn test_job_state_serde_round_trip() {
        let job = JobState::topic("type 2 diabetes management", 500);
        let json = serde_json::to_string(&job).unwrap();
        assert!(json.contains("\"topic\""));
        assert!(json.contains("\"maxResults\":500"));
        assert!(json.contains("\"status\":\"pending\""));

        let back: JobState = serde_json::from_str(&json).unwrap();
        match back.kind {
            JobKind::Topic { topic, max_results } => {
                assert_eq!(topic, "type 2 diabetes management");
                assert_eq!(max_results, 500);
            }
            JobKind::File { .. } => panic!("expected topic job"),
        }
    }

    #[test]
    fn test_file_job_serde_round_trip() {
        let job = JobState::file("/data/pubmed24n0001.xml");
        let json = serde_json::to_string(&job).unwrap();
        let back: JobState = serde_json::from_str(&json).unwrap();
        assert!(matches!(back.kind, JobKind::File { .. }));
    }
}
