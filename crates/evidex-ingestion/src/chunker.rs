//! Medical-context-aware chunking.
//!
//! Every chunk carries a study-level context prefix (title, design, journal,
//! year, major MeSH terms) so that a retrieved chunk is interpretable on its
//! own. Four strategies cover structured and flat abstracts; `hybrid` picks
//! per article and is the default.

use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::models::{Article, Chunk, SectionType};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChunkStrategy {
    Section,
    Sentence,
    Sliding,
    Hybrid,
}

#[derive(Debug, Clone)]
pub struct ChunkerConfig {
    pub strategy: ChunkStrategy,
    pub max_chunk_tokens: usize,
    pub min_chunk_tokens: usize,
    pub overlap_tokens: usize,
    pub include_title: bool,
    pub include_mesh: bool,
    pub include_study_info: bool,
}

impl Default for ChunkerConfig {
    fn default() -> Self {
        Self {
            strategy: ChunkStrategy::Hybrid,
            max_chunk_tokens: 512,
            min_chunk_tokens: 100,
            overlap_tokens: 50,
            include_title: true,
            include_mesh: true,
            include_study_info: true,
        }
    }
}

/// Rough token estimate: ceil(len / 4). Computed once per chunk over
/// `content_with_context`.
pub fn estimate_tokens(text: &str) -> usize {
    text.len().div_ceil(4)
}

/// Chunk one article. Chunk indices are 0-based and gapless in emission
/// order; every chunk inherits the article's evidence level and copied
/// retrieval context.
pub fn chunk_article(article: &Article, config: &ChunkerConfig) -> Vec<Chunk> {
    let prefix = context_prefix(article, config);
    let mut builder = ChunkBuilder {
        article,
        prefix: &prefix,
        chunks: Vec::new(),
    };

    if article.abstract_text.trim().is_empty() {
        // Nothing to slice; the title alone is still a retrievable unit.
        if !article.title.trim().is_empty() {
            builder.emit(article.title.clone(), SectionType::Title);
        }
        return builder.chunks;
    }

    let strategy = match config.strategy {
        ChunkStrategy::Hybrid => {
            if article.abstract_sections.len() >= 2 {
                ChunkStrategy::Section
            } else {
                ChunkStrategy::Sentence
            }
        }
        other => other,
    };

    match strategy {
        ChunkStrategy::Section if article.abstract_sections.len() >= 2 => {
            chunk_by_section(&mut builder, config)
        }
        ChunkStrategy::Section | ChunkStrategy::Sentence => chunk_by_sentence(&mut builder, config),
        ChunkStrategy::Sliding => chunk_sliding(&mut builder, config),
        ChunkStrategy::Hybrid => unreachable!("hybrid resolved above"),
    }

    builder.chunks
}

// ── Context prefix (§ every chunk) ────────────────────────────────────────────

/// Bracketed context lines, newline-separated, followed by a blank line:
/// title, study info, journal + year (always), top-5 major MeSH terms.
fn context_prefix(article: &Article, config: &ChunkerConfig) -> String {
    let mut lines = Vec::new();

    if config.include_title && !article.title.is_empty() {
        lines.push(format!("[Title: {}]", article.title));
    }

    if config.include_study_info {
        let study = match (&article.study_design, article.sample_size) {
            (Some(design), Some(n)) => Some(format!("{design} | n={n}")),
            (Some(design), None) => Some(design.clone()),
            (None, Some(n)) => Some(format!("n={n}")),
            (None, None) => None,
        };
        if let Some(study) = study {
            lines.push(format!("[Study: {study}]"));
        }
    }

    let journal = article
        .journal
        .title
        .as_deref()
        .or(article.journal.iso_abbreviation.as_deref())
        .unwrap_or("Unknown journal");
    lines.push(format!("[{journal}, {}]", article.pub_date.year));

    if config.include_mesh {
        let major: Vec<&str> = article
            .mesh_headings
            .iter()
            .filter(|m| m.major_topic)
            .take(5)
            .map(|m| m.descriptor.as_str())
            .collect();
        if !major.is_empty() {
            lines.push(format!("[MeSH: {}]", major.join(", ")));
        }
    }

    format!("{}\n\n", lines.join("\n"))
}

struct ChunkBuilder<'a> {
    article: &'a Article,
    prefix: &'a str,
    chunks: Vec<Chunk>,
}

impl ChunkBuilder<'_> {
    fn emit(&mut self, content: String, section_type: SectionType) {
        let a = self.article;
        let content_with_context = format!("{}{}", self.prefix, content);
        let token_estimate = estimate_tokens(&content_with_context);
        self.chunks.push(Chunk {
            pmid: a.pmid.clone(),
            chunk_index: self.chunks.len(),
            content,
            content_with_context,
            section_type,
            title: a.title.clone(),
            journal: a.journal.title.clone(),
            publication_year: a.pub_date.year,
            doi: a.doi.clone(),
            authors: a.authors.iter().map(|au| au.short()).collect(),
            evidence_level: a.evidence_level,
            study_design: a.study_design.clone(),
            sample_size: a.sample_size,
            mesh_terms: a.mesh_headings.iter().map(|m| m.descriptor.clone()).collect(),
            mesh_major: a
                .mesh_headings
                .iter()
                .filter(|m| m.major_topic)
                .map(|m| m.descriptor.clone())
                .collect(),
            chemicals: a.chemicals.iter().map(|c| c.name.clone()).collect(),
            keywords: a.keywords.clone(),
            token_estimate,
        });
    }
}

// ── Section strategy ──────────────────────────────────────────────────────────

/// One chunk per section; sections below `min_chunk_tokens` merge with their
/// neighbours, sections above `max_chunk_tokens` split into sentence groups
/// that keep the section's label prefix.
fn chunk_by_section(builder: &mut ChunkBuilder<'_>, config: &ChunkerConfig) {
    struct Pending {
        text: String,
        tokens: usize,
        section_type: SectionType,
    }
    fn flush(builder: &mut ChunkBuilder<'_>, pending: &mut Option<Pending>) {
        if let Some(p) = pending.take() {
            builder.emit(p.text, p.section_type);
        }
    }
    let mut pending: Option<Pending> = None;

    for section in &builder.article.abstract_sections {
        let rendered = format!("{}: {}", section.label, section.text);
        let tokens = estimate_tokens(&rendered);
        let section_type = SectionType::from_label(&section.label);

        if tokens > config.max_chunk_tokens {
            flush(builder, &mut pending);
            // Oversized section: sentence groups, each re-prefixed with the label.
            for group in group_sentences(
                &split_sentences(&section.text),
                config.max_chunk_tokens.saturating_sub(estimate_tokens(&section.label) + 2),
                0,
            ) {
                builder.emit(format!("{}: {}", section.label, group), section_type);
            }
            continue;
        }

        let fits = pending
            .as_ref()
            .is_some_and(|p| p.tokens + tokens <= config.max_chunk_tokens);
        if fits {
            if let Some(p) = pending.as_mut() {
                p.text.push_str("\n\n");
                p.text.push_str(&rendered);
                p.tokens += tokens;
            }
        } else {
            flush(builder, &mut pending);
            pending = Some(Pending {
                text: rendered,
                tokens,
                section_type,
            });
        }

        // A section that can stand alone does; only undersized ones keep
        // accumulating neighbours.
        if pending.as_ref().is_some_and(|p| p.tokens >= config.min_chunk_tokens) {
            flush(builder, &mut pending);
        }
    }
    flush(builder, &mut pending);
}

// ── Sentence strategy ─────────────────────────────────────────────────────────

fn chunk_by_sentence(builder: &mut ChunkBuilder<'_>, config: &ChunkerConfig) {
    let sentences = split_sentences(&builder.article.abstract_text);
    let groups = group_sentences(&sentences, config.max_chunk_tokens, config.overlap_tokens);

    // A single group means the whole abstract fits in one chunk.
    let single = groups.len() == 1;
    for group in groups {
        let section_type = if single {
            SectionType::FullAbstract
        } else {
            SectionType::Abstract
        };
        builder.emit(group, section_type);
    }
}

/// Greedily pack sentences into groups bounded by `max_tokens`. When a new
/// group starts, up to `overlap_tokens` of trailing sentences from the
/// previous group are carried over as overlap.
fn group_sentences(sentences: &[String], max_tokens: usize, overlap_tokens: usize) -> Vec<String> {
    let mut groups = Vec::new();
    let mut current: Vec<&str> = Vec::new();
    let mut current_tokens = 0usize;

    for sentence in sentences {
        let tokens = estimate_tokens(sentence);
        if !current.is_empty() && current_tokens + tokens > max_tokens {
            groups.push(current.join(" "));

            // Carry trailing sentences while they fit inside the overlap.
            let mut overlap: Vec<&str> = Vec::new();
            let mut overlap_size = 0;
            for s in current.iter().rev() {
                let t = estimate_tokens(s);
                if overlap_size + t > overlap_tokens {
                    break;
                }
                overlap.insert(0, s);
                overlap_size += t;
            }
            current = overlap;
            current_tokens = overlap_size;
        }
        current.push(sentence);
        current_tokens += tokens;
    }
    if !current.is_empty() {
        groups.push(current.join(" "));
    }
    groups
}

// ── Sliding-window strategy ───────────────────────────────────────────────────

/// Expand each window to `max_chunk_tokens`, then advance the start by half
/// the window length.
fn chunk_sliding(builder: &mut ChunkBuilder<'_>, config: &ChunkerConfig) {
    let sentences = split_sentences(&builder.article.abstract_text);
    if sentences.is_empty() {
        return;
    }

    let mut windows = Vec::new();
    let mut start = 0usize;
    loop {
        let mut end = start;
        let mut tokens = 0usize;
        while end < sentences.len() {
            let t = estimate_tokens(&sentences[end]);
            if end > start && tokens + t > config.max_chunk_tokens {
                break;
            }
            tokens += t;
            end += 1;
        }
        windows.push(sentences[start..end].join(" "));
        if end >= sentences.len() {
            break;
        }
        start += ((end - start) / 2).max(1);
    }

    let single = windows.len() == 1;
    for window in windows {
        let section_type = if single {
            SectionType::FullAbstract
        } else {
            SectionType::Abstract
        };
        builder.emit(window, section_type);
    }
}

// ── Sentence splitting ────────────────────────────────────────────────────────

/// Words that end with a period without ending a sentence. "et al." is
/// covered by its trailing word.
const ABBREVIATIONS: &[&str] = &[
    "dr", "al", "vs", "i.e", "e.g", "fig", "tab", "no", "vol", "p", "n",
];

/// Split text into sentences, protecting medical abbreviations and decimal
/// numbers (a digit on both sides of a period never splits).
pub fn split_sentences(text: &str) -> Vec<String> {
    let chars: Vec<char> = text.chars().collect();
    let mut sentences = Vec::new();
    let mut start = 0usize;

    for i in 0..chars.len() {
        let c = chars[i];
        if c != '.' && c != '!' && c != '?' {
            continue;
        }

        let next = chars.get(i + 1).copied();
        // Decimal number: digit.digit
        if c == '.'
            && i > 0
            && chars[i - 1].is_ascii_digit()
            && next.is_some_and(|n| n.is_ascii_digit())
        {
            continue;
        }
        // A boundary needs trailing whitespace (or end of text).
        if let Some(n) = next {
            if !n.is_whitespace() {
                continue;
            }
        }
        if c == '.' {
            // Preceding word, lowercased, without the final period.
            let word_start = (0..i).rev().find(|&j| chars[j].is_whitespace()).map_or(0, |j| j + 1);
            let word: String = chars[word_start..i].iter().collect::<String>().to_lowercase();
            if ABBREVIATIONS.contains(&word.as_str()) {
                continue;
            }
            // A following lowercase letter means the sentence keeps going.
            let after = chars[i + 1..].iter().find(|ch| !ch.is_whitespace());
            if after.is_some_and(|ch| ch.is_lowercase()) {
                continue;
            }
        }

        let sentence: String = chars[start..=i].iter().collect();
        let sentence = sentence.trim();
        if !sentence.is_empty() {
            sentences.push(sentence.to_string());
        }
        start = i + 1;
    }

    let tail: String = chars[start.min(chars.len())..].iter().collect();
    let tail = tail.trim();
    if !tail.is_empty() {
        sentences.push(tail.to_string());
    }
    sentences
}

// ── Integrity validation ──────────────────────────────────────────────────────

lazy_static! {
    static ref STAT_MARKER: Regex = Regex::new(r"(?i)\bp\s*=|\bp\s*<|\bCI\b").unwrap();
    static ref STAT_COMPLETE: Regex = Regex::new(
        r"(?i)(\bp\s*[=<>]\s*0?\.\d+)|(\bCI\b[,:]?\s*-?\d)|(\d+(?:\.\d+)?\s*(?:to|-|–)\s*-?\d+(?:\.\d+)?)"
    )
    .unwrap();
    static ref NUMBER: Regex = Regex::new(r"\d+(?:\.\d+)?").unwrap();
}

/// Advisory checks on a chunk's content. Warnings, never errors: a chunk
/// that trips these is still stored.
pub fn validate_chunk(chunk: &Chunk) -> Vec<String> {
    let mut warnings = Vec::new();
    let text = &chunk.content;

    if STAT_MARKER.is_match(text) && !STAT_COMPLETE.is_match(text) {
        warnings.push("incomplete statistical statement".to_string());
    }
    if text.contains("respectively") && NUMBER.find_iter(text).count() < 2 {
        warnings.push("'respectively' without clear antecedents".to_string());
    }
    warnings
}
