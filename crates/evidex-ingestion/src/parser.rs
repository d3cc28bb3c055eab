//! PubMed XML parsing.
//!
//! Turns efetch responses (or bulk-dump article blobs) into typed [`Article`]
//! records with a quick-xml event state machine. The document is first split
//! into per-article strings so one malformed article is logged and skipped
//! without aborting its siblings.

use lazy_static::lazy_static;
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use regex::Regex;
use tracing::warn;

use evidex_common::error::{EvidexError, Result};

use crate::classify::classify;
use crate::models::{
    AbstractSection, Article, Author, Chemical, MeshHeading, PubDate, PublicationType,
};
use crate::stream::extract_articles;

const PUBMED_ARTICLE_URL: &str = "https://pubmed.ncbi.nlm.nih.gov";
const PMC_ARTICLE_URL: &str = "https://www.ncbi.nlm.nih.gov/pmc/articles";

/// Parse a raw XML document containing one or more `<PubmedArticle>`
/// elements. Malformed articles are skipped with a warning.
pub fn parse(xml: &str) -> Vec<Article> {
    let mut articles = Vec::new();
    for blob in extract_articles(xml) {
        match parse_article(&blob) {
            Ok(article) => articles.push(article),
            Err(e) => warn!("skipping unparseable article: {e}"),
        }
    }
    articles
}

// ── Single-article state machine ──────────────────────────────────────────────

/// Element names whose text content we collect. Context (the element path)
/// decides where the text lands.
const CAPTURED: &[&str] = &[
    "PMID",
    "ArticleTitle",
    "AbstractText",
    "LastName",
    "ForeName",
    "Initials",
    "Affiliation",
    "Identifier",
    "Title",
    "ISOAbbreviation",
    "ISSN",
    "Volume",
    "Issue",
    "MedlinePgn",
    "NlmUniqueID",
    "Year",
    "Month",
    "Day",
    "MedlineDate",
    "DescriptorName",
    "QualifierName",
    "PublicationType",
    "RegistryNumber",
    "NameOfSubstance",
    "Keyword",
    "ELocationID",
    "ArticleId",
];

#[derive(Default)]
struct DateParts {
    year: Option<i32>,
    month: Option<u32>,
    day: Option<u32>,
}

#[derive(Default)]
struct ArticleBuilder {
    pmid: Option<String>,
    title: String,
    abstract_pairs: Vec<(Option<String>, Option<String>, String)>,
    authors: Vec<Author>,
    cur_author: Option<Author>,
    journal_title: Option<String>,
    iso_abbreviation: Option<String>,
    issn: Option<String>,
    volume: Option<String>,
    issue: Option<String>,
    pages: Option<String>,
    nlm_id: Option<String>,
    pub_date: DateParts,
    medline_date: Option<String>,
    article_date: DateParts,
    date_completed: DateParts,
    mesh: Vec<MeshHeading>,
    cur_mesh: Option<MeshHeading>,
    publication_types: Vec<PublicationType>,
    chemicals: Vec<Chemical>,
    cur_chemical: Option<Chemical>,
    keywords: Vec<String>,
    doi_elocation: Option<String>,
    doi_article_id: Option<String>,
    pmc_id: Option<String>,
}

/// Parse exactly one `<PubmedArticle>` blob.
pub fn parse_article(xml: &str) -> Result<Article> {
    let mut reader = Reader::from_str(xml);
    let mut builder = ArticleBuilder::default();

    let mut path: Vec<String> = Vec::new();
    // (element name, depth it opened at, its attributes)
    let mut capture: Option<(String, usize, Vec<(String, String)>)> = None;
    let mut text = String::new();
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(ref e)) => {
                let name = local_name(e);
                match name.as_str() {
                    "Author" => builder.cur_author = Some(Author::default()),
                    "MeshHeading" => {
                        builder.cur_mesh = Some(MeshHeading {
                            descriptor: String::new(),
                            ui: None,
                            qualifiers: Vec::new(),
                            major_topic: false,
                        })
                    }
                    "Chemical" => {
                        builder.cur_chemical = Some(Chemical {
                            name: String::new(),
                            registry_number: None,
                        })
                    }
                    _ => {}
                }
                if capture.is_none() && CAPTURED.contains(&name.as_str()) {
                    capture = Some((name.clone(), path.len(), attributes(e)));
                    text.clear();
                }
                path.push(name);
            }
            Ok(Event::Text(ref e)) => {
                if capture.is_some() {
                    match e.unescape() {
                        Ok(t) => text.push_str(&t),
                        Err(_) => text.push_str(&String::from_utf8_lossy(e.as_ref())),
                    }
                }
            }
            Ok(Event::CData(ref e)) => {
                if capture.is_some() {
                    text.push_str(&String::from_utf8_lossy(e.as_ref()));
                }
            }
            Ok(Event::End(ref e)) => {
                let name = local_name_end(e.name().as_ref());
                path.pop();
                let closes_capture = matches!(
                    &capture,
                    Some((cname, depth, _)) if *cname == name && path.len() == *depth
                );
                if closes_capture {
                    if let Some((_, _, attrs)) = capture.take() {
                        let value = normalize_ws(&text);
                        dispatch(&mut builder, &name, &attrs, value, &path);
                    }
                }
                match name.as_str() {
                    "Author" => {
                        if let Some(author) = builder.cur_author.take() {
                            if !author.last_name.is_empty() {
                                builder.authors.push(author);
                            }
                        }
                    }
                    "MeshHeading" => {
                        if let Some(mesh) = builder.cur_mesh.take() {
                            if !mesh.descriptor.is_empty() {
                                builder.mesh.push(mesh);
                            }
                        }
                    }
                    "Chemical" => {
                        if let Some(chem) = builder.cur_chemical.take() {
                            if !chem.name.is_empty() {
                                builder.chemicals.push(chem);
                            }
                        }
                    }
                    _ => {}
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(EvidexError::Xml(format!("malformed article XML: {e}"))),
            _ => {}
        }
        buf.clear();
    }

    builder.build()
}

fn local_name(e: &BytesStart) -> String {
    String::from_utf8_lossy(e.local_name().as_ref()).into_owned()
}

fn local_name_end(raw: &[u8]) -> String {
    let name = String::from_utf8_lossy(raw);
    match name.rsplit_once(':') {
        Some((_, local)) => local.to_string(),
        None => name.into_owned(),
    }
}

fn attributes(e: &BytesStart) -> Vec<(String, String)> {
    e.attributes()
        .flatten()
        .map(|a| {
            (
                String::from_utf8_lossy(a.key.as_ref()).into_owned(),
                a.unescape_value()
                    .map(|v| v.into_owned())
                    .unwrap_or_default(),
            )
        })
        .collect()
}

fn attr<'a>(attrs: &'a [(String, String)], name: &str) -> Option<&'a str> {
    attrs
        .iter()
        .find(|(k, _)| k == name)
        .map(|(_, v)| v.as_str())
}

fn ends_with(path: &[String], suffix: &[&str]) -> bool {
    path.len() >= suffix.len()
        && path[path.len() - suffix.len()..]
            .iter()
            .zip(suffix)
            .all(|(a, b)| a == b)
}

/// Route captured text to the right builder field based on where it sat.
fn dispatch(
    b: &mut ArticleBuilder,
    name: &str,
    attrs: &[(String, String)],
    value: String,
    path: &[String],
) {
    if value.is_empty() && name != "AbstractText" {
        return;
    }
    match name {
        // Only the citation's own PMID; CommentsCorrections carry PMIDs too.
        "PMID" => {
            if ends_with(path, &["PubmedArticle", "MedlineCitation"]) && b.pmid.is_none() {
                b.pmid = Some(value);
            }
        }
        "ArticleTitle" => b.title = value,
        "AbstractText" => {
            if ends_with(path, &["Article", "Abstract"]) {
                let label = attr(attrs, "Label").map(str::to_string);
                let category = attr(attrs, "NlmCategory").map(str::to_string);
                b.abstract_pairs.push((label, category, value));
            }
        }
        "LastName" => {
            if let Some(a) = b.cur_author.as_mut() {
                a.last_name = value;
            }
        }
        "ForeName" => {
            if let Some(a) = b.cur_author.as_mut() {
                a.fore_name = Some(value);
            }
        }
        "Initials" => {
            if let Some(a) = b.cur_author.as_mut() {
                a.initials = Some(value);
            }
        }
        "Affiliation" => {
            if let Some(a) = b.cur_author.as_mut() {
                if a.affiliation.is_none() {
                    a.affiliation = Some(value);
                }
            }
        }
        "Identifier" => {
            if attr(attrs, "Source") == Some("ORCID") {
                if let Some(a) = b.cur_author.as_mut() {
                    a.orcid = Some(value);
                }
            }
        }
        "Title" => {
            if ends_with(path, &["Journal"]) {
                b.journal_title = Some(value);
            }
        }
        "ISOAbbreviation" => b.iso_abbreviation = Some(value),
        "ISSN" => {
            if ends_with(path, &["Journal"]) {
                b.issn = Some(value);
            }
        }
        "Volume" => {
            if ends_with(path, &["JournalIssue"]) {
                b.volume = Some(value);
            }
        }
        "Issue" => {
            if ends_with(path, &["JournalIssue"]) {
                b.issue = Some(value);
            }
        }
        "MedlinePgn" => b.pages = Some(value),
        "NlmUniqueID" => b.nlm_id = Some(value),
        "Year" | "Month" | "Day" => {
            let parts = if ends_with(path, &["PubDate"]) {
                Some(&mut b.pub_date)
            } else if ends_with(path, &["ArticleDate"]) {
                Some(&mut b.article_date)
            } else if ends_with(path, &["DateCompleted"]) {
                Some(&mut b.date_completed)
            } else {
                None
            };
            if let Some(parts) = parts {
                match name {
                    "Year" => parts.year = value.parse().ok(),
                    "Month" => parts.month = parse_month(&value),
                    _ => parts.day = value.parse().ok(),
                }
            }
        }
        "MedlineDate" => b.medline_date = Some(value),
        "DescriptorName" => {
            if let Some(m) = b.cur_mesh.as_mut() {
                m.descriptor = value;
                m.ui = attr(attrs, "UI").map(str::to_string);
                m.major_topic = attr(attrs, "MajorTopicYN") == Some("Y");
            }
        }
        "QualifierName" => {
            if let Some(m) = b.cur_mesh.as_mut() {
                m.qualifiers.push(value);
            }
        }
        "PublicationType" => b.publication_types.push(PublicationType {
            name: value,
            ui: attr(attrs, "UI").map(str::to_string),
        }),
        "RegistryNumber" => {
            if let Some(c) = b.cur_chemical.as_mut() {
                // NCBI uses "0" for substances without a registry entry.
                if value != "0" {
                    c.registry_number = Some(value);
                }
            }
        }
        "NameOfSubstance" => {
            if let Some(c) = b.cur_chemical.as_mut() {
                c.name = value;
            }
        }
        "Keyword" => b.keywords.push(value),
        "ELocationID" => {
            if attr(attrs, "EIdType") == Some("doi") && b.doi_elocation.is_none() {
                b.doi_elocation = Some(value);
            }
        }
        "ArticleId" => match attr(attrs, "IdType") {
            Some("doi") if b.doi_article_id.is_none() => b.doi_article_id = Some(value),
            Some("pmc") if b.pmc_id.is_none() => b.pmc_id = Some(value),
            _ => {}
        },
        _ => {}
    }
}

impl ArticleBuilder {
    fn build(self) -> Result<Article> {
        let pmid = self
            .pmid
            .ok_or_else(|| EvidexError::Xml("article without a PMID".to_string()))?;

        let (abstract_text, abstract_sections) = assemble_abstract(&self.abstract_pairs);

        let pub_date = resolve_pub_date(
            &self.article_date,
            &self.pub_date,
            self.medline_date,
            &self.date_completed,
        )
        .ok_or_else(|| EvidexError::Xml(format!("article {pmid} has no publication year")))?;

        let type_names: Vec<&str> = self
            .publication_types
            .iter()
            .map(|t| t.name.as_str())
            .collect();
        let evidence_level = classify(&type_names);
        let study_design = study_design(&type_names);
        let sample_size = extract_sample_size(&abstract_text);

        let url = format!("{PUBMED_ARTICLE_URL}/{pmid}/");
        let full_text_url = self
            .pmc_id
            .as_deref()
            .map(|pmc| format!("{PMC_ARTICLE_URL}/{pmc}/"));

        Ok(Article {
            pmid,
            doi: self.doi_elocation.or(self.doi_article_id),
            pmc_id: self.pmc_id,
            title: self.title,
            authors: self.authors,
            journal: crate::models::Journal {
                title: self.journal_title,
                iso_abbreviation: self.iso_abbreviation,
                issn: self.issn,
                volume: self.volume,
                issue: self.issue,
                pages: self.pages,
                nlm_id: self.nlm_id,
            },
            pub_date,
            abstract_text,
            abstract_sections,
            mesh_headings: self.mesh,
            publication_types: self.publication_types,
            chemicals: self.chemicals,
            keywords: self.keywords,
            evidence_level,
            study_design,
            sample_size,
            url,
            full_text_url,
        })
    }
}

/// Structured abstracts (two or more labelled `<AbstractText>` children)
/// keep their sections; the full abstract is their `LABEL: text` rendering.
fn assemble_abstract(
    pairs: &[(Option<String>, Option<String>, String)],
) -> (String, Vec<AbstractSection>) {
    let labelled = pairs.iter().filter(|(l, _, _)| l.is_some()).count();
    if labelled >= 2 {
        let sections: Vec<AbstractSection> = pairs
            .iter()
            .filter_map(|(label, category, text)| {
                label.as_ref().map(|l| AbstractSection {
                    label: l.clone(),
                    nlm_category: category.clone(),
                    text: text.clone(),
                })
            })
            .collect();
        let rendered = sections
            .iter()
            .map(|s| format!("{}: {}", s.label, s.text))
            .collect::<Vec<_>>()
            .join("\n\n");
        (rendered, sections)
    } else {
        let flat = pairs
            .iter()
            .map(|(_, _, text)| text.as_str())
            .filter(|t| !t.is_empty())
            .collect::<Vec<_>>()
            .join("\n\n");
        (flat, Vec::new())
    }
}

/// Publication date preference: ArticleDate, then Journal/PubDate, then a
/// year pulled out of MedlineDate, then DateCompleted.
fn resolve_pub_date(
    article_date: &DateParts,
    pub_date: &DateParts,
    medline_date: Option<String>,
    date_completed: &DateParts,
) -> Option<PubDate> {
    if let Some(year) = article_date.year {
        return Some(PubDate {
            year,
            month: article_date.month,
            day: article_date.day,
            medline_date,
        });
    }
    if let Some(year) = pub_date.year {
        return Some(PubDate {
            year,
            month: pub_date.month,
            day: pub_date.day,
            medline_date,
        });
    }
    if let Some(raw) = &medline_date {
        if let Some(year) = MEDLINE_YEAR.find(raw).and_then(|m| m.as_str().parse().ok()) {
            return Some(PubDate {
                year,
                month: None,
                day: None,
                medline_date,
            });
        }
    }
    date_completed.year.map(|year| PubDate {
        year,
        month: date_completed.month,
        day: date_completed.day,
        medline_date,
    })
}

fn parse_month(value: &str) -> Option<u32> {
    if let Ok(n) = value.parse::<u32>() {
        return (1..=12).contains(&n).then_some(n);
    }
    let month = match value.get(..3)?.to_ascii_lowercase().as_str() {
        "jan" => 1,
        "feb" => 2,
        "mar" => 3,
        "apr" => 4,
        "may" => 5,
        "jun" => 6,
        "jul" => 7,
        "aug" => 8,
        "sep" => 9,
        "oct" => 10,
        "nov" => 11,
        "dec" => 12,
        _ => return None,
    };
    Some(month)
}

/// Collapse whitespace runs and trim. Inline markup inside text nodes has
/// already been flattened by the event loop.
fn normalize_ws(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

// ── Derived-field heuristics ──────────────────────────────────────────────────

lazy_static! {
    static ref MEDLINE_YEAR: Regex = Regex::new(r"\b(1[89]|20)\d{2}\b").unwrap();
    static ref SAMPLE_PATTERNS: Vec<Regex> = vec![
        Regex::new(r"(?i)\bn\s*=\s*([\d,]+)").unwrap(),
        Regex::new(r"(?i)\b([\d,]+)\s+(?:patients|participants|subjects|individuals)").unwrap(),
        Regex::new(r"(?i)\bsample\s*(?:size)?\s*:?\s*(?:of\s+)?([\d,]+)").unwrap(),
        Regex::new(r"(?i)\benrolled\s+([\d,]+)").unwrap(),
        Regex::new(r"(?i)\bincluded\s+([\d,]+)\s+(?:patients|participants)").unwrap(),
    ];
}

/// Pull a plausible sample size out of abstract text. Patterns are tried in
/// order; the first match with a value in (0, 10_000_000) wins.
pub fn extract_sample_size(abstract_text: &str) -> Option<u64> {
    for pattern in SAMPLE_PATTERNS.iter() {
        if let Some(caps) = pattern.captures(abstract_text) {
            let digits: String = caps[1].chars().filter(|c| c.is_ascii_digit()).collect();
            if let Ok(n) = digits.parse::<u64>() {
                if n > 0 && n < 10_000_000 {
                    return Some(n);
                }
            }
        }
    }
    None
}

/// Study design label from publication types, strongest design first.
pub fn study_design(publication_types: &[&str]) -> Option<String> {
    const PRIORITY: &[(&str, &str)] = &[
        ("meta-analysis", "Meta-Analysis"),
        ("systematic review", "Systematic Review"),
        ("randomized controlled trial", "Randomized Controlled Trial"),
        ("clinical trial", "Clinical Trial"),
        ("cohort", "Cohort Study"),
        ("case-control", "Case-Control Study"),
        ("case report", "Case Report"),
        ("review", "Review"),
        ("guideline", "Clinical Guideline"),
    ];
    let lowered: Vec<String> = publication_types
        .iter()
        .map(|t| t.to_lowercase())
        .collect();
    for (needle, label) in PRIORITY {
        if lowered.iter().any(|t| t.contains(needle)) {
            return Some((*label).to_string());
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    const STRUCTURED: &str = r#"<?xml version="1.0"?>
<PubmedArticleSet>
  <PubmedArticle>
    <MedlineCitation>
      <PMID Version="1">31034221</PMID>
      <DateCompleted><Year>2019</Year><Month>06</Month><Day>12</Day></DateCompleted>
      <Article PubModel="Print-Electronic">
        <Journal>
          <ISSN IssnType="Electronic">1533-4406</ISSN>
          <JournalIssue CitedMedium="Internet">
            <Volume>380</Volume>
            <Issue>18</Issue>
            <PubDate><Year>2019</Year><Month>May</Month><Day>02</Day></PubDate>
          </JournalIssue>
          <Title>The New England journal of medicine</Title>
          <ISOAbbreviation>N Engl J Med</ISOAbbreviation>
        </Journal>
        <ArticleTitle>Dapagliflozin in patients with chronic kidney disease.</ArticleTitle>
        <Pagination><MedlinePgn>1724-1734</MedlinePgn></Pagination>
        <ELocationID EIdType="doi" ValidYN="Y">10.1056/NEJMoa1811744</ELocationID>
        <Abstract>
          <AbstractText Label="BACKGROUND" NlmCategory="BACKGROUND">Chronic kidney disease progresses despite therapy.</AbstractText>
          <AbstractText Label="METHODS" NlmCategory="METHODS">We enrolled 4304 participants in a randomized design with n = 2152 per arm.</AbstractText>
          <AbstractText Label="RESULTS" NlmCategory="RESULTS">The hazard ratio was 0.61 (95% CI, 0.51 to 0.72).</AbstractText>
          <AbstractText Label="CONCLUSIONS" NlmCategory="CONCLUSIONS">Treatment reduced progression.</AbstractText>
        </Abstract>
        <AuthorList CompleteYN="Y">
          <Author ValidYN="Y">
            <LastName>Heerspink</LastName>
            <ForeName>Hiddo J L</ForeName>
            <Initials>HJL</Initials>
            <AffiliationInfo><Affiliation>University of Groningen.</Affiliation></AffiliationInfo>
            <Identifier Source="ORCID">0000-0002-3126-3730</Identifier>
          </Author>
          <Author ValidYN="Y">
            <LastName>Wheeler</LastName>
            <ForeName>David C</ForeName>
            <Initials>DC</Initials>
          </Author>
        </AuthorList>
        <PublicationTypeList>
          <PublicationType UI="D016449">Randomized Controlled Trial</PublicationType>
          <PublicationType UI="D016428">Journal Article</PublicationType>
        </PublicationTypeList>
      </Article>
      <MedlineJournalInfo><NlmUniqueID>0255562</NlmUniqueID></MedlineJournalInfo>
      <ChemicalList>
        <Chemical>
          <RegistryNumber>1ULL0QJ8UC</RegistryNumber>
          <NameOfSubstance UI="D000077203">Dapagliflozin</NameOfSubstance>
        </Chemical>
      </ChemicalList>
      <MeshHeadingList>
        <MeshHeading>
          <DescriptorName UI="D051436" MajorTopicYN="Y">Renal Insufficiency, Chronic</DescriptorName>
          <QualifierName UI="Q000188" MajorTopicYN="N">drug therapy</QualifierName>
        </MeshHeading>
        <MeshHeading>
          <DescriptorName UI="D006801" MajorTopicYN="N">Humans</DescriptorName>
        </MeshHeading>
      </MeshHeadingList>
      <KeywordList Owner="NOTNLM">
        <Keyword MajorTopicYN="N">SGLT2 inhibition</Keyword>
      </KeywordList>
      <CommentsCorrectionsList>
        <CommentsCorrections RefType="CommentIn">
          <RefSource>N Engl J Med. 2019</RefSource>
          <PMID Version="1">99999999</PMID>
        </CommentsCorrections>
      </CommentsCorrectionsList>
    </MedlineCitation>
    <PubmedData>
      <ArticleIdList>
        <ArticleId IdType="pubmed">31034221</ArticleId>
        <ArticleId IdType="doi">10.1056/should-not-win</ArticleId>
        <ArticleId IdType="pmc">PMC6890222</ArticleId>
      </ArticleIdList>
    </PubmedData>
  </PubmedArticle>
</PubmedArticleSet>"#;

    #[test]
    fn test_parse_structured_article() {
        let articles = parse(STRUCTURED);
        assert_eq!(articles.len(), 1);
        let a = &articles[0];

        assert_eq!(a.pmid, "31034221");
        assert_eq!(a.title, "Dapagliflozin in patients with chronic kidney disease.");
        assert_eq!(a.doi.as_deref(), Some("10.1056/NEJMoa1811744"));
        assert_eq!(a.pmc_id.as_deref(), Some("PMC6890222"));
        assert_eq!(a.journal.title.as_deref(), Some("The New England journal of medicine"));
        assert_eq!(a.journal.iso_abbreviation.as_deref(), Some("N Engl J Med"));
        assert_eq!(a.journal.volume.as_deref(), Some("380"));
        assert_eq!(a.journal.pages.as_deref(), Some("1724-1734"));
        assert_eq!(a.journal.nlm_id.as_deref(), Some("0255562"));
        assert_eq!(a.pub_date.year, 2019);
        assert_eq!(a.pub_date.month, Some(5));
        assert_eq!(a.pub_date.day, Some(2));
        assert_eq!(a.evidence_level, 2);
        assert_eq!(a.study_design.as_deref(), Some("Randomized Controlled Trial"));
        assert_eq!(a.sample_size, Some(2152)); // n = 2152 matches before "4304 participants"
        assert_eq!(a.url, "https://pubmed.ncbi.nlm.nih.gov/31034221/");
        assert!(a.full_text_url.as_deref().unwrap().contains("PMC6890222"));
    }

    #[test]
    fn test_structured_abstract_sections() {
        let a = &parse(STRUCTURED)[0];
        assert_eq!(a.abstract_sections.len(), 4);
        assert_eq!(a.abstract_sections[0].label, "BACKGROUND");
        assert_eq!(a.abstract_sections[1].nlm_category.as_deref(), Some("METHODS"));

        // The rendered abstract is exactly the labelled concatenation.
        let rendered = a
            .abstract_sections
            .iter()
            .map(|s| format!("{}: {}", s.label, s.text))
            .collect::<Vec<_>>()
            .join("\n\n");
        assert_eq!(a.abstract_text, rendered);
    }

    #[test]
    fn test_authors_preserve_order_and_metadata() {
        let a = &parse(STRUCTURED)[0];
        assert_eq!(a.authors.len(), 2);
        assert_eq!(a.authors[0].last_name, "Heerspink");
        assert_eq!(a.authors[0].initials.as_deref(), Some("HJL"));
        assert_eq!(a.authors[0].orcid.as_deref(), Some("0000-0002-3126-3730"));
        assert!(a.authors[0].affiliation.as_deref().unwrap().contains("Groningen"));
        assert_eq!(a.authors[1].last_name, "Wheeler");
    }

    #[test]
    fn test_mesh_and_chemicals_and_keywords() {
        let a = &parse(STRUCTURED)[0];
        assert_eq!(a.mesh_headings.len(), 2);
        assert_eq!(a.mesh_headings[0].descriptor, "Renal Insufficiency, Chronic");
        assert_eq!(a.mesh_headings[0].ui.as_deref(), Some("D051436"));
        assert!(a.mesh_headings[0].major_topic);
        assert_eq!(a.mesh_headings[0].qualifiers, vec!["drug therapy"]);
        assert!(!a.mesh_headings[1].major_topic);

        assert_eq!(a.chemicals.len(), 1);
        assert_eq!(a.chemicals[0].name, "Dapagliflozin");
        assert_eq!(a.chemicals[0].registry_number.as_deref(), Some("1ULL0QJ8UC"));

        assert_eq!(a.keywords, vec!["SGLT2 inhibition"]);
        assert_eq!(a.publication_types[0].ui.as_deref(), Some("D016449"));
    }

    #[test]
    fn test_comments_corrections_pmid_is_ignored() {
        let a = &parse(STRUCTURED)[0];
        assert_eq!(a.pmid, "31034221");
    }

    #[test]
    fn test_flat_abstract_and_entity_decoding() {
        let xml = r#"<PubmedArticle><MedlineCitation>
            <PMID>100</PMID>
            <Article>
              <Journal><Title>Lancet</Title>
                <JournalIssue><PubDate><Year>2021</Year></PubDate></JournalIssue>
              </Journal>
              <ArticleTitle>TNF-&#945; &amp; IL-6 in sepsis</ArticleTitle>
              <Abstract>
                <AbstractText>Levels of TNF-&#945; were &lt;5 pg/mL in 120 patients.</AbstractText>
              </Abstract>
            </Article>
        </MedlineCitation></PubmedArticle>"#;
        let a = &parse(xml)[0];
        assert_eq!(a.title, "TNF-\u{3b1} & IL-6 in sepsis");
        assert!(a.abstract_sections.is_empty());
        assert_eq!(a.abstract_text, "Levels of TNF-\u{3b1} were <5 pg/mL in 120 patients.");
        assert_eq!(a.sample_size, Some(120));
    }

    #[test]
    fn test_inline_markup_is_flattened() {
        let xml = r#"<PubmedArticle><MedlineCitation>
            <PMID>101</PMID>
            <Article>
              <Journal><JournalIssue><PubDate><Year>2020</Year></PubDate></JournalIssue></Journal>
              <ArticleTitle>NF-<i>kappa</i>B signalling</ArticleTitle>
              <Abstract><AbstractText>Expression of <sup>18</sup>F was measured.</AbstractText></Abstract>
            </Article>
        </MedlineCitation></PubmedArticle>"#;
        let a = &parse(xml)[0];
        assert_eq!(a.title, "NF-kappaB signalling");
        assert_eq!(a.abstract_text, "Expression of 18F was measured.");
    }

    #[test]
    fn test_medline_date_year_extraction() {
        let xml = r#"<PubmedArticle><MedlineCitation>
            <PMID>102</PMID>
            <Article>
              <Journal><JournalIssue><PubDate><MedlineDate>1998 Jul-Aug</MedlineDate></PubDate></JournalIssue></Journal>
              <ArticleTitle>Old paper</ArticleTitle>
            </Article>
        </MedlineCitation></PubmedArticle>"#;
        let a = &parse(xml)[0];
        assert_eq!(a.pub_date.year, 1998);
        assert_eq!(a.pub_date.medline_date.as_deref(), Some("1998 Jul-Aug"));
    }

    #[test]
    fn test_article_date_preferred_over_pub_date() {
        let xml = r#"<PubmedArticle><MedlineCitation>
            <PMID>103</PMID>
            <Article>
              <Journal><JournalIssue><PubDate><Year>2023</Year><Month>Jan</Month></PubDate></JournalIssue></Journal>
              <ArticleTitle>Recent paper</ArticleTitle>
              <ArticleDate DateType="Electronic"><Year>2022</Year><Month>12</Month><Day>15</Day></ArticleDate>
            </Article>
        </MedlineCitation></PubmedArticle>"#;
        let a = &parse(xml)[0];
        assert_eq!(a.pub_date.year, 2022);
        assert_eq!(a.pub_date.month, Some(12));
        assert_eq!(a.pub_date.day, Some(15));
    }

    #[test]
    fn test_malformed_sibling_is_skipped() {
        let xml = format!(
            "<PubmedArticleSet>{}<PubmedArticle><MedlineCitation><Article>\
             <ArticleTitle>No PMID here</ArticleTitle></Article></MedlineCitation></PubmedArticle>\
             </PubmedArticleSet>",
            &STRUCTURED[STRUCTURED.find("<PubmedArticle>").unwrap()
                ..STRUCTURED.find("</PubmedArticleSet>").unwrap()]
        );
        let articles = parse(&xml);
        assert_eq!(articles.len(), 1);
        assert_eq!(articles[0].pmid, "31034221");
    }

    #[test]
    fn test_sample_size_patterns_in_order() {
        assert_eq!(extract_sample_size("A total of n = 1,204 were randomized."), Some(1204));
        assert_eq!(extract_sample_size("We studied 350 patients over 5 years."), Some(350));
        assert_eq!(extract_sample_size("A sample size of 48 was required."), Some(48));
        assert_eq!(extract_sample_size("We enrolled 96 adults."), Some(96));
        assert_eq!(extract_sample_size("The study included 72 participants."), Some(72));
        assert_eq!(extract_sample_size("No numbers at all."), None);
        // Out-of-range values are rejected.
        assert_eq!(extract_sample_size("n = 99,000,000 impossible"), None);
    }

    #[test]
    fn test_study_design_priority() {
        assert_eq!(
            study_design(&["Journal Article", "Randomized Controlled Trial", "Review"]),
            Some("Randomized Controlled Trial".to_string())
        );
        assert_eq!(
            study_design(&["Meta-Analysis", "Randomized Controlled Trial"]),
            Some("Meta-Analysis".to_string())
        );
        assert_eq!(study_design(&["Journal Article"]), None);
    }

    #[test]
    fn test_parse_month_variants() {
        assert_eq!(parse_month("05"), Some(5));
        assert_eq!(parse_month("Dec"), Some(12));
        assert_eq!(parse_month("December"), Some(12));
        assert_eq!(parse_month("Spring"), None);
        assert_eq!(parse_month("13"), None);
    }
}
