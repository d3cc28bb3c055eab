//! End-to-end scenarios over the offline stages: parse → classify → chunk.
//!
//! These mirror the product's canonical article shapes: a structured
//! meta-analysis abstract, a one-chunk RCT abstract, and a long cohort
//! abstract that must split with bounded overlap.

use evidex_ingestion::chunker::{chunk_article, estimate_tokens, ChunkerConfig};
use evidex_ingestion::models::SectionType;
use evidex_ingestion::parser::parse;

fn article_xml(pmid: &str, pub_type: &str, abstract_xml: &str) -> String {
    format!(
        r#"<PubmedArticle>
  <MedlineCitation>
    <PMID>{pmid}</PMID>
    <Article>
      <Journal>
        <Title>JAMA</Title>
        <JournalIssue><PubDate><Year>2022</Year><Month>Mar</Month></PubDate></JournalIssue>
      </Journal>
      <ArticleTitle>Intervention outcomes in adults</ArticleTitle>
      <Abstract>{abstract_xml}</Abstract>
      <PublicationTypeList>
        <PublicationType UI="D000000">{pub_type}</PublicationType>
      </PublicationTypeList>
    </Article>
    <MeshHeadingList>
      <MeshHeading>
        <DescriptorName UI="D000001" MajorTopicYN="Y">Adult</DescriptorName>
      </MeshHeading>
    </MeshHeadingList>
  </MedlineCitation>
</PubmedArticle>"#
    )
}

#[test]
fn scenario_structured_meta_analysis() {
    let abstract_xml = r#"
        <AbstractText Label="BACKGROUND">Prior trials conflict on benefit.</AbstractText>
        <AbstractText Label="METHODS">We pooled 24 randomized trials with n = 9,432 total.</AbstractText>
        <AbstractText Label="RESULTS">The pooled risk ratio was 0.82 (95% CI, 0.74 to 0.91).</AbstractText>
        <AbstractText Label="CONCLUSIONS">The intervention reduces events.</AbstractText>"#;
    let xml = article_xml("20000001", "Meta-Analysis", abstract_xml);

    let articles = parse(&xml);
    assert_eq!(articles.len(), 1);
    let article = &articles[0];
    assert_eq!(article.evidence_level, 1);
    assert_eq!(article.abstract_sections.len(), 4);

    let chunks = chunk_article(article, &ChunkerConfig::default());
    assert!(!chunks.is_empty());
    for (i, chunk) in chunks.iter().enumerate() {
        // Invariants: gapless indices, inherited evidence level, exact prefix.
        assert_eq!(chunk.chunk_index, i);
        assert_eq!(chunk.evidence_level, 1);
        assert!(chunk
            .content_with_context
            .starts_with("[Title: Intervention outcomes in adults]"));
        assert!(chunk.content_with_context.contains("[JAMA, 2022]"));
        assert_eq!(
            chunk.token_estimate,
            chunk.content_with_context.len().div_ceil(4)
        );
    }
    // Every labelled section's text survives into some chunk.
    let joined: String = chunks.iter().map(|c| c.content.as_str()).collect();
    for label in ["BACKGROUND", "METHODS", "RESULTS", "CONCLUSIONS"] {
        assert!(joined.contains(label), "missing section {label}");
    }
}

#[test]
fn scenario_unstructured_rct_single_chunk() {
    // ~1,800 characters (~450 tokens): fits one max-sized chunk.
    let body = "The primary outcome occurred in fewer treated participants overall. "
        .repeat(26);
    let abstract_xml = format!("<AbstractText>{}</AbstractText>", body.trim());
    let xml = article_xml("20000002", "Randomized Controlled Trial", &abstract_xml);

    let article = &parse(&xml)[0];
    assert_eq!(article.evidence_level, 2);
    assert!(article.abstract_sections.is_empty());

    let chunks = chunk_article(article, &ChunkerConfig::default());
    assert_eq!(chunks.len(), 1);
    assert_eq!(chunks[0].section_type, SectionType::FullAbstract);
}

#[test]
fn scenario_long_cohort_abstract_splits_with_overlap() {
    // ~4,000 characters of distinct sentences.
    let body: String = (0..60)
        .map(|i| format!("Cohort follow-up wave {i} recorded outcome incidence in stratum {i}. "))
        .collect();
    let abstract_xml = format!("<AbstractText>{}</AbstractText>", body.trim());
    let xml = article_xml("20000003", "Cohort Studies", &abstract_xml);

    let article = &parse(&xml)[0];
    assert_eq!(article.evidence_level, 3);

    let config = ChunkerConfig::default();
    let chunks = chunk_article(article, &config);
    assert!(chunks.len() > 1, "4k characters must not fit one chunk");
    for chunk in &chunks {
        assert_eq!(chunk.section_type, SectionType::Abstract);
    }

    // Consecutive chunks share trailing sentences bounded by overlap_tokens.
    for pair in chunks.windows(2) {
        let prev = &pair[0].content;
        let next = &pair[1].content;
        let shared: usize = prev
            .split(". ")
            .collect::<Vec<_>>()
            .into_iter()
            .rev()
            .take_while(|s| !s.is_empty() && next.contains(*s))
            .map(|s| estimate_tokens(s))
            .sum();
        assert!(
            shared <= config.overlap_tokens + 4,
            "overlap of ~{shared} tokens exceeds the configured bound"
        );
    }
}

#[test]
fn classify_parse_chunk_levels_stay_in_range() {
    for (pmid, pub_type) in [
        ("30000001", "Meta-Analysis"),
        ("30000002", "Randomized Controlled Trial"),
        ("30000003", "Cohort Studies"),
        ("30000004", "Case Reports"),
        ("30000005", "Editorial"),
        ("30000006", "Journal Article"),
    ] {
        let xml = article_xml(
            pmid,
            pub_type,
            "<AbstractText>A short abstract for range checks.</AbstractText>",
        );
        let article = &parse(&xml)[0];
        assert!((1..=5).contains(&article.evidence_level));
        for chunk in chunk_article(article, &ChunkerConfig::default()) {
            assert_eq!(chunk.evidence_level, article.evidence_level);
        }
    }
}
