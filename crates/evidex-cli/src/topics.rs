//! Topic lists for ingestion runs.

use std::path::Path;

use anyhow::Context;

/// Clinical topics the product ships with for a first corpus build. Chosen
/// for breadth across specialties with strong trial and guideline coverage.
pub const RECOMMENDED_TOPICS: &[&str] = &[
    "hypertension management",
    "type 2 diabetes treatment",
    "heart failure with reduced ejection fraction",
    "atrial fibrillation anticoagulation",
    "acute coronary syndrome",
    "statin therapy cardiovascular prevention",
    "stroke prevention",
    "venous thromboembolism treatment",
    "community acquired pneumonia",
    "asthma management",
    "chronic obstructive pulmonary disease exacerbation",
    "sepsis early management",
    "acute kidney injury",
    "chronic kidney disease progression",
    "cirrhosis complications",
    "inflammatory bowel disease biologics",
    "helicobacter pylori eradication",
    "breast cancer adjuvant therapy",
    "colorectal cancer screening",
    "lung cancer immunotherapy",
    "prostate cancer active surveillance",
    "rheumatoid arthritis disease modifying therapy",
    "osteoporosis fracture prevention",
    "gout urate lowering therapy",
    "major depressive disorder treatment",
    "generalized anxiety disorder therapy",
    "bipolar disorder maintenance",
    "schizophrenia antipsychotics",
    "migraine prophylaxis",
    "epilepsy antiseizure medication",
    "multiple sclerosis disease modifying",
    "alzheimer disease management",
    "parkinson disease treatment",
    "hypothyroidism replacement",
    "polycystic ovary syndrome",
    "gestational diabetes management",
    "pediatric otitis media antibiotics",
    "obesity pharmacotherapy",
    "obstructive sleep apnea treatment",
    "hiv antiretroviral therapy",
];

/// Read a topics file: one topic per line, `#` comments and blanks ignored.
pub fn load_topics_file(path: &Path) -> anyhow::Result<Vec<String>> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("cannot read topics file {}", path.display()))?;
    let topics: Vec<String> = raw
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(String::from)
        .collect();
    anyhow::ensure!(!topics.is_empty(), "topics file {} is empty", path.display());
    Ok(topics)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_load_topics_file_skips_comments_and_blanks() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        writeln!(f, "# cardiology").unwrap();
        writeln!(f, "heart failure").unwrap();
        writeln!(f).unwrap();
        writeln!(f, "  atrial fibrillation  ").unwrap();
        let topics = load_topics_file(f.path()).unwrap();
        assert_eq!(topics, vec!["heart failure", "atrial fibrillation"]);
    }

    #[test]
    fn test_empty_topics_file_is_an_error() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        writeln!(f, "# only comments").unwrap();
        assert!(load_topics_file(f.path()).is_err());
    }

    #[test]
    fn test_recommended_list_is_nonempty_and_unique() {
        assert!(RECOMMENDED_TOPICS.len() >= 30);
        let mut seen = std::collections::HashSet::new();
        for t in RECOMMENDED_TOPICS {
            assert!(seen.insert(t), "duplicate recommended topic: {t}");
        }
    }
}
