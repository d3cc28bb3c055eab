//! CEBM evidence-level classification from PubMed publication types.
//!
//! Levels follow the Oxford hierarchy: 1 meta-analyses / systematic reviews /
//! guidelines, 2 randomized trials, 3 observational designs, 4 case-level
//! evidence, 5 narrative material. Checks run strongest-first and the first
//! match wins; anything unrecognised is level 5.

use chrono::Datelike;

const LEVEL_1: &[&str] = &[
    "meta-analysis",
    "systematic review",
    "practice guideline",
    "guideline",
    "consensus development conference",
];

const LEVEL_2: &[&str] = &[
    "randomized controlled trial",
    "controlled clinical trial",
    "phase iii",
    "phase iv",
    "pragmatic clinical trial",
    "equivalence trial",
];

// "phase i"/"phase ii" are safe here: phase III/IV already matched at level 2.
const LEVEL_3: &[&str] = &[
    "observational study",
    "cohort stud",
    "case-control stud",
    "comparative study",
    "phase i",
    "phase ii",
    "multicenter study",
    "validation stud",
    "evaluation stud",
    "cross-sectional stud",
    "clinical trial",
];

const LEVEL_4: &[&str] = &[
    "case report",
    "clinical study",
    "twin study",
    "historical article",
];

const LEVEL_5: &[&str] = &[
    "review",
    "editorial",
    "letter",
    "comment",
    "personal narrative",
    "news",
    "newspaper article",
    "lecture",
    "address",
    "biography",
    "interview",
];

/// Map publication-type strings to an evidence level in [1, 5].
pub fn classify<S: AsRef<str>>(publication_types: &[S]) -> u8 {
    let normalized: Vec<String> = publication_types
        .iter()
        .map(|t| t.as_ref().trim().to_lowercase())
        .collect();

    let matches = |needles: &[&str]| {
        normalized
            .iter()
            .any(|t| needles.iter().any(|n| t.contains(n)))
    };

    if matches(LEVEL_1) {
        1
    } else if matches(LEVEL_2) {
        2
    } else if matches(LEVEL_3) {
        3
    } else if matches(LEVEL_4) {
        4
    } else {
        5
    }
}

/// Auxiliary evidence score in [0, 100], clamped to the level's band
/// (1: 80–100, 2: 60–80, 3: 40–60, 4: 20–40, 5: 0–20). Bonuses: up to +10
/// for log-scaled sample size, +5 for publication within the last two
/// years, +5 for journal impact factor scaled by 10.
pub fn evidence_score(
    level: u8,
    sample_size: Option<u64>,
    pub_year: Option<i32>,
    impact_factor: Option<f32>,
) -> f32 {
    let base = match level {
        1 => 80.0,
        2 => 60.0,
        3 => 40.0,
        4 => 20.0,
        _ => 0.0,
    };

    let mut score = base;

    if let Some(n) = sample_size {
        // n is capped at 10^7 by the parser heuristic, so log10 stays ≤ 7.
        let bonus = ((n as f64 + 1.0).log10() / 7.0 * 10.0).min(10.0);
        score += bonus as f32;
    }

    if let Some(year) = pub_year {
        let current = chrono::Utc::now().year();
        if current - year <= 2 {
            score += 5.0;
        }
    }

    if let Some(impact) = impact_factor {
        score += (impact / 10.0).clamp(0.0, 1.0) * 5.0;
    }

    score.clamp(base, base + 20.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_level_1_designs() {
        assert_eq!(classify(&["Meta-Analysis"]), 1);
        assert_eq!(classify(&["Systematic Review"]), 1);
        assert_eq!(classify(&["Practice Guideline"]), 1);
        assert_eq!(classify(&["Consensus Development Conference, NIH"]), 1);
    }

    #[test]
    fn test_level_2_trials() {
        assert_eq!(classify(&["Randomized Controlled Trial"]), 2);
        assert_eq!(classify(&["Clinical Trial, Phase III"]), 2);
        assert_eq!(classify(&["Clinical Trial, Phase IV"]), 2);
        assert_eq!(classify(&["Equivalence Trial"]), 2);
    }

    #[test]
    fn test_level_3_observational() {
        assert_eq!(classify(&["Cohort Studies"]), 3);
        assert_eq!(classify(&["Case-Control Studies"]), 3);
        assert_eq!(classify(&["Clinical Trial, Phase I"]), 3);
        assert_eq!(classify(&["Clinical Trial"]), 3);
        assert_eq!(classify(&["Cross-Sectional Studies"]), 3);
    }

    #[test]
    fn test_level_4_and_5() {
        assert_eq!(classify(&["Case Reports"]), 4);
        assert_eq!(classify(&["Twin Study"]), 4);
        assert_eq!(classify(&["Review"]), 5);
        assert_eq!(classify(&["Editorial"]), 5);
        assert_eq!(classify(&["Letter"]), 5);
    }

    #[test]
    fn test_strongest_type_wins() {
        // A systematic review of RCTs classifies by the review, not the trials.
        assert_eq!(classify(&["Randomized Controlled Trial", "Systematic Review"]), 1);
        // "Review" alone must not shadow "Systematic Review".
        assert_eq!(classify(&["Systematic Review", "Review"]), 1);
    }

    #[test]
    fn test_unknown_defaults_to_5() {
        assert_eq!(classify(&["Journal Article"]), 5);
        assert_eq!(classify::<&str>(&[]), 5);
    }

    #[test]
    fn test_classify_always_in_range() {
        let inputs: &[&[&str]] = &[
            &["Meta-Analysis"],
            &["Randomized Controlled Trial"],
            &["Cohort Studies"],
            &["Case Reports"],
            &["Editorial"],
            &["Journal Article", "Research Support, N.I.H., Extramural"],
            &[],
        ];
        for types in inputs {
            let level = classify(types);
            assert!((1..=5).contains(&level), "level {level} out of range");
        }
    }

    #[test]
    fn test_score_stays_in_band() {
        // Maximal bonuses must not escape the level band.
        let s = evidence_score(1, Some(9_999_999), Some(chrono::Utc::now().year()), Some(50.0));
        assert!((80.0..=100.0).contains(&s));

        let s5 = evidence_score(5, None, None, None);
        assert!((0.0..=20.0).contains(&s5));

        let s3 = evidence_score(3, Some(100), Some(1990), None);
        assert!((40.0..=60.0).contains(&s3));
    }
}
