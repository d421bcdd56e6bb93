//! Title normalization and fuzzy similarity scoring.

use once_cell::sync::Lazy;
use regex::Regex;
use unicode_normalization::UnicodeNormalization;

use crate::catalog::CatalogCandidate;

static WHITESPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").unwrap());

/// Prefixes that mark a scraped entry as a chapter or volume label, not a series.
const LABEL_PREFIXES: &[&str] = &["chapter", "ch.", "vol."];

/// Normalize a title for comparison and cache keys.
///
/// NFKC folds full-width and compatibility forms (common on manga sites), then
/// the result is lowercased, trimmed, and has whitespace runs collapsed.
pub fn normalize_title(title: &str) -> String {
    let folded: String = title.nfkc().collect::<String>().to_lowercase();
    WHITESPACE.replace_all(folded.trim(), " ").into_owned()
}

/// Similarity between two titles in `[0, 1]`.
///
/// Indel-normalized ratio over the normalized character sequences: symmetric,
/// and 1.0 only when the normalized strings are identical. Two empty titles are
/// identical; one empty title never matches anything.
pub fn similarity(a: &str, b: &str) -> f64 {
    let a = normalize_title(a);
    let b = normalize_title(b);
    match (a.is_empty(), b.is_empty()) {
        (true, true) => 1.0,
        (true, false) | (false, true) => 0.0,
        (false, false) => rapidfuzz::fuzz::ratio(a.chars(), b.chars()).clamp(0.0, 1.0),
    }
}

/// Best similarity between `query` and any title variant of `candidate`.
pub fn candidate_score(query: &str, candidate: &CatalogCandidate) -> f64 {
    candidate
        .variants()
        .filter(|v| !v.trim().is_empty())
        .map(|v| similarity(query, v))
        .fold(0.0, f64::max)
}

/// Pick the best-scoring candidate. Ties keep the earlier candidate, so the
/// catalog's own ranking breaks them.
pub fn best_candidate<'a>(
    query: &str,
    candidates: &'a [CatalogCandidate],
) -> Option<(&'a CatalogCandidate, f64)> {
    let mut best: Option<(&CatalogCandidate, f64)> = None;
    for candidate in candidates {
        let score = candidate_score(query, candidate);
        match best {
            Some((_, best_score)) if score <= best_score => {}
            _ => best = Some((candidate, score)),
        }
    }
    best
}

/// Whether a scraped title is a chapter or volume label ("Chapter 12", "Vol. 3").
pub fn is_label_title(title: &str) -> bool {
    let lowered = title.trim_start().to_lowercase();
    LABEL_PREFIXES.iter().any(|p| lowered.starts_with(p))
}
