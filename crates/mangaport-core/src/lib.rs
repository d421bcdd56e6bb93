use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub mod cache;
pub mod catalog;
pub mod enrich;
pub mod lookup;
pub mod matching;
pub mod pool;
pub mod progress;
pub mod rate_limit;

// Re-export for convenience
pub use catalog::{CatalogCandidate, JikanClient, SearchClient};
pub use enrich::{enrich_items, Enricher};
pub use mangaport_scrape::SourceItem;
pub use rate_limit::{BackoffPolicy, RateLimiter, SearchError};

/// Catalog id written for titles that have no accepted match.
pub const UNMATCHED_ID: &str = "0";

/// Default minimum similarity a candidate must exceed to be accepted.
pub const DEFAULT_ACCEPTANCE_THRESHOLD: f64 = 0.6;

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("failed to start worker pool: {0}")]
    Pool(String),
    #[error("enrichment incomplete: {missing} of {total} titles have no result")]
    Incomplete { missing: usize, total: usize },
}

/// Outcome of matching one title against the catalog.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchResult {
    pub catalog_id: Option<String>,
    pub matched_title: Option<String>,
    pub confidence: f64,
}

impl MatchResult {
    pub fn unmatched() -> Self {
        Self {
            catalog_id: None,
            matched_title: None,
            confidence: 0.0,
        }
    }

    pub fn matched(catalog_id: impl Into<String>, matched_title: impl Into<String>, confidence: f64) -> Self {
        Self {
            catalog_id: Some(catalog_id.into()),
            matched_title: Some(matched_title.into()),
            confidence: confidence.clamp(0.0, 1.0),
        }
    }

    pub fn is_match(&self) -> bool {
        self.catalog_id.is_some()
    }
}

/// A source item with its catalog match attached. This is what exporters consume.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnrichedItem {
    pub title: String,
    pub url: String,
    /// Catalog id, or [`UNMATCHED_ID`].
    pub catalog_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub matched_title: Option<String>,
    pub confidence: f64,
}

impl EnrichedItem {
    pub fn unmatched(item: &SourceItem) -> Self {
        Self::from_match(item, MatchResult::unmatched())
    }

    pub fn from_match(item: &SourceItem, result: MatchResult) -> Self {
        match result.catalog_id {
            Some(id) => Self {
                title: item.title.clone(),
                url: item.url.clone(),
                catalog_id: id,
                matched_title: result.matched_title,
                confidence: result.confidence.clamp(0.0, 1.0),
            },
            None => Self {
                title: item.title.clone(),
                url: item.url.clone(),
                catalog_id: UNMATCHED_ID.to_string(),
                matched_title: None,
                confidence: 0.0,
            },
        }
    }

    pub fn is_matched(&self) -> bool {
        self.catalog_id != UNMATCHED_ID
    }

    /// Confidence tier of a matched item; `None` when unmatched.
    pub fn tier(&self) -> Option<ConfidenceTier> {
        self.is_matched().then(|| ConfidenceTier::of(self.confidence))
    }
}

/// Coarse confidence label for accepted matches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfidenceTier {
    High,
    Medium,
    Low,
}

impl ConfidenceTier {
    pub fn of(confidence: f64) -> Self {
        if confidence >= 0.9 {
            Self::High
        } else if confidence >= 0.7 {
            Self::Medium
        } else {
            Self::Low
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::High => "High",
            Self::Medium => "Med",
            Self::Low => "Low",
        }
    }
}

/// Severity of a progress line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogKind {
    Info,
    Success,
    Warning,
    Error,
}

/// Progress events emitted during enrichment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressEvent {
    pub percent: u8,
    pub step: u32,
    pub message: String,
    pub kind: LogKind,
}

/// Slice of an overall pipeline's progress bar that enrichment reports into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressRange {
    pub start: u8,
    pub end: u8,
}

impl ProgressRange {
    pub const FULL: ProgressRange = ProgressRange { start: 0, end: 100 };

    pub fn new(start: u8, end: u8) -> Self {
        Self { start, end }
    }

    /// Percent after `done` of `total` lookups have completed.
    pub fn at(&self, done: usize, total: usize) -> u8 {
        if total == 0 {
            return self.start;
        }
        let span = self.end.saturating_sub(self.start) as usize;
        let done = done.min(total);
        self.start + (span * done / total) as u8
    }
}

impl Default for ProgressRange {
    fn default() -> Self {
        Self { start: 30, end: 60 }
    }
}

/// Summary statistics for an enrichment run.
///
/// `total == skipped + matched + unmatched + cancelled`. `failed` is the part of
/// `unmatched` caused by timeouts, transport errors, or repeated 429s, and
/// `low_confidence` is the part of `matched` below 0.8.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct EnrichStats {
    pub total: usize,
    pub skipped: usize,
    pub searched: usize,
    pub matched: usize,
    pub unmatched: usize,
    pub failed: usize,
    pub low_confidence: usize,
    pub cancelled: usize,
}

/// Configuration for the enrichment engine.
#[derive(Debug, Clone)]
pub struct Config {
    pub concurrency: usize,
    pub min_interval: Duration,
    pub request_timeout: Duration,
    pub acceptance_threshold: f64,
    pub backoff: BackoffPolicy,
    pub progress_range: ProgressRange,
    pub progress_step: u32,
    pub use_cache: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            concurrency: 4,
            min_interval: Duration::from_secs(1),
            request_timeout: Duration::from_secs(10),
            acceptance_threshold: DEFAULT_ACCEPTANCE_THRESHOLD,
            backoff: BackoffPolicy::default(),
            progress_range: ProgressRange::default(),
            progress_step: 1,
            use_cache: true,
        }
    }
}

impl Config {
    pub fn validate(&self) -> Result<(), CoreError> {
        if self.concurrency == 0 {
            return Err(CoreError::InvalidConfig("concurrency must be at least 1".into()));
        }
        if !(0.0..=1.0).contains(&self.acceptance_threshold) {
            return Err(CoreError::InvalidConfig(format!(
                "acceptance threshold {} is outside [0, 1]",
                self.acceptance_threshold
            )));
        }
        if self.request_timeout.is_zero() {
            return Err(CoreError::InvalidConfig("request timeout must be positive".into()));
        }
        let ProgressRange { start, end } = self.progress_range;
        if start > end || end > 100 {
            return Err(CoreError::InvalidConfig(format!(
                "progress range {start}..{end} is not within 0..=100"
            )));
        }
        Ok(())
    }
}

/// Result of one enrichment run: one slot per input item, in input order.
///
/// Slots are `None` only for items that were never processed because the run
/// was cancelled.
#[derive(Debug, Clone)]
pub struct EnrichmentRun {
    pub slots: Vec<Option<EnrichedItem>>,
    pub stats: EnrichStats,
}

impl EnrichmentRun {
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn is_complete(&self) -> bool {
        self.slots.iter().all(Option::is_some)
    }

    /// Items that finished, in input order.
    pub fn completed(&self) -> impl Iterator<Item = &EnrichedItem> {
        self.slots.iter().flatten()
    }

    /// The full enriched list, or an error naming how many slots are empty.
    pub fn into_items(self) -> Result<Vec<EnrichedItem>, CoreError> {
        let total = self.slots.len();
        let missing = self.slots.iter().filter(|s| s.is_none()).count();
        if missing > 0 {
            return Err(CoreError::Incomplete { missing, total });
        }
        Ok(self.slots.into_iter().flatten().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn progress_range_maps_completion() {
        let range = ProgressRange::new(30, 60);
        assert_eq!(range.at(0, 10), 30);
        assert_eq!(range.at(5, 10), 45);
        assert_eq!(range.at(10, 10), 60);
        assert_eq!(range.at(12, 10), 60);
        assert_eq!(range.at(0, 0), 30);
    }

    #[test]
    fn progress_range_is_non_decreasing() {
        let range = ProgressRange::new(30, 60);
        let total = 7;
        let percents: Vec<u8> = (0..=total).map(|d| range.at(d, total)).collect();
        assert!(percents.windows(2).all(|w| w[0] <= w[1]));
    }

    #[test]
    fn unmatched_item_uses_sentinel() {
        let item = SourceItem::new("Chapter 5", "u2");
        let enriched = EnrichedItem::unmatched(&item);
        assert_eq!(enriched.catalog_id, UNMATCHED_ID);
        assert_eq!(enriched.confidence, 0.0);
        assert!(!enriched.is_matched());
        assert!(enriched.tier().is_none());
    }

    #[test]
    fn matched_item_carries_id_and_tier() {
        let item = SourceItem::new("Berserk", "u1");
        let enriched = EnrichedItem::from_match(&item, MatchResult::matched("2", "Berserk", 1.0));
        assert_eq!(enriched.catalog_id, "2");
        assert_eq!(enriched.matched_title.as_deref(), Some("Berserk"));
        assert_eq!(enriched.tier(), Some(ConfidenceTier::High));
    }

    #[test]
    fn confidence_tiers() {
        assert_eq!(ConfidenceTier::of(0.95), ConfidenceTier::High);
        assert_eq!(ConfidenceTier::of(0.9), ConfidenceTier::High);
        assert_eq!(ConfidenceTier::of(0.75), ConfidenceTier::Medium);
        assert_eq!(ConfidenceTier::of(0.61), ConfidenceTier::Low);
    }

    #[test]
    fn default_config_is_valid() {
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn config_rejects_zero_concurrency() {
        let config = Config {
            concurrency: 0,
            ..Config::default()
        };
        assert!(matches!(config.validate(), Err(CoreError::InvalidConfig(_))));
    }

    #[test]
    fn config_rejects_inverted_progress_range() {
        let config = Config {
            progress_range: ProgressRange::new(60, 30),
            ..Config::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn progress_event_serializes_lowercase_kind() {
        let event = ProgressEvent {
            percent: 42,
            step: 1,
            message: "Searching catalog for: Berserk".into(),
            kind: LogKind::Warning,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["kind"], "warning");
        assert_eq!(json["percent"], 42);
    }

    #[test]
    fn incomplete_run_reports_missing_slots() {
        let item = SourceItem::new("Berserk", "u1");
        let run = EnrichmentRun {
            slots: vec![Some(EnrichedItem::unmatched(&item)), None],
            stats: EnrichStats::default(),
        };
        assert!(!run.is_complete());
        assert_eq!(run.completed().count(), 1);
        assert!(matches!(
            run.into_items(),
            Err(CoreError::Incomplete { missing: 1, total: 2 })
        ));
    }
}
