//! Single-title catalog lookup: rate limiting, timeout, 429 retry, and ranking.

use std::sync::Arc;
use std::time::Duration;

use crate::cache::QueryCache;
use crate::catalog::{CatalogCandidate, SearchClient};
use crate::matching::best_candidate;
use crate::rate_limit::{BackoffPolicy, RateLimiter, SearchError};
use crate::{Config, MatchResult};

/// What a lookup concluded about one title.
#[derive(Debug, Clone, PartialEq)]
pub enum LookupOutcome {
    /// A candidate scored above the acceptance threshold.
    Matched(MatchResult),
    /// The search succeeded but nothing cleared the threshold. `best_score` is
    /// kept for logging only and is never surfaced as confidence.
    NoMatch { candidates: usize, best_score: f64 },
    /// The search itself failed (timeout, transport error, repeated 429).
    Failed(SearchError),
}

impl LookupOutcome {
    /// Collapse into the always-succeeds result contract.
    pub fn into_match(self) -> MatchResult {
        match self {
            LookupOutcome::Matched(result) => result,
            LookupOutcome::NoMatch { .. } | LookupOutcome::Failed(_) => MatchResult::unmatched(),
        }
    }
}

/// Looks titles up in one catalog under a shared rate limiter.
pub struct CatalogLookup {
    client: Arc<dyn SearchClient>,
    limiter: Arc<RateLimiter>,
    cache: Option<Arc<QueryCache>>,
    threshold: f64,
    timeout: Duration,
    backoff: BackoffPolicy,
}

impl CatalogLookup {
    pub fn new(client: Arc<dyn SearchClient>, limiter: Arc<RateLimiter>, config: &Config) -> Self {
        Self {
            client,
            limiter,
            cache: None,
            threshold: config.acceptance_threshold,
            timeout: config.request_timeout,
            backoff: config.backoff,
        }
    }

    pub fn with_cache(mut self, cache: Arc<QueryCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn catalog_name(&self) -> &str {
        self.client.name()
    }

    pub fn limiter(&self) -> &Arc<RateLimiter> {
        &self.limiter
    }

    /// Match `title` against the catalog. Never fails; errors become unmatched.
    pub async fn lookup(&self, title: &str) -> MatchResult {
        self.lookup_outcome(title).await.into_match()
    }

    /// Match `title` and report why it did or did not match.
    pub async fn lookup_outcome(&self, title: &str) -> LookupOutcome {
        let catalog = self.client.name();

        if let Some(cache) = &self.cache {
            if let Some(cached) = cache.get(title, catalog) {
                log::debug!("{catalog}: cache hit for {title:?}");
                return if cached.is_match() {
                    LookupOutcome::Matched(cached)
                } else {
                    LookupOutcome::NoMatch {
                        candidates: 0,
                        best_score: 0.0,
                    }
                };
            }
        }

        let candidates = match self.search_with_retry(title).await {
            Ok(candidates) => candidates,
            Err(e) => {
                log::warn!("{catalog}: lookup failed for {title:?}: {e}");
                return LookupOutcome::Failed(e);
            }
        };

        let outcome = self.rank(title, &candidates);
        if let Some(cache) = &self.cache {
            match &outcome {
                LookupOutcome::Matched(result) => cache.insert(title, catalog, result),
                LookupOutcome::NoMatch { .. } => cache.insert(title, catalog, &MatchResult::unmatched()),
                LookupOutcome::Failed(_) => {}
            }
        }
        outcome
    }

    /// Apply the acceptance threshold to the best-ranked candidate.
    pub fn rank(&self, title: &str, candidates: &[CatalogCandidate]) -> LookupOutcome {
        match best_candidate(title, candidates) {
            Some((best, score)) if score > self.threshold => LookupOutcome::Matched(MatchResult::matched(
                best.catalog_id.clone(),
                best.title.clone(),
                score,
            )),
            Some((best, score)) => {
                log::debug!(
                    "{title:?}: best candidate {:?} scored {score:.2}, below threshold {:.2}",
                    best.title,
                    self.threshold
                );
                LookupOutcome::NoMatch {
                    candidates: candidates.len(),
                    best_score: score,
                }
            }
            None => LookupOutcome::NoMatch {
                candidates: 0,
                best_score: 0.0,
            },
        }
    }

    /// One search, plus exactly one retry if the first answer is a 429.
    async fn search_with_retry(&self, title: &str) -> Result<Vec<CatalogCandidate>, SearchError> {
        match self.attempt(title).await {
            Err(SearchError::RateLimited { retry_after }) => {
                let streak = self.limiter.on_rate_limited();
                let delay = self.backoff.delay(streak, retry_after);
                log::info!(
                    "{}: 429 rate limited on {title:?}, retrying once after {:.1}s",
                    self.client.name(),
                    delay.as_secs_f64()
                );
                tokio::time::sleep(delay).await;

                let retry = self.attempt(title).await;
                match &retry {
                    Err(SearchError::RateLimited { .. }) => {
                        self.limiter.on_rate_limited();
                    }
                    Ok(_) => self.limiter.record_success(),
                    Err(_) => {}
                }
                retry
            }
            Ok(candidates) => {
                self.limiter.record_success();
                Ok(candidates)
            }
            Err(other) => Err(other),
        }
    }

    /// Wait for the limiter, then issue one bounded search.
    async fn attempt(&self, title: &str) -> Result<Vec<CatalogCandidate>, SearchError> {
        self.limiter.acquire().await;
        match tokio::time::timeout(self.timeout, self.client.search(title)).await {
            Ok(result) => result,
            Err(_) => Err(SearchError::Timeout),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;
    use crate::catalog::SearchFuture;

    /// Replays scripted responses in order, then answers with no candidates.
    struct Scripted {
        responses: Mutex<Vec<Result<Vec<CatalogCandidate>, SearchError>>>,
        calls: Mutex<Vec<tokio::time::Instant>>,
    }

    impl Scripted {
        fn new(mut responses: Vec<Result<Vec<CatalogCandidate>, SearchError>>) -> Self {
            responses.reverse();
            Self {
                responses: Mutex::new(responses),
                calls: Mutex::new(Vec::new()),
            }
        }

        fn call_count(&self) -> usize {
            self.calls.lock().unwrap().len()
        }
    }

    impl SearchClient for Scripted {
        fn name(&self) -> &str {
            "scripted"
        }

        fn search<'a>(&'a self, _query: &'a str) -> SearchFuture<'a> {
            self.calls.lock().unwrap().push(tokio::time::Instant::now());
            let next = self.responses.lock().unwrap().pop().unwrap_or(Ok(vec![]));
            Box::pin(async move { next })
        }
    }

    struct Hanging;

    impl SearchClient for Hanging {
        fn name(&self) -> &str {
            "hanging"
        }

        fn search<'a>(&'a self, _query: &'a str) -> SearchFuture<'a> {
            Box::pin(async {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Ok(vec![])
            })
        }
    }

    fn cand(id: &str, title: &str) -> CatalogCandidate {
        CatalogCandidate {
            catalog_id: id.into(),
            title: title.into(),
            alternate_titles: vec![],
        }
    }

    fn config() -> Config {
        Config {
            min_interval: Duration::ZERO,
            backoff: BackoffPolicy {
                initial: Duration::from_secs(2),
                max: Duration::from_secs(60),
                jitter: Duration::ZERO,
            },
            ..Config::default()
        }
    }

    fn lookup_with(client: Arc<dyn SearchClient>) -> CatalogLookup {
        CatalogLookup::new(client, Arc::new(RateLimiter::unlimited()), &config())
    }

    #[tokio::test]
    async fn exact_title_matches_with_full_confidence() {
        let client = Arc::new(Scripted::new(vec![Ok(vec![cand("2", "Berserk")])]));
        let result = lookup_with(client).lookup("Berserk").await;
        assert_eq!(result, MatchResult::matched("2", "Berserk", 1.0));
    }

    #[tokio::test]
    async fn picks_best_of_several_candidates() {
        let client = Arc::new(Scripted::new(vec![Ok(vec![
            cand("21", "One-Punch Man"),
            cand("13", "One Piece"),
        ])]));
        let result = lookup_with(client).lookup("One Piece").await;
        assert_eq!(result.catalog_id.as_deref(), Some("13"));
    }

    #[tokio::test]
    async fn sub_threshold_best_is_reported_as_zero() {
        let client = Arc::new(Scripted::new(vec![Ok(vec![cand("1", "Completely Different")])]));
        let lookup = lookup_with(client);
        let outcome = lookup.lookup_outcome("Berserk").await;
        assert!(matches!(outcome, LookupOutcome::NoMatch { candidates: 1, .. }));
        assert_eq!(outcome.into_match(), MatchResult::unmatched());
    }

    #[test]
    fn threshold_is_exclusive() {
        let lookup = CatalogLookup::new(
            Arc::new(Scripted::new(vec![])),
            Arc::new(RateLimiter::unlimited()),
            &Config {
                acceptance_threshold: 1.0,
                ..config()
            },
        );
        let outcome = lookup.rank("Berserk", &[cand("2", "Berserk")]);
        assert!(matches!(outcome, LookupOutcome::NoMatch { .. }));
    }

    #[tokio::test]
    async fn no_candidates_is_unmatched() {
        let client = Arc::new(Scripted::new(vec![Ok(vec![])]));
        let outcome = lookup_with(client).lookup_outcome("Berserk").await;
        assert_eq!(
            outcome,
            LookupOutcome::NoMatch {
                candidates: 0,
                best_score: 0.0
            }
        );
    }

    #[tokio::test]
    async fn http_error_is_soft_failure() {
        let client = Arc::new(Scripted::new(vec![Err(SearchError::Status(500))]));
        let lookup = lookup_with(client.clone());
        let outcome = lookup.lookup_outcome("Berserk").await;
        assert_eq!(outcome, LookupOutcome::Failed(SearchError::Status(500)));
        assert_eq!(client.call_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_is_soft_failure() {
        let lookup = lookup_with(Arc::new(Hanging));
        let start = tokio::time::Instant::now();
        let outcome = lookup.lookup_outcome("Berserk").await;
        assert_eq!(outcome, LookupOutcome::Failed(SearchError::Timeout));
        assert!(start.elapsed() >= Duration::from_secs(10));
        assert!(start.elapsed() < Duration::from_secs(11));
    }

    #[tokio::test(start_paused = true)]
    async fn rate_limited_once_then_retried() {
        let client = Arc::new(Scripted::new(vec![
            Err(SearchError::RateLimited { retry_after: None }),
            Ok(vec![cand("2", "Berserk")]),
        ]));
        let lookup = lookup_with(client.clone());
        let start = tokio::time::Instant::now();
        let result = lookup.lookup("Berserk").await;
        assert!(result.is_match());
        assert_eq!(client.call_count(), 2);
        assert!(start.elapsed() >= Duration::from_secs(2));
    }

    #[tokio::test(start_paused = true)]
    async fn retry_after_header_sets_backoff() {
        let client = Arc::new(Scripted::new(vec![
            Err(SearchError::RateLimited {
                retry_after: Some(Duration::from_secs(7)),
            }),
            Ok(vec![cand("2", "Berserk")]),
        ]));
        let lookup = lookup_with(client.clone());
        let start = tokio::time::Instant::now();
        lookup.lookup("Berserk").await;
        let calls = client.calls.lock().unwrap().clone();
        assert!(calls[1] - calls[0] >= Duration::from_secs(7));
        assert!(start.elapsed() < Duration::from_secs(8));
    }

    #[tokio::test(start_paused = true)]
    async fn repeated_429_gives_up_after_one_retry() {
        let client = Arc::new(Scripted::new(vec![
            Err(SearchError::RateLimited { retry_after: None }),
            Err(SearchError::RateLimited { retry_after: None }),
            Ok(vec![cand("2", "Berserk")]),
        ]));
        let lookup = lookup_with(client.clone());
        let outcome = lookup.lookup_outcome("Berserk").await;
        assert!(matches!(outcome, LookupOutcome::Failed(SearchError::RateLimited { .. })));
        assert_eq!(client.call_count(), 2);
        assert_eq!(lookup.limiter().slowdown(), 4);
    }

    #[tokio::test]
    async fn cache_answers_repeat_titles_without_calling() {
        let client = Arc::new(Scripted::new(vec![Ok(vec![cand("2", "Berserk")])]));
        let cache = Arc::new(QueryCache::default());
        let lookup = lookup_with(client.clone()).with_cache(cache.clone());
        assert!(lookup.lookup("Berserk").await.is_match());
        assert!(lookup.lookup("BERSERK").await.is_match());
        assert_eq!(client.call_count(), 1);
        assert_eq!(cache.hits(), 1);
    }

    #[tokio::test]
    async fn failures_are_not_cached() {
        let client = Arc::new(Scripted::new(vec![
            Err(SearchError::Transport("connection reset".into())),
            Ok(vec![cand("2", "Berserk")]),
        ]));
        let cache = Arc::new(QueryCache::default());
        let lookup = lookup_with(client.clone()).with_cache(cache.clone());
        assert!(!lookup.lookup("Berserk").await.is_match());
        assert!(lookup.lookup("Berserk").await.is_match());
        assert_eq!(client.call_count(), 2);
    }
}
