//! In-memory cache for catalog lookup results.
//!
//! Avoids a second rate-limited search when the same title shows up again,
//! whether later in the same batch or in a later run sharing the cache.
//!
//! Cache keys use [`normalize_title`](crate::matching::normalize_title), so
//! case, width and whitespace variants of a title share one entry. Only
//! definite answers (matched or no match) are cached; timeouts, 429s and
//! transport failures never are.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use dashmap::DashMap;
use tokio::time::Instant;

use crate::matching::normalize_title;
use crate::MatchResult;

/// Default time-to-live for matched entries.
const DEFAULT_POSITIVE_TTL: Duration = Duration::from_secs(24 * 60 * 60);

/// Default time-to-live for no-match entries.
const DEFAULT_NEGATIVE_TTL: Duration = Duration::from_secs(6 * 60 * 60);

#[derive(Hash, Eq, PartialEq, Clone, Debug)]
struct CacheKey {
    normalized_title: String,
    catalog: String,
}

#[derive(Clone, Debug)]
struct CacheEntry {
    result: MatchResult,
    inserted_at: Instant,
}

/// Thread-safe cache shared by all enrichment workers.
pub struct QueryCache {
    entries: DashMap<CacheKey, CacheEntry>,
    positive_ttl: Duration,
    negative_ttl: Duration,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl Default for QueryCache {
    fn default() -> Self {
        Self::new(DEFAULT_POSITIVE_TTL, DEFAULT_NEGATIVE_TTL)
    }
}

impl QueryCache {
    pub fn new(positive_ttl: Duration, negative_ttl: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            positive_ttl,
            negative_ttl,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Cached result for `title` in `catalog`, if present and not expired.
    pub fn get(&self, title: &str, catalog: &str) -> Option<MatchResult> {
        let key = CacheKey {
            normalized_title: normalize_title(title),
            catalog: catalog.to_string(),
        };

        let entry = match self.entries.get(&key) {
            Some(e) => e,
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                return None;
            }
        };
        let ttl = if entry.result.is_match() {
            self.positive_ttl
        } else {
            self.negative_ttl
        };

        if entry.inserted_at.elapsed() > ttl {
            // Expired: drop the read guard before removing
            drop(entry);
            self.entries.remove(&key);
            self.misses.fetch_add(1, Ordering::Relaxed);
            return None;
        }

        self.hits.fetch_add(1, Ordering::Relaxed);
        Some(entry.result.clone())
    }

    /// Remember a definite lookup answer.
    pub fn insert(&self, title: &str, catalog: &str, result: &MatchResult) {
        let key = CacheKey {
            normalized_title: normalize_title(title),
            catalog: catalog.to_string(),
        };
        self.entries.insert(
            key,
            CacheEntry {
                result: result.clone(),
                inserted_at: Instant::now(),
            },
        );
    }

    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl std::fmt::Debug for QueryCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryCache")
            .field("entries", &self.entries.len())
            .field("hits", &self.hits())
            .field("misses", &self.misses())
            .field("positive_ttl", &self.positive_ttl)
            .field("negative_ttl", &self.negative_ttl)
            .finish()
    }
}
