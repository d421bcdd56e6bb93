//! Global call spacing for catalog requests, with adaptive slowdown and 429 backoff.

use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;

/// Cap on the slowdown factor applied after repeated 429s.
const MAX_SLOWDOWN: u32 = 16;

/// Quiet period after the last 429 before the base interval is restored.
const RESTORE_AFTER: Duration = Duration::from_secs(60);

/// Error type for catalog searches, distinguishing rate limiting from other errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SearchError {
    /// Server returned 429 Too Many Requests.
    RateLimited { retry_after: Option<Duration> },
    /// The request did not complete within the lookup timeout.
    Timeout,
    /// Any other non-success HTTP status.
    Status(u16),
    /// Connection or protocol failure.
    Transport(String),
    /// The response body could not be decoded.
    Decode(String),
}

impl std::fmt::Display for SearchError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SearchError::RateLimited {
                retry_after: Some(d),
            } => write!(f, "Rate limited (429), retry after {:.1}s", d.as_secs_f64()),
            SearchError::RateLimited { retry_after: None } => write!(f, "Rate limited (429)"),
            SearchError::Timeout => write!(f, "Request timed out"),
            SearchError::Status(code) => write!(f, "HTTP status {code}"),
            SearchError::Transport(msg) => write!(f, "Transport error: {msg}"),
            SearchError::Decode(msg) => write!(f, "Invalid response: {msg}"),
        }
    }
}

impl std::error::Error for SearchError {}

impl From<reqwest::Error> for SearchError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            SearchError::Timeout
        } else if e.is_decode() {
            SearchError::Decode(e.to_string())
        } else {
            SearchError::Transport(e.to_string())
        }
    }
}

/// How long to wait before the single retry that follows a 429.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    /// Delay after the first 429 of a streak.
    pub initial: Duration,
    /// Upper bound for any backoff, including server-provided Retry-After.
    pub max: Duration,
    /// Upper bound of random jitter added to computed delays.
    pub jitter: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            initial: Duration::from_secs(2),
            max: Duration::from_secs(60),
            jitter: Duration::from_millis(250),
        }
    }
}

impl BackoffPolicy {
    /// Delay for the `streak`-th consecutive 429 (1-based).
    ///
    /// A server `Retry-After` wins over the computed exponential delay; both are
    /// capped at `max`.
    pub fn delay(&self, streak: u32, retry_after: Option<Duration>) -> Duration {
        let delay = retry_after.unwrap_or_else(|| {
            let exp = streak.saturating_sub(1).min(16);
            let base = self.initial.saturating_mul(1u32 << exp);
            let jitter_ms = self.jitter.as_millis() as u64;
            if jitter_ms == 0 {
                base
            } else {
                base.saturating_add(Duration::from_millis(fastrand::u64(0..jitter_ms)))
            }
        });
        delay.min(self.max)
    }
}

/// Process-wide gate spacing the *starts* of catalog calls.
///
/// Holds a single "last call" timestamp behind a lock. `acquire` sleeps while
/// holding the lock, so concurrent workers queue up behind each other and no
/// two calls start closer than the current interval. In-flight calls may still
/// overlap.
///
/// When the remote answers 429 the interval is doubled (up to 16x); after 60s
/// without another 429 it returns to the base interval.
pub struct RateLimiter {
    min_interval: Duration,
    last_call: Mutex<Option<Instant>>,
    /// Current slowdown factor (1 = normal, 2 = half rate, etc.).
    slowdown: AtomicU32,
    /// Consecutive 429s since the last successful call.
    streak: AtomicU32,
    last_429: std::sync::Mutex<Option<Instant>>,
}

impl RateLimiter {
    pub fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            last_call: Mutex::new(None),
            slowdown: AtomicU32::new(1),
            streak: AtomicU32::new(0),
            last_429: std::sync::Mutex::new(None),
        }
    }

    /// A limiter that never blocks.
    pub fn unlimited() -> Self {
        Self::new(Duration::ZERO)
    }

    pub fn min_interval(&self) -> Duration {
        self.min_interval
    }

    /// Base interval scaled by the current slowdown factor.
    pub fn current_interval(&self) -> Duration {
        self.min_interval
            .saturating_mul(self.slowdown.load(Ordering::SeqCst))
    }

    /// Wait until a call may start, then claim the slot.
    pub async fn acquire(&self) {
        if self.min_interval.is_zero() {
            return;
        }

        let mut last = self.last_call.lock().await;
        // Read after queueing so a 429 seen while waiting slows this call too
        self.try_restore();
        let interval = self.current_interval();
        if let Some(prev) = *last {
            let wait = interval.saturating_sub(prev.elapsed());
            if !wait.is_zero() {
                log::debug!("rate limiter: waiting {:.2}s", wait.as_secs_f64());
                tokio::time::sleep(wait).await;
            }
        }
        *last = Some(Instant::now());
    }

    /// Called when a 429 is received. Doubles the slowdown factor and returns
    /// the length of the current 429 streak.
    pub fn on_rate_limited(&self) -> u32 {
        if let Ok(mut last) = self.last_429.lock() {
            *last = Some(Instant::now());
        }

        // Double factor, cap at 16x slowdown
        let _ = self
            .slowdown
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |f| Some((f * 2).min(MAX_SLOWDOWN)));

        self.streak.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Called after a call that was not rate limited. Ends the 429 streak.
    pub fn record_success(&self) {
        self.streak.store(0, Ordering::SeqCst);
    }

    /// Current slowdown factor.
    pub fn slowdown(&self) -> u32 {
        self.slowdown.load(Ordering::SeqCst)
    }

    /// If 60s have passed since the last 429, restore the base interval.
    fn try_restore(&self) {
        let should_restore = self
            .last_429
            .lock()
            .ok()
            .and_then(|last| last.map(|t| t.elapsed() >= RESTORE_AFTER))
            .unwrap_or(false);

        if should_restore && self.slowdown.load(Ordering::SeqCst) > 1 {
            log::info!("rate limiter: no 429 for {}s, restoring base rate", RESTORE_AFTER.as_secs());
            self.slowdown.store(1, Ordering::SeqCst);
        }
    }
}

impl std::fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimiter")
            .field("min_interval", &self.min_interval)
            .field("slowdown", &self.slowdown())
            .field("streak", &self.streak.load(Ordering::SeqCst))
            .finish()
    }
}

/// Check if an HTTP response is a 429 and extract Retry-After if present.
///
/// Returns `Err(SearchError::RateLimited { .. })` if 429, `Ok(())` otherwise.
pub fn check_rate_limit_response(resp: &reqwest::Response) -> Result<(), SearchError> {
    if resp.status().as_u16() == 429 {
        let retry_after = resp
            .headers()
            .get("retry-after")
            .and_then(|v| v.to_str().ok())
            .and_then(parse_retry_after);
        Err(SearchError::RateLimited { retry_after })
    } else {
        Ok(())
    }
}

/// Parse a Retry-After header value (seconds or HTTP-date).
pub fn parse_retry_after(value: &str) -> Option<Duration> {
    if let Ok(secs) = value.trim().parse::<u64>() {
        return Some(Duration::from_secs(secs));
    }
    // HTTP-date form: use a conservative fixed wait rather than parsing the date
    if value.contains(',') || value.contains("GMT") {
        return Some(Duration::from_secs(5));
    }
    None
}
