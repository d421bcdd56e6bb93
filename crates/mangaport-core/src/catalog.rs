//! Catalog search backends.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::rate_limit::{check_rate_limit_response, SearchError};

/// Public Jikan (unofficial MyAnimeList) API.
pub const JIKAN_BASE_URL: &str = "https://api.jikan.moe/v4";

/// Number of candidates requested per search.
pub const DEFAULT_RESULT_LIMIT: u32 = 5;

/// One ranked search hit from the catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogCandidate {
    pub catalog_id: String,
    pub title: String,
    #[serde(default)]
    pub alternate_titles: Vec<String>,
}

impl CatalogCandidate {
    /// Primary title followed by the alternates.
    pub fn variants(&self) -> impl Iterator<Item = &str> {
        std::iter::once(self.title.as_str()).chain(self.alternate_titles.iter().map(String::as_str))
    }
}

pub type SearchFuture<'a> =
    Pin<Box<dyn Future<Output = Result<Vec<CatalogCandidate>, SearchError>> + Send + 'a>>;

/// A catalog that can be searched by title.
///
/// Implementations perform exactly one request per call; spacing, timeouts and
/// retries are the caller's job.
pub trait SearchClient: Send + Sync {
    /// Display name used in logs and cache keys.
    fn name(&self) -> &str;

    fn search<'a>(&'a self, query: &'a str) -> SearchFuture<'a>;
}

/// Jikan `/manga` search client.
#[derive(Debug, Clone)]
pub struct JikanClient {
    client: reqwest::Client,
    base_url: String,
    limit: u32,
    timeout: Duration,
}

impl JikanClient {
    pub fn new(client: reqwest::Client) -> Self {
        Self {
            client,
            base_url: JIKAN_BASE_URL.to_string(),
            limit: DEFAULT_RESULT_LIMIT,
            timeout: Duration::from_secs(10),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_limit(mut self, limit: u32) -> Self {
        self.limit = limit.max(1);
        self
    }

    /// Transport-level timeout; the lookup layer enforces its own as well.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn search_url(&self, query: &str) -> String {
        format!(
            "{}/manga?q={}&limit={}",
            self.base_url,
            urlencoding::encode(query),
            self.limit
        )
    }
}

impl SearchClient for JikanClient {
    fn name(&self) -> &str {
        "Jikan"
    }

    fn search<'a>(&'a self, query: &'a str) -> SearchFuture<'a> {
        Box::pin(async move {
            let url = self.search_url(query);
            let resp = self.client.get(&url).timeout(self.timeout).send().await?;

            check_rate_limit_response(&resp)?;
            if !resp.status().is_success() {
                return Err(SearchError::Status(resp.status().as_u16()));
            }

            let body = resp.text().await?;
            parse_jikan_response(&body)
        })
    }
}

#[derive(Deserialize)]
struct JikanSearchResponse {
    #[serde(default)]
    data: Vec<JikanManga>,
}

#[derive(Deserialize)]
struct JikanManga {
    mal_id: u64,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    title_english: Option<String>,
    #[serde(default)]
    title_japanese: Option<String>,
    #[serde(default)]
    title_synonyms: Vec<String>,
    #[serde(default)]
    titles: Vec<JikanTitle>,
}

#[derive(Deserialize)]
struct JikanTitle {
    title: String,
}

/// Decode a Jikan `/manga` search body into candidates, preserving rank order.
pub fn parse_jikan_response(body: &str) -> Result<Vec<CatalogCandidate>, SearchError> {
    let parsed: JikanSearchResponse =
        serde_json::from_str(body).map_err(|e| SearchError::Decode(e.to_string()))?;

    Ok(parsed.data.into_iter().map(JikanManga::into_candidate).collect())
}

impl JikanManga {
    fn into_candidate(self) -> CatalogCandidate {
        let title = self.title.unwrap_or_default();
        let mut alternate_titles: Vec<String> = Vec::new();
        let extra = self
            .title_english
            .into_iter()
            .chain(self.title_japanese)
            .chain(self.title_synonyms)
            .chain(self.titles.into_iter().map(|t| t.title));
        for alt in extra {
            let alt = alt.trim();
            if alt.is_empty() || alt == title || alternate_titles.iter().any(|a| a == alt) {
                continue;
            }
            alternate_titles.push(alt.to_string());
        }

        CatalogCandidate {
            catalog_id: self.mal_id.to_string(),
            title,
            alternate_titles,
        }
    }
}
