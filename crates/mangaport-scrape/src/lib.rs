use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

mod follows;
mod parse;

pub use follows::{FollowsScraper, DEFAULT_MAX_PAGES, DEFAULT_PAGE_DELAY};
pub use parse::parse_follows_page;

#[derive(Error, Debug)]
pub enum ScrapeError {
    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("invalid URL: {0}")]
    Url(#[from] url::ParseError),
    #[error("listing page {page} returned status {status}")]
    Status { page: u32, status: u16 },
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// A followed title as it appears on the source site.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SourceItem {
    pub title: String,
    pub url: String,
}

impl SourceItem {
    pub fn new(title: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            url: url.into(),
        }
    }
}

/// Load a JSON array of source items.
///
/// Unknown fields are ignored, so earlier enriched dumps can be fed back in.
pub fn load_items(path: &Path) -> Result<Vec<SourceItem>, ScrapeError> {
    let raw = std::fs::read_to_string(path)?;
    let items: Vec<SourceItem> = serde_json::from_str(&raw)?;
    Ok(items)
}

/// Write source items as a pretty-printed JSON array.
pub fn save_items(path: &Path, items: &[SourceItem]) -> Result<(), ScrapeError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    let json = serde_json::to_string_pretty(items)?;
    std::fs::write(path, json)?;
    Ok(())
}
