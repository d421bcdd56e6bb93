//! Listing page parsing.

use std::collections::HashSet;

use once_cell::sync::Lazy;
use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use url::Url;

use crate::SourceItem;

/// Containers that hold one followed title each.
static ITEM_SELECTOR: Lazy<Selector> = Lazy::new(|| {
    Selector::parse(r#".item, .manga-item, [class*="manga"]"#).expect("valid item selector")
});

/// The title link inside an item container.
static TITLE_LINK_SELECTOR: Lazy<Selector> = Lazy::new(|| {
    Selector::parse(r#"a[href*="/title/"], a[href*="/manga/"], .title a, h3 a"#)
        .expect("valid title link selector")
});

static WHITESPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").unwrap());

/// Extract `(title, url)` pairs from one page of a followed-titles listing.
///
/// Relative links are resolved against `base_url`. Items are de-duplicated by
/// `(title, url)`, keeping the first occurrence, since nested containers can
/// match the item selector more than once. An empty result means the page has
/// no listing entries (the end of pagination).
pub fn parse_follows_page(html: &str, base_url: &Url) -> Vec<SourceItem> {
    let document = Html::parse_document(html);
    let mut seen = HashSet::new();
    let mut items = Vec::new();

    for container in document.select(&ITEM_SELECTOR) {
        let Some(link) = container.select(&TITLE_LINK_SELECTOR).next() else {
            continue;
        };
        let Some(item) = item_from_link(link, base_url) else {
            continue;
        };
        if seen.insert((item.title.clone(), item.url.clone())) {
            items.push(item);
        }
    }

    items
}

fn item_from_link(link: ElementRef<'_>, base_url: &Url) -> Option<SourceItem> {
    let text: String = link.text().collect();
    let title = WHITESPACE.replace_all(text.trim(), " ").into_owned();
    if title.is_empty() {
        return None;
    }

    let href = link.value().attr("href")?.trim();
    if href.is_empty() {
        return None;
    }
    let url = match base_url.join(href) {
        Ok(u) => u.to_string(),
        Err(e) => {
            log::debug!("skipping link with unresolvable href {href:?}: {e}");
            return None;
        }
    };

    Some(SourceItem { title, url })
}
