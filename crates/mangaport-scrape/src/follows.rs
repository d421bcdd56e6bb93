use std::collections::HashSet;
use std::time::Duration;

use url::Url;

use crate::{parse_follows_page, ScrapeError, SourceItem};

/// Pagination stops here even if pages keep returning entries.
pub const DEFAULT_MAX_PAGES: u32 = 50;

/// Pause between page fetches.
pub const DEFAULT_PAGE_DELAY: Duration = Duration::from_secs(1);

const PAGE_TIMEOUT: Duration = Duration::from_secs(30);

/// Walks a paginated followed-titles listing (`?page=1`, `?page=2`, ...).
///
/// Only static HTML listings are supported; pages that need a logged-in
/// session or JavaScript rendering come back empty.
pub struct FollowsScraper {
    client: reqwest::Client,
    listing_url: Url,
    max_pages: u32,
    page_delay: Duration,
}

impl FollowsScraper {
    pub fn new(client: reqwest::Client, listing_url: &str) -> Result<Self, ScrapeError> {
        Ok(Self {
            client,
            listing_url: Url::parse(listing_url)?,
            max_pages: DEFAULT_MAX_PAGES,
            page_delay: DEFAULT_PAGE_DELAY,
        })
    }

    pub fn with_max_pages(mut self, max_pages: u32) -> Self {
        self.max_pages = max_pages.max(1);
        self
    }

    pub fn with_page_delay(mut self, delay: Duration) -> Self {
        self.page_delay = delay;
        self
    }

    /// URL of the given 1-based page, replacing any `page` parameter already present.
    pub fn page_url(&self, page: u32) -> Url {
        let mut url = self.listing_url.clone();
        let kept: Vec<(String, String)> = url
            .query_pairs()
            .filter(|(k, _)| k != "page")
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();
        {
            let mut pairs = url.query_pairs_mut();
            pairs.clear();
            for (k, v) in &kept {
                pairs.append_pair(k, v);
            }
            pairs.append_pair("page", &page.to_string());
        }
        url
    }

    /// Fetch pages until one is empty or adds no new titles, returns an error
    /// status, or the page limit is hit.
    ///
    /// `progress` receives `(page, items_found_so_far)` after each page. A failing
    /// first page is an error; a failing later page ends pagination with what was
    /// collected so far.
    pub async fn scrape(&self, progress: impl Fn(u32, usize)) -> Result<Vec<SourceItem>, ScrapeError> {
        let mut seen = HashSet::new();
        let mut items = Vec::new();

        for page in 1..=self.max_pages {
            if page > 1 && !self.page_delay.is_zero() {
                tokio::time::sleep(self.page_delay).await;
            }

            let url = self.page_url(page);
            log::debug!("fetching listing page {page}: {url}");
            let resp = self.client.get(url.clone()).timeout(PAGE_TIMEOUT).send().await?;

            let status = resp.status();
            if !status.is_success() {
                if page == 1 {
                    return Err(ScrapeError::Status {
                        page,
                        status: status.as_u16(),
                    });
                }
                log::warn!("listing page {page} returned {status}; stopping pagination");
                break;
            }

            let body = resp.text().await?;
            let page_items = parse_follows_page(&body, &url);
            if page_items.is_empty() {
                log::info!("listing page {page} is empty; scraped {} titles", items.len());
                break;
            }

            let before = items.len();
            for item in page_items {
                if seen.insert((item.title.clone(), item.url.clone())) {
                    items.push(item);
                }
            }
            if items.len() == before {
                log::info!("listing page {page} repeats earlier pages; scraped {} titles", items.len());
                break;
            }
            progress(page, items.len());

            if page == self.max_pages {
                log::warn!("reached the {} page limit", self.max_pages);
            }
        }

        Ok(items)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_url_appends_page_parameter() {
        let s = FollowsScraper::new(reqwest::Client::new(), "https://mangapark.net/auser/follows").unwrap();
        assert_eq!(s.page_url(3).as_str(), "https://mangapark.net/auser/follows?page=3");
    }

    #[test]
    fn page_url_replaces_existing_page_and_keeps_other_params() {
        let s = FollowsScraper::new(
            reqwest::Client::new(),
            "https://mangapark.net/auser/follows?sort=update&page=7",
        )
        .unwrap();
        assert_eq!(
            s.page_url(2).as_str(),
            "https://mangapark.net/auser/follows?sort=update&page=2"
        );
    }

    #[test]
    fn rejects_invalid_listing_url() {
        assert!(matches!(
            FollowsScraper::new(reqwest::Client::new(), "not a url"),
            Err(ScrapeError::Url(_))
        ));
    }

    #[test]
    fn max_pages_is_at_least_one() {
        let s = FollowsScraper::new(reqwest::Client::new(), "https://example.org/f")
            .unwrap()
            .with_max_pages(0);
        assert_eq!(s.max_pages, 1);
    }

    /// Serves `body` for every request and counts the requests.
    async fn serve_same_page(body: &'static str) -> (String, std::sync::Arc<std::sync::atomic::AtomicUsize>) {
        use std::sync::atomic::{AtomicUsize, Ordering};
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let hits = std::sync::Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();
        tokio::spawn(async move {
            loop {
                let Ok((mut stream, _)) = listener.accept().await else {
                    break;
                };
                counter.fetch_add(1, Ordering::SeqCst);
                tokio::spawn(async move {
                    let mut request = Vec::new();
                    let mut buf = [0u8; 1024];
                    while !request.windows(4).any(|w| w == b"\r\n\r\n") {
                        match stream.read(&mut buf).await {
                            Ok(0) | Err(_) => return,
                            Ok(n) => request.extend_from_slice(&buf[..n]),
                        }
                    }
                    let response = format!(
                        "HTTP/1.1 200 OK\r\nContent-Type: text/html\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                        body.len()
                    );
                    let _ = stream.write_all(response.as_bytes()).await;
                    let _ = stream.shutdown().await;
                });
            }
        });
        (format!("http://{addr}/user/follows"), hits)
    }

    #[tokio::test]
    async fn stops_when_a_page_repeats_earlier_titles() {
        let (url, hits) = serve_same_page(
            r#"<div class="item"><h3><a href="/title/10-berserk">Berserk</a></h3></div>
               <div class="item"><h3><a href="/title/11-vagabond">Vagabond</a></h3></div>"#,
        )
        .await;
        let client = reqwest::Client::builder().no_proxy().build().unwrap();
        let scraper = FollowsScraper::new(client, &url)
            .unwrap()
            .with_page_delay(Duration::ZERO);

        let pages = std::sync::Mutex::new(Vec::new());
        let items = scraper
            .scrape(|page, found| pages.lock().unwrap().push((page, found)))
            .await
            .unwrap();

        assert_eq!(items.len(), 2);
        assert_eq!(items[0].title, "Berserk");
        assert_eq!(*pages.lock().unwrap(), vec![(1, 2)]);
        assert_eq!(hits.load(std::sync::atomic::Ordering::SeqCst), 2);
    }
}
