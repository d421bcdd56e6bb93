//! Batch enrichment: label skipping, pooled lookups, and in-order results.

use std::sync::Arc;

use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

use crate::cache::QueryCache;
use crate::catalog::SearchClient;
use crate::lookup::CatalogLookup;
use crate::matching::is_label_title;
use crate::pool::{CompletedLookup, EnrichmentPool, ItemOutcome, LookupJob};
use crate::progress::{ProgressReporter, ProgressSink};
use crate::rate_limit::RateLimiter;
use crate::{Config, CoreError, EnrichStats, EnrichedItem, EnrichmentRun, LogKind, SourceItem};

/// Matches below this confidence are counted as low confidence.
const LOW_CONFIDENCE: f64 = 0.8;

/// Enriches batches of scraped titles against one catalog.
///
/// Owns the rate limiter and query cache, so consecutive batches run through
/// the same enricher share call spacing and cached answers.
pub struct Enricher {
    lookup: Arc<CatalogLookup>,
    config: Config,
}

impl Enricher {
    pub fn new(client: Arc<dyn SearchClient>, config: Config) -> Result<Self, CoreError> {
        config.validate()?;
        let limiter = Arc::new(RateLimiter::new(config.min_interval));
        let mut lookup = CatalogLookup::new(client, limiter, &config);
        if config.use_cache {
            lookup = lookup.with_cache(Arc::new(QueryCache::default()));
        }
        Ok(Self {
            lookup: Arc::new(lookup),
            config,
        })
    }

    /// Enrich `items`, returning one slot per item in input order.
    ///
    /// Per-title failures become unmatched items plus a warning event. Only a
    /// failure to start the worker pool is returned as an error. If `cancel`
    /// fires, unprocessed slots stay empty and the run reports how many.
    pub async fn enrich(
        &self,
        items: &[SourceItem],
        progress: ProgressSink,
        cancel: &CancellationToken,
    ) -> Result<EnrichmentRun, CoreError> {
        let total = items.len();
        let mut slots: Vec<Option<EnrichedItem>> = vec![None; total];
        let mut stats = EnrichStats {
            total,
            ..EnrichStats::default()
        };

        let (labels, searchable): (Vec<usize>, Vec<usize>) =
            (0..total).partition(|&i| is_label_title(&items[i].title));

        let reporter = Arc::new(ProgressReporter::new(
            progress,
            self.config.progress_step,
            self.config.progress_range,
            searchable.len(),
        ));
        reporter.emit(
            LogKind::Info,
            format!(
                "Matching {} titles against {} ({} chapter/volume labels skipped)",
                searchable.len(),
                self.lookup.catalog_name(),
                labels.len()
            ),
        );

        for &i in &labels {
            log::debug!("skipping label title {:?}", items[i].title);
            reporter.emit(LogKind::Info, format!("Skipped label: {}", items[i].title));
            slots[i] = Some(EnrichedItem::unmatched(&items[i]));
            stats.skipped += 1;
        }

        if !searchable.is_empty() {
            let workers = self.config.concurrency.min(searchable.len());
            let pool = EnrichmentPool::new(self.lookup.clone(), reporter.clone(), cancel.clone(), workers)?;

            let mut receivers: Vec<(usize, oneshot::Receiver<CompletedLookup>)> =
                Vec::with_capacity(searchable.len());
            for &i in &searchable {
                if cancel.is_cancelled() {
                    break;
                }
                let (result_tx, result_rx) = oneshot::channel();
                pool.submit(LookupJob {
                    index: i,
                    item: items[i].clone(),
                    result_tx,
                })
                .await;
                receivers.push((i, result_rx));
            }
            pool.shutdown().await;

            for (i, rx) in receivers {
                match rx.await {
                    Ok(done) => {
                        stats.searched += 1;
                        match done.outcome {
                            ItemOutcome::Matched => {
                                stats.matched += 1;
                                if done.item.confidence < LOW_CONFIDENCE {
                                    stats.low_confidence += 1;
                                }
                            }
                            ItemOutcome::NoMatch => stats.unmatched += 1,
                            ItemOutcome::Failed => {
                                stats.unmatched += 1;
                                stats.failed += 1;
                            }
                        }
                        slots[done.index] = Some(done.item);
                    }
                    Err(_) if cancel.is_cancelled() => {}
                    Err(_) => {
                        // The worker died mid-job without cancellation
                        let title = &items[i].title;
                        log::error!("lookup for {title:?} ended without a result");
                        reporter.complete(LogKind::Error, |p| {
                            format!("Lookup aborted for {title} [{p}%]")
                        });
                        slots[i] = Some(EnrichedItem::unmatched(&items[i]));
                        stats.unmatched += 1;
                        stats.failed += 1;
                    }
                }
            }
        }

        stats.cancelled = slots.iter().filter(|s| s.is_none()).count();

        if stats.cancelled > 0 {
            log::warn!(
                "enrichment cancelled: {} of {total} titles not processed",
                stats.cancelled
            );
            reporter.emit(
                LogKind::Warning,
                format!(
                    "Cancelled: {}/{total} matched, {} not processed",
                    stats.matched, stats.cancelled
                ),
            );
        } else {
            log::info!(
                "enrichment done: {}/{total} matched ({} skipped, {} failed)",
                stats.matched,
                stats.skipped,
                stats.failed
            );
            reporter.finish(LogKind::Success, format!("{}/{total} matched", stats.matched));
        }

        Ok(EnrichmentRun { slots, stats })
    }
}

/// One-shot convenience wrapper around [`Enricher`].
pub async fn enrich_items(
    items: &[SourceItem],
    client: Arc<dyn SearchClient>,
    config: Config,
    progress: ProgressSink,
    cancel: &CancellationToken,
) -> Result<EnrichmentRun, CoreError> {
    Enricher::new(client, config)?.enrich(items, progress, cancel).await
}
