//! Bounded worker pool for catalog lookups.
//!
//! One mpmc job queue feeds a fixed set of worker tasks. Each job carries a
//! oneshot sender addressed to its result slot, so results land by index no
//! matter which worker finishes first. Dropping a job's receiver, or
//! cancelling the run, abandons the lookup.

use std::sync::Arc;

use tokio::runtime::Handle;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::lookup::{CatalogLookup, LookupOutcome};
use crate::progress::ProgressReporter;
use crate::{CoreError, EnrichedItem, LogKind, SourceItem};

/// A lookup job submitted to the pool.
pub struct LookupJob {
    pub index: usize,
    pub item: SourceItem,
    pub result_tx: oneshot::Sender<CompletedLookup>,
}

/// How a finished lookup ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemOutcome {
    Matched,
    NoMatch,
    /// Timeout, transport error, or a 429 that survived the retry.
    Failed,
}

/// Result sent back for one job.
#[derive(Debug, Clone)]
pub struct CompletedLookup {
    pub index: usize,
    pub item: EnrichedItem,
    pub outcome: ItemOutcome,
}

/// A pool of worker tasks that process lookup jobs.
///
/// Submit jobs via [`submit()`](EnrichmentPool::submit) and await the oneshot
/// receiver paired with each job.
pub struct EnrichmentPool {
    job_tx: async_channel::Sender<LookupJob>,
    workers_handle: JoinHandle<()>,
}

impl EnrichmentPool {
    /// Start `num_workers` workers on the current tokio runtime.
    ///
    /// Fails when called outside a runtime or with zero workers.
    pub fn new(
        lookup: Arc<CatalogLookup>,
        progress: Arc<ProgressReporter>,
        cancel: CancellationToken,
        num_workers: usize,
    ) -> Result<Self, CoreError> {
        if num_workers == 0 {
            return Err(CoreError::Pool("pool needs at least one worker".into()));
        }
        let runtime = Handle::try_current().map_err(|e| CoreError::Pool(e.to_string()))?;
        let (job_tx, job_rx) = async_channel::unbounded::<LookupJob>();

        let spawner = runtime.clone();
        let workers_handle = runtime.spawn(async move {
            let mut handles = Vec::with_capacity(num_workers);
            for _ in 0..num_workers {
                handles.push(spawner.spawn(worker_loop(
                    job_rx.clone(),
                    lookup.clone(),
                    progress.clone(),
                    cancel.clone(),
                )));
            }
            // Workers exit once the queue is closed and drained
            drop(job_rx);
            for h in handles {
                if let Err(e) = h.await {
                    if e.is_panic() {
                        log::error!("lookup worker panicked: {e}");
                    }
                }
            }
        });

        log::debug!("started enrichment pool with {num_workers} workers");
        Ok(Self {
            job_tx,
            workers_handle,
        })
    }

    /// Submit a job to the pool.
    pub async fn submit(&self, job: LookupJob) {
        if self.job_tx.send(job).await.is_err() {
            log::debug!("job submitted to a closed pool; dropping it");
        }
    }

    /// Close the queue and wait for all workers to finish.
    ///
    /// Jobs still queued when the workers stop (after cancellation) are
    /// dropped, which closes their result channels.
    pub async fn shutdown(self) {
        self.job_tx.close();
        let _ = self.workers_handle.await;
    }
}

/// Worker loop: receive jobs, look the title up, send results via oneshot.
async fn worker_loop(
    job_rx: async_channel::Receiver<LookupJob>,
    lookup: Arc<CatalogLookup>,
    progress: Arc<ProgressReporter>,
    cancel: CancellationToken,
) {
    while let Ok(job) = job_rx.recv().await {
        if cancel.is_cancelled() {
            break;
        }

        let LookupJob {
            index,
            item,
            mut result_tx,
        } = job;

        progress.emit(LogKind::Info, format!("Searching catalog for: {}", item.title));

        let outcome = tokio::select! {
            biased;
            _ = result_tx.closed() => continue,
            _ = cancel.cancelled() => break,
            outcome = lookup.lookup_outcome(&item.title) => outcome,
        };

        let completed = match outcome {
            LookupOutcome::Matched(result) => {
                let enriched = EnrichedItem::from_match(&item, result);
                let tier = enriched.tier().map(|t| t.label()).unwrap_or_default();
                progress.complete(LogKind::Success, |p| {
                    format!(
                        "Found: {} -> {} [{}] ({tier}, {:.0}%) [{p}%]",
                        item.title,
                        enriched.matched_title.as_deref().unwrap_or_default(),
                        enriched.catalog_id,
                        enriched.confidence * 100.0,
                    )
                });
                CompletedLookup {
                    index,
                    item: enriched,
                    outcome: ItemOutcome::Matched,
                }
            }
            LookupOutcome::NoMatch { .. } => {
                progress.complete(LogKind::Warning, |p| {
                    format!("No catalog match for: {} [{p}%]", item.title)
                });
                CompletedLookup {
                    index,
                    item: EnrichedItem::unmatched(&item),
                    outcome: ItemOutcome::NoMatch,
                }
            }
            LookupOutcome::Failed(err) => {
                progress.complete(LogKind::Warning, |p| {
                    format!("Lookup failed for {}: {err} [{p}%]", item.title)
                });
                CompletedLookup {
                    index,
                    item: EnrichedItem::unmatched(&item),
                    outcome: ItemOutcome::Failed,
                }
            }
        };

        let _ = result_tx.send(completed);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;
    use std::time::Duration;

    use super::*;
    use crate::catalog::{CatalogCandidate, SearchClient, SearchFuture};
    use crate::progress::{discard, ProgressSink};
    use crate::rate_limit::{RateLimiter, SearchError};
    use crate::{Config, ProgressEvent, ProgressRange};

    struct Echo;

    impl SearchClient for Echo {
        fn name(&self) -> &str {
            "echo"
        }

        fn search<'a>(&'a self, query: &'a str) -> SearchFuture<'a> {
            Box::pin(async move {
                if query == "fail" {
                    return Err(SearchError::Status(503));
                }
                Ok(vec![CatalogCandidate {
                    catalog_id: "7".into(),
                    title: query.to_string(),
                    alternate_titles: vec![],
                }])
            })
        }
    }

    fn lookup() -> Arc<CatalogLookup> {
        let config = Config {
            min_interval: Duration::ZERO,
            ..Config::default()
        };
        Arc::new(CatalogLookup::new(Arc::new(Echo), Arc::new(RateLimiter::unlimited()), &config))
    }

    fn reporter(sink: ProgressSink, total: usize) -> Arc<ProgressReporter> {
        Arc::new(ProgressReporter::new(sink, 1, ProgressRange::FULL, total))
    }

    fn job(index: usize, title: &str) -> (LookupJob, oneshot::Receiver<CompletedLookup>) {
        let (tx, rx) = oneshot::channel();
        (
            LookupJob {
                index,
                item: SourceItem::new(title, format!("u{index}")),
                result_tx: tx,
            },
            rx,
        )
    }

    #[test]
    fn requires_a_runtime() {
        let result = EnrichmentPool::new(lookup(), reporter(discard(), 0), CancellationToken::new(), 2);
        assert!(matches!(result, Err(CoreError::Pool(_))));
    }

    #[tokio::test]
    async fn zero_workers_is_rejected() {
        let result = EnrichmentPool::new(lookup(), reporter(discard(), 0), CancellationToken::new(), 0);
        assert!(matches!(result, Err(CoreError::Pool(_))));
    }

    #[tokio::test]
    async fn results_come_back_by_index() {
        let events = Arc::new(Mutex::new(Vec::<ProgressEvent>::new()));
        let captured = events.clone();
        let sink: ProgressSink = Arc::new(move |e| captured.lock().unwrap().push(e));
        let pool = EnrichmentPool::new(lookup(), reporter(sink, 3), CancellationToken::new(), 2).unwrap();

        let mut receivers = Vec::new();
        for (i, title) in ["Berserk", "fail", "Monster"].iter().enumerate() {
            let (job, rx) = job(i, title);
            pool.submit(job).await;
            receivers.push(rx);
        }
        pool.shutdown().await;

        let mut results = Vec::new();
        for rx in receivers {
            results.push(rx.await.unwrap());
        }
        assert_eq!(results[0].index, 0);
        assert_eq!(results[0].outcome, ItemOutcome::Matched);
        assert_eq!(results[0].item.catalog_id, "7");
        assert_eq!(results[1].outcome, ItemOutcome::Failed);
        assert_eq!(results[1].item.catalog_id, crate::UNMATCHED_ID);
        assert_eq!(results[2].item.title, "Monster");

        let events = events.lock().unwrap();
        let searching = events.iter().filter(|e| e.message.starts_with("Searching")).count();
        let warnings = events.iter().filter(|e| e.kind == LogKind::Warning).count();
        assert_eq!(searching, 3);
        assert_eq!(warnings, 1);
    }

    #[tokio::test]
    async fn cancelled_pool_drops_queued_jobs() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let pool = EnrichmentPool::new(lookup(), reporter(discard(), 2), cancel, 1).unwrap();
        let (first, rx1) = job(0, "Berserk");
        let (second, rx2) = job(1, "Monster");
        pool.submit(first).await;
        pool.submit(second).await;
        pool.shutdown().await;
        assert!(rx1.await.is_err());
        assert!(rx2.await.is_err());
    }
}
