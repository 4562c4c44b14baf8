use std::sync::Arc;
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use super::error::UpdateError;
use super::fetcher::{FeedSource, FetchOutcome};
use super::persist::Persister;
use super::settings::positive_setting;
use crate::storage::{Feed, FeedStatus, Store, SETTING_FEED_CONCURRENCY};

const MIN_DEFAULT_CONCURRENCY: usize = 4;
const MAX_DEFAULT_CONCURRENCY: usize = 32;
const MAX_CONCURRENCY: usize = 128;

/// Default fetch concurrency: 4 per CPU, clamped to [4, 32].
pub fn default_concurrency() -> usize {
    let cpus = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1);
    cpus.saturating_mul(4)
        .clamp(MIN_DEFAULT_CONCURRENCY, MAX_DEFAULT_CONCURRENCY)
}

/// An explicit override is clamped to [1, 128]; otherwise the default.
pub fn resolve_concurrency(configured: Option<usize>) -> usize {
    match configured {
        Some(n) => n.clamp(1, MAX_CONCURRENCY),
        None => default_concurrency(),
    }
}

/// Counters for one update cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UpdateSummary {
    /// Feeds dispatched for fetching
    pub attempted: usize,
    pub succeeded: usize,
    pub failed: usize,
    /// Disabled feeds, never dispatched
    pub skipped: usize,
    /// Dispatched feeds that never completed because the cycle was cancelled
    pub cancelled: usize,
    pub not_modified: usize,
    pub written: u64,
    pub filtered_out: usize,
}

struct FetchResult {
    feed: Feed,
    result: Result<FetchOutcome, UpdateError>,
}

/// Runs update cycles over every subscribed feed.
///
/// Fetches run concurrently behind a semaphore; results are persisted one
/// at a time in completion order. A failing feed is recorded and logged
/// without affecting the others.
pub struct Scheduler {
    store: Arc<dyn Store>,
    source: Arc<dyn FeedSource>,
    persister: Arc<Persister>,
    configured_concurrency: Option<usize>,
}

impl Scheduler {
    pub fn new(store: Arc<dyn Store>, source: Arc<dyn FeedSource>, persister: Arc<Persister>) -> Self {
        Self {
            store,
            source,
            persister,
            configured_concurrency: None,
        }
    }

    /// Concurrency from the config file, used when storage has no setting.
    pub fn with_concurrency(mut self, configured: Option<usize>) -> Self {
        self.configured_concurrency = configured;
        self
    }

    pub async fn concurrency(&self) -> usize {
        let setting = positive_setting::<usize>(self.store.as_ref(), SETTING_FEED_CONCURRENCY).await;
        resolve_concurrency(setting.or(self.configured_concurrency))
    }

    /// Fetch, filter and persist every non-disabled feed once.
    ///
    /// Only failing to list feeds is an error; per-feed failures are
    /// counted in the summary. When `cancel` fires, in-flight fetches are
    /// dropped and queued ones never start.
    pub async fn update_feeds(&self, cancel: &CancellationToken) -> Result<UpdateSummary, UpdateError> {
        let feeds = self.store.list_feeds().await?;
        let mut summary = UpdateSummary::default();

        let (active, disabled): (Vec<Feed>, Vec<Feed>) = feeds
            .into_iter()
            .partition(|f| f.status != FeedStatus::Disabled);
        summary.skipped = disabled.len();
        summary.attempted = active.len();

        if active.is_empty() {
            tracing::info!(skipped = summary.skipped, "No feeds to update");
            return Ok(summary);
        }

        let limit = self.concurrency().await;
        tracing::debug!(feeds = active.len(), concurrency = limit, "Starting update cycle");

        let semaphore = Arc::new(Semaphore::new(limit));
        // Sized to the feed count so producers never wait on the consumer
        let (tx, mut rx) = mpsc::channel(active.len());
        let mut tasks = JoinSet::new();

        for feed in active {
            let source = Arc::clone(&self.source);
            let semaphore = Arc::clone(&semaphore);
            let cancel = cancel.clone();
            let tx = tx.clone();

            tasks.spawn(async move {
                let permit = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return,
                    permit = semaphore.acquire_owned() => match permit {
                        Ok(permit) => permit,
                        Err(_) => return,
                    },
                };

                let result = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => {
                        tracing::debug!(feed_id = feed.id, "Fetch cancelled");
                        return;
                    }
                    result = source.fetch(&feed) => result,
                };
                drop(permit);

                let _ = tx.send(FetchResult { feed, result }).await;
            });
        }
        drop(tx);

        while let Some(FetchResult { feed, result }) = rx.recv().await {
            self.process(feed, result, &mut summary).await;
        }

        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined {
                if e.is_panic() {
                    tracing::error!(error = %e, "Fetch task panicked");
                    summary.failed += 1;
                }
            }
        }

        summary.cancelled = summary
            .attempted
            .saturating_sub(summary.succeeded + summary.failed);

        tracing::info!(
            attempted = summary.attempted,
            succeeded = summary.succeeded,
            failed = summary.failed,
            skipped = summary.skipped,
            cancelled = summary.cancelled,
            not_modified = summary.not_modified,
            written = summary.written,
            filtered_out = summary.filtered_out,
            "Update cycle finished"
        );

        Ok(summary)
    }

    async fn process(
        &self,
        feed: Feed,
        result: Result<FetchOutcome, UpdateError>,
        summary: &mut UpdateSummary,
    ) {
        let outcome = match result {
            Ok(outcome) => outcome,
            Err(e) => {
                self.fail(&feed, e, summary).await;
                return;
            }
        };

        match self.persister.save(&outcome).await {
            Ok(report) => {
                self.source.on_saved(feed.id, &outcome.validators);
                summary.succeeded += 1;
                summary.written += report.written;
                summary.filtered_out += report.filtered_out;
                if outcome.not_modified {
                    summary.not_modified += 1;
                }
                tracing::debug!(
                    feed_id = feed.id,
                    written = report.written,
                    trimmed = report.trimmed,
                    filtered = report.filtered_out,
                    not_modified = outcome.not_modified,
                    "Feed updated"
                );
            }
            Err(e) => self.fail(&feed, e, summary).await,
        }
    }

    async fn fail(&self, feed: &Feed, error: UpdateError, summary: &mut UpdateSummary) {
        summary.failed += 1;
        tracing::warn!(
            feed_id = feed.id,
            url = %feed.url,
            kind = ?error.kind(),
            error = %error,
            "Feed update failed"
        );
        if let Err(e) = self.persister.record_failure(feed, &error).await {
            tracing::warn!(feed_id = feed.id, error = %e, "Failed to record feed error");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_concurrency_bounds() {
        let n = default_concurrency();
        assert!((4..=32).contains(&n));
        assert_eq!(resolve_concurrency(None), n);
    }

    #[test]
    fn test_override_clamped() {
        assert_eq!(resolve_concurrency(Some(0)), 1);
        assert_eq!(resolve_concurrency(Some(7)), 7);
        assert_eq!(resolve_concurrency(Some(1000)), 128);
    }
}
