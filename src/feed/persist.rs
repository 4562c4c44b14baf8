use std::sync::Arc;

use super::error::UpdateError;
use super::fetcher::FetchOutcome;
use super::settings::positive_setting;
use crate::filter::{FilterDecision, FilterEngine};
use crate::storage::{DatabaseError, Feed, FeedMeta, FeedStatus, Store, SETTING_MAX_POSTS};

/// Retention used when neither storage nor the config file sets one.
pub const DEFAULT_MAX_POSTS: i64 = 100;

/// What one save did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SaveReport {
    /// Entries inserted or updated
    pub written: u64,
    /// Entries removed by retention
    pub trimmed: u64,
    /// Entries discarded by the filter engine
    pub filtered_out: usize,
}

/// Filters a fetch outcome and commits what survives.
pub struct Persister {
    store: Arc<dyn Store>,
    engine: Arc<FilterEngine>,
    default_max_posts: i64,
}

impl Persister {
    pub fn new(store: Arc<dyn Store>, engine: Arc<FilterEngine>, default_max_posts: i64) -> Self {
        Self {
            store,
            engine,
            default_max_posts,
        }
    }

    /// Retention count: storage setting, else the configured default.
    pub async fn max_posts(&self) -> i64 {
        positive_setting(self.store.as_ref(), SETTING_MAX_POSTS)
            .await
            .unwrap_or(self.default_max_posts)
    }

    /// Filter the outcome's items and persist the survivors.
    ///
    /// The feed row is always updated (last fetched, validators, title),
    /// even when nothing survives. With survivors, metadata update, upsert
    /// and retention trim run in one transaction.
    ///
    /// An entry is kept when the filter engine fails on it.
    pub async fn save(&self, outcome: &FetchOutcome) -> Result<SaveReport, UpdateError> {
        let feed = &outcome.feed;
        let mut report = SaveReport::default();

        let mut survivors = Vec::with_capacity(outcome.items.len());
        for item in &outcome.items {
            match self
                .engine
                .filter_entry(item, feed.category_str(), &feed.tags)
                .await
            {
                Ok(FilterDecision::Keep) => survivors.push(item.clone()),
                Ok(FilterDecision::Discard) => {
                    report.filtered_out += 1;
                    tracing::debug!(feed_id = feed.id, url = %item.url, "Entry filtered out");
                }
                Err(e) => {
                    tracing::warn!(
                        feed_id = feed.id,
                        url = %item.url,
                        error = %e,
                        "Filter evaluation failed, keeping entry"
                    );
                    survivors.push(item.clone());
                }
            }
        }

        if report.filtered_out > 0 {
            tracing::info!(
                feed_id = feed.id,
                filtered = report.filtered_out,
                kept = survivors.len(),
                "Entries filtered"
            );
        }

        let meta = FeedMeta {
            feed_id: feed.id,
            title: outcome
                .title
                .as_deref()
                .map(str::trim)
                .filter(|t| !t.is_empty())
                .map(str::to_owned),
            site_url: outcome.site_url.clone(),
            validators: Some(outcome.validators.clone()).filter(|v| !v.is_empty()),
            status: FeedStatus::Active,
            error: None,
        };

        if survivors.is_empty() {
            self.store.update_feed_meta(&meta).await?;
            return Ok(report);
        }

        let keep = self.max_posts().await;
        let commit = self
            .store
            .commit_feed_update(&meta, &survivors, keep)
            .await?;
        report.written = commit.written;
        report.trimmed = commit.trimmed;
        Ok(report)
    }

    /// Mark the feed as errored with the failure's message.
    pub async fn record_failure(&self, feed: &Feed, error: &UpdateError) -> Result<(), DatabaseError> {
        self.store
            .update_feed_meta(&FeedMeta {
                feed_id: feed.id,
                title: None,
                site_url: None,
                validators: None,
                status: FeedStatus::Error,
                error: Some(error.to_string()),
            })
            .await
    }
}
