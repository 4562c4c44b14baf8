use async_trait::async_trait;
use std::collections::HashMap;

use super::schema::Database;
use super::types::{CommitReport, DatabaseError, Feed, FeedMeta, FilterGroup, NewEntry};

/// Storage operations the update pipeline depends on.
///
/// [`Database`] is the production implementation; tests substitute
/// in-memory doubles.
#[async_trait]
pub trait Store: Send + Sync {
    /// Every subscribed feed, including disabled ones.
    async fn list_feeds(&self) -> Result<Vec<Feed>, DatabaseError>;

    /// Maximum `published_at` already stored for the feed.
    async fn get_entry_watermark(&self, feed_id: i64) -> Result<Option<i64>, DatabaseError>;

    /// Stored `published_at` for each of `urls` that already has a row.
    async fn get_entry_dates(&self, urls: &[String])
        -> Result<HashMap<String, i64>, DatabaseError>;

    /// Insert entries, updating on URL conflict only when the incoming
    /// entry is strictly newer. Returns rows written.
    async fn upsert_entries(&self, feed_id: i64, entries: &[NewEntry])
        -> Result<u64, DatabaseError>;

    /// Keep only the `keep` most recent entries of the feed.
    async fn trim_entries(&self, feed_id: i64, keep: i64) -> Result<u64, DatabaseError>;

    async fn update_feed_meta(&self, meta: &FeedMeta) -> Result<(), DatabaseError>;

    /// `update_feed_meta`, `upsert_entries` and `trim_entries` in one
    /// transaction.
    async fn commit_feed_update(
        &self,
        meta: &FeedMeta,
        entries: &[NewEntry],
        keep: i64,
    ) -> Result<CommitReport, DatabaseError>;

    /// Active groups joined with their rules and filters.
    async fn get_active_filter_groups(&self) -> Result<Vec<FilterGroup>, DatabaseError>;

    async fn get_setting(&self, key: &str) -> Result<Option<String>, DatabaseError>;
}

#[async_trait]
impl Store for Database {
    async fn list_feeds(&self) -> Result<Vec<Feed>, DatabaseError> {
        Database::list_feeds(self).await
    }

    async fn get_entry_watermark(&self, feed_id: i64) -> Result<Option<i64>, DatabaseError> {
        Database::get_entry_watermark(self, feed_id).await
    }

    async fn get_entry_dates(
        &self,
        urls: &[String],
    ) -> Result<HashMap<String, i64>, DatabaseError> {
        Database::get_entry_dates(self, urls).await
    }

    async fn upsert_entries(
        &self,
        feed_id: i64,
        entries: &[NewEntry],
    ) -> Result<u64, DatabaseError> {
        Database::upsert_entries(self, feed_id, entries).await
    }

    async fn trim_entries(&self, feed_id: i64, keep: i64) -> Result<u64, DatabaseError> {
        Database::trim_entries(self, feed_id, keep).await
    }

    async fn update_feed_meta(&self, meta: &FeedMeta) -> Result<(), DatabaseError> {
        Database::update_feed_meta(self, meta).await
    }

    async fn commit_feed_update(
        &self,
        meta: &FeedMeta,
        entries: &[NewEntry],
        keep: i64,
    ) -> Result<CommitReport, DatabaseError> {
        Database::commit_feed_update(self, meta, entries, keep).await
    }

    async fn get_active_filter_groups(&self) -> Result<Vec<FilterGroup>, DatabaseError> {
        Database::get_active_filter_groups(self).await
    }

    async fn get_setting(&self, key: &str) -> Result<Option<String>, DatabaseError> {
        Database::get_setting(self, key).await
    }
}
