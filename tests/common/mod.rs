//! Shared test doubles for the integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use feedsieve::storage::{
    CommitReport, DatabaseError, EntryFilter, Feed, FeedMeta, FeedStatus, FilterAction,
    FilterGroup, FilterGroupRule, NewEntry, PatternType, RuleOperator, Store, TargetType,
    Validators,
};

/// In-memory [`Store`] that records writes and counts filter-config loads.
#[derive(Default)]
pub struct MemoryStore {
    pub feeds: Mutex<Vec<Feed>>,
    pub groups: Mutex<Vec<FilterGroup>>,
    pub settings: Mutex<HashMap<String, String>>,
    pub entries: Mutex<HashMap<i64, Vec<NewEntry>>>,
    pub meta_updates: Mutex<Vec<FeedMeta>>,
    pub group_loads: AtomicUsize,
    /// Delay inside `get_active_filter_groups`, widening race windows
    pub load_delay: Duration,
    pub fail_group_load: AtomicBool,
    pub fail_commit: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_load_delay(delay: Duration) -> Self {
        Self {
            load_delay: delay,
            ..Self::default()
        }
    }

    pub fn add_feed(&self, id: i64, url: &str) -> Feed {
        let feed = feed(id, url);
        self.feeds.lock().push(feed.clone());
        feed
    }

    pub fn set_setting(&self, key: &str, value: &str) {
        self.settings.lock().insert(key.to_string(), value.to_string());
    }

    pub fn group_loads(&self) -> usize {
        self.group_loads.load(Ordering::SeqCst)
    }

    pub fn entries_for(&self, feed_id: i64) -> Vec<NewEntry> {
        self.entries.lock().get(&feed_id).cloned().unwrap_or_default()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn list_feeds(&self) -> Result<Vec<Feed>, DatabaseError> {
        Ok(self.feeds.lock().clone())
    }

    async fn get_entry_watermark(&self, feed_id: i64) -> Result<Option<i64>, DatabaseError> {
        Ok(self
            .entries
            .lock()
            .get(&feed_id)
            .and_then(|e| e.iter().map(|e| e.published_at).max()))
    }

    async fn get_entry_dates(
        &self,
        urls: &[String],
    ) -> Result<HashMap<String, i64>, DatabaseError> {
        let all = self.entries.lock();
        Ok(all
            .values()
            .flatten()
            .filter(|e| urls.contains(&e.url))
            .map(|e| (e.url.clone(), e.published_at))
            .collect())
    }

    async fn upsert_entries(
        &self,
        feed_id: i64,
        entries: &[NewEntry],
    ) -> Result<u64, DatabaseError> {
        let mut all = self.entries.lock();
        let stored = all.entry(feed_id).or_default();
        let mut written = 0;
        for entry in entries {
            match stored.iter_mut().find(|e| e.url == entry.url) {
                Some(existing) if entry.published_at > existing.published_at => {
                    *existing = entry.clone();
                    written += 1;
                }
                Some(_) => {}
                None => {
                    stored.push(entry.clone());
                    written += 1;
                }
            }
        }
        Ok(written)
    }

    async fn trim_entries(&self, feed_id: i64, keep: i64) -> Result<u64, DatabaseError> {
        let mut all = self.entries.lock();
        let stored = all.entry(feed_id).or_default();
        stored.sort_by(|a, b| b.published_at.cmp(&a.published_at));
        let keep = usize::try_from(keep).unwrap_or(0);
        let trimmed = stored.len().saturating_sub(keep);
        stored.truncate(keep);
        Ok(trimmed as u64)
    }

    async fn update_feed_meta(&self, meta: &FeedMeta) -> Result<(), DatabaseError> {
        self.meta_updates.lock().push(meta.clone());
        Ok(())
    }

    async fn commit_feed_update(
        &self,
        meta: &FeedMeta,
        entries: &[NewEntry],
        keep: i64,
    ) -> Result<CommitReport, DatabaseError> {
        if self.fail_commit.load(Ordering::SeqCst) {
            return Err(DatabaseError::Backend("disk I/O error".into()));
        }
        self.update_feed_meta(meta).await?;
        let written = self.upsert_entries(meta.feed_id, entries).await?;
        let trimmed = self.trim_entries(meta.feed_id, keep).await?;
        Ok(CommitReport { written, trimmed })
    }

    async fn get_active_filter_groups(&self) -> Result<Vec<FilterGroup>, DatabaseError> {
        self.group_loads.fetch_add(1, Ordering::SeqCst);
        if !self.load_delay.is_zero() {
            tokio::time::sleep(self.load_delay).await;
        }
        if self.fail_group_load.load(Ordering::SeqCst) {
            return Err(DatabaseError::Backend("database is locked".into()));
        }
        Ok(self
            .groups
            .lock()
            .iter()
            .filter(|g| g.is_active)
            .cloned()
            .collect())
    }

    async fn get_setting(&self, key: &str) -> Result<Option<String>, DatabaseError> {
        Ok(self.settings.lock().get(key).cloned())
    }
}

pub fn feed(id: i64, url: &str) -> Feed {
    Feed {
        id,
        url: url.to_string(),
        title: Arc::from(format!("Feed {id}")),
        title_manually_edited: false,
        site_url: None,
        status: FeedStatus::Active,
        error_count: 0,
        last_error: None,
        last_fetched: None,
        validators: Validators::default(),
        category: None,
        tags: Vec::new(),
    }
}

pub fn filter(id: i64, pattern: &str, pattern_type: PatternType, target: TargetType) -> EntryFilter {
    EntryFilter {
        id,
        name: format!("filter {id}"),
        pattern: pattern.to_string(),
        pattern_type,
        target_type: target,
        case_sensitive: false,
    }
}

/// A group whose rules are the given filters in order, all combined with `operator`.
pub fn group(id: i64, action: FilterAction, operator: RuleOperator, filters: Vec<EntryFilter>) -> FilterGroup {
    FilterGroup {
        id,
        name: format!("group {id}"),
        action,
        is_active: true,
        priority: 0,
        apply_to_category: String::new(),
        rules: filters
            .into_iter()
            .enumerate()
            .map(|(position, filter)| FilterGroupRule {
                filter_id: filter.id,
                operator,
                position: position as i64,
                filter: Some(filter),
            })
            .collect(),
    }
}

pub fn entry(n: i64, title: &str) -> NewEntry {
    NewEntry {
        title: title.to_string(),
        url: format!("https://example.com/posts/{n}"),
        content: None,
        guid: format!("post-{n}"),
        published_at: 1_700_000_000 + n,
        favicon_url: None,
    }
}
