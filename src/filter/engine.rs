use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::Instant;

use super::matcher::PatternMatcher;
use super::FilterError;
use crate::storage::{
    FilterAction, FilterGroup, FilterGroupRule, NewEntry, RuleOperator, Store, TargetType,
};

/// How long loaded filter groups are served before storage is re-queried.
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(5 * 60);

/// Outcome of running an entry through the active filter groups.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterDecision {
    Keep,
    Discard,
}

struct CachedGroups {
    groups: Arc<Vec<FilterGroup>>,
    loaded_at: Instant,
}

/// What a rule can look at: the entry plus its feed's category and tags.
struct Subject<'a> {
    entry: &'a NewEntry,
    category: &'a str,
    tags: &'a [String],
}

/// Decides per entry whether it is kept or discarded.
///
/// # Semantics
///
/// - Only groups whose `apply_to_category` is empty or equals the feed's
///   category are relevant.
/// - If any relevant group has `action = keep` the engine is in whitelist
///   mode: only keep groups are evaluated and the entry is kept iff one of
///   them matches. Discard groups are ignored.
/// - Otherwise (blacklist mode) the entry is discarded iff a discard group
///   matches. No relevant groups at all means keep.
/// - A group's rules fold left to right: rule 0 seeds the result, every
///   later rule combines with its own operator. The chain exits as soon as
///   an AND leaves the result false or an OR leaves it true; later rules
///   are never consulted.
///
/// A rule that fails to evaluate (e.g. a broken regex) aborts only its
/// group. In whitelist mode an entry that matched no keep group is kept if
/// any keep group failed, so a broken filter never silently drops content.
///
/// Loaded groups are cached for the TTL. Call [`invalidate_cache`] after
/// any filter, group or rule mutation.
///
/// [`invalidate_cache`]: FilterEngine::invalidate_cache
pub struct FilterEngine {
    store: Arc<dyn Store>,
    matcher: PatternMatcher,
    ttl: Duration,
    cache: RwLock<Option<CachedGroups>>,
}

impl FilterEngine {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self::with_ttl(store, DEFAULT_CACHE_TTL)
    }

    pub fn with_ttl(store: Arc<dyn Store>, ttl: Duration) -> Self {
        Self {
            store,
            matcher: PatternMatcher::new(),
            ttl,
            cache: RwLock::new(None),
        }
    }

    /// Decide whether `entry` from a feed with `feed_category` and
    /// `feed_tags` is kept.
    ///
    /// # Errors
    ///
    /// [`FilterError::Load`] if the filter configuration could not be read.
    /// Callers should keep the entry in that case.
    pub async fn filter_entry(
        &self,
        entry: &NewEntry,
        feed_category: &str,
        feed_tags: &[String],
    ) -> Result<FilterDecision, FilterError> {
        let groups = self.active_groups().await?;
        let subject = Subject {
            entry,
            category: feed_category,
            tags: feed_tags,
        };

        let relevant: Vec<&FilterGroup> = groups
            .iter()
            .filter(|g| g.applies_to(feed_category))
            .collect();
        if relevant.is_empty() {
            return Ok(FilterDecision::Keep);
        }

        if relevant.iter().any(|g| g.action == FilterAction::Keep) {
            return Ok(self.whitelist(&relevant, &subject));
        }
        Ok(self.blacklist(&relevant, &subject))
    }

    fn whitelist(&self, relevant: &[&FilterGroup], subject: &Subject<'_>) -> FilterDecision {
        let mut failed = false;
        for group in relevant.iter().filter(|g| g.action == FilterAction::Keep) {
            match self.evaluate_group(group, subject) {
                Ok(true) => {
                    tracing::debug!(group = %group.name, url = %subject.entry.url, "Kept by filter group");
                    return FilterDecision::Keep;
                }
                Ok(false) => {}
                Err(e) => {
                    tracing::warn!(group = %group.name, error = %e, "Filter group evaluation failed");
                    failed = true;
                }
            }
        }

        if failed {
            tracing::warn!(url = %subject.entry.url, "Keeping entry because a keep group could not be evaluated");
            return FilterDecision::Keep;
        }
        tracing::debug!(url = %subject.entry.url, "No keep group matched");
        FilterDecision::Discard
    }

    fn blacklist(&self, relevant: &[&FilterGroup], subject: &Subject<'_>) -> FilterDecision {
        for group in relevant.iter().filter(|g| g.action == FilterAction::Discard) {
            match self.evaluate_group(group, subject) {
                Ok(true) => {
                    tracing::debug!(group = %group.name, url = %subject.entry.url, "Discarded by filter group");
                    return FilterDecision::Discard;
                }
                Ok(false) => {}
                Err(e) => {
                    tracing::warn!(group = %group.name, error = %e, "Filter group evaluation failed");
                }
            }
        }
        FilterDecision::Keep
    }

    fn evaluate_group(&self, group: &FilterGroup, subject: &Subject<'_>) -> Result<bool, FilterError> {
        let mut rules = group.rules.iter();
        let Some(first) = rules.next() else {
            return Ok(false);
        };

        let mut result = self.evaluate_rule(first, subject)?;
        for rule in rules {
            match rule.operator {
                RuleOperator::And => {
                    result = result && self.evaluate_rule(rule, subject)?;
                    if !result {
                        return Ok(false);
                    }
                }
                RuleOperator::Or => {
                    result = result || self.evaluate_rule(rule, subject)?;
                    if result {
                        return Ok(true);
                    }
                }
            }
        }
        Ok(result)
    }

    fn evaluate_rule(&self, rule: &FilterGroupRule, subject: &Subject<'_>) -> Result<bool, FilterError> {
        let Some(filter) = rule.filter.as_ref() else {
            return Ok(false);
        };

        match filter.target_type {
            TargetType::Title => self.matcher.matches(filter, &subject.entry.title),
            TargetType::Content => self
                .matcher
                .matches(filter, subject.entry.content.as_deref().unwrap_or("")),
            TargetType::FeedCategory => self.matcher.matches(filter, subject.category),
            TargetType::FeedTags => {
                for tag in subject.tags {
                    if self.matcher.matches(filter, tag)? {
                        return Ok(true);
                    }
                }
                Ok(false)
            }
        }
    }

    /// Active groups, refreshed from storage when the cache is empty or stale.
    async fn active_groups(&self) -> Result<Arc<Vec<FilterGroup>>, FilterError> {
        {
            let cache = self.cache.read().await;
            if let Some(groups) = self.fresh_groups(&cache) {
                return Ok(groups);
            }
        }

        let mut cache = self.cache.write().await;
        // Another caller may have refreshed while we waited for the lock
        if let Some(groups) = self.fresh_groups(&cache) {
            return Ok(groups);
        }

        let mut groups = self.store.get_active_filter_groups().await?;
        groups.sort_by(|a, b| b.priority.cmp(&a.priority).then(a.id.cmp(&b.id)));
        for group in &mut groups {
            group.rules.sort_by_key(|r| r.position);
        }
        tracing::debug!(groups = groups.len(), "Loaded active filter groups");

        let groups = Arc::new(groups);
        *cache = Some(CachedGroups {
            groups: Arc::clone(&groups),
            loaded_at: Instant::now(),
        });
        Ok(groups)
    }

    fn fresh_groups(&self, cache: &Option<CachedGroups>) -> Option<Arc<Vec<FilterGroup>>> {
        cache
            .as_ref()
            .filter(|c| c.loaded_at.elapsed() < self.ttl)
            .map(|c| Arc::clone(&c.groups))
    }

    /// Force the next [`filter_entry`](Self::filter_entry) call to reload
    /// groups from storage.
    pub async fn invalidate_cache(&self) {
        *self.cache.write().await = None;
        tracing::debug!("Filter group cache invalidated");
    }

    /// Invalidate loaded groups and drop all compiled patterns.
    pub async fn clear_cache(&self) {
        self.invalidate_cache().await;
        self.matcher.clear();
    }
}
