use parking_lot::RwLock;
use std::collections::HashMap;
use std::time::{Duration, Instant};

use crate::storage::Validators;

/// Default freshness window for cached validators.
pub const DEFAULT_VALIDATOR_TTL: Duration = Duration::from_secs(60 * 60);

#[derive(Debug, Clone)]
struct CachedValidators {
    validators: Validators,
    checked_at: Instant,
}

/// In-process cache of the last committed HTTP validators per feed.
///
/// A fresh entry takes precedence over the validators persisted on the feed
/// row; a stale or missing one falls back to them.
#[derive(Debug)]
pub struct ValidatorCache {
    ttl: Duration,
    entries: RwLock<HashMap<i64, CachedValidators>>,
}

impl ValidatorCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Validators for `feed_id` if cached within the TTL.
    pub fn get_fresh(&self, feed_id: i64) -> Option<Validators> {
        self.entries
            .read()
            .get(&feed_id)
            .filter(|c| c.checked_at.elapsed() < self.ttl)
            .map(|c| c.validators.clone())
    }

    /// Record validators and reset the entry's freshness timestamp.
    ///
    /// Empty validators remove the entry so the persisted ones are used.
    pub fn store(&self, feed_id: i64, validators: &Validators) {
        let mut entries = self.entries.write();
        if validators.is_empty() {
            entries.remove(&feed_id);
            return;
        }
        entries.insert(
            feed_id,
            CachedValidators {
                validators: validators.clone(),
                checked_at: Instant::now(),
            },
        );
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for ValidatorCache {
    fn default() -> Self {
        Self::new(DEFAULT_VALIDATOR_TTL)
    }
}
