use parking_lot::RwLock;
use regex::Regex;
use std::collections::HashMap;
use std::sync::Arc;

use super::FilterError;
use crate::storage::{EntryFilter, PatternType};

/// Keyword and regex matching with a shared cache of compiled patterns.
///
/// Compiled regexes are keyed by `(pattern, case_sensitive)`. Lookups take a
/// read lock; a miss compiles under the write lock after re-checking, so
/// concurrent evaluators never compile the same pattern twice.
#[derive(Debug, Default)]
pub struct PatternMatcher {
    compiled: RwLock<HashMap<(String, bool), Arc<Regex>>>,
}

impl PatternMatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Test `target` against a filter's pattern.
    ///
    /// # Errors
    ///
    /// [`FilterError::InvalidRegex`] when a regex filter's pattern does not
    /// compile. The failure repeats on every call for that filter.
    pub fn matches(&self, filter: &EntryFilter, target: &str) -> Result<bool, FilterError> {
        match filter.pattern_type {
            PatternType::Keyword => Ok(keyword_matches(
                &filter.pattern,
                target,
                filter.case_sensitive,
            )),
            PatternType::Regex => {
                let regex = self.regex(&filter.pattern, filter.case_sensitive)?;
                Ok(regex.is_match(target))
            }
        }
    }

    fn regex(&self, pattern: &str, case_sensitive: bool) -> Result<Arc<Regex>, FilterError> {
        let key = (pattern.to_owned(), case_sensitive);
        if let Some(regex) = self.compiled.read().get(&key) {
            return Ok(Arc::clone(regex));
        }

        let mut compiled = self.compiled.write();
        if let Some(regex) = compiled.get(&key) {
            return Ok(Arc::clone(regex));
        }
        let regex = Arc::new(compile(pattern, case_sensitive)?);
        tracing::debug!(pattern = %pattern, case_sensitive, "Compiled filter regex");
        compiled.insert(key, Arc::clone(&regex));
        Ok(regex)
    }

    /// Number of compiled patterns currently cached.
    pub fn cached_patterns(&self) -> usize {
        self.compiled.read().len()
    }

    /// Drop every compiled pattern.
    pub fn clear(&self) {
        self.compiled.write().clear();
    }
}

/// Check that a regex pattern compiles, without touching any cache.
///
/// Intended for validating user input before a filter is stored.
pub fn validate_regex_pattern(pattern: &str, case_sensitive: bool) -> Result<(), FilterError> {
    compile(pattern, case_sensitive).map(|_| ())
}

fn compile(pattern: &str, case_sensitive: bool) -> Result<Regex, FilterError> {
    let source = if case_sensitive {
        Regex::new(pattern)
    } else {
        Regex::new(&format!("(?i){pattern}"))
    };
    source.map_err(|source| FilterError::InvalidRegex {
        pattern: pattern.to_owned(),
        source,
    })
}

fn keyword_matches(pattern: &str, target: &str, case_sensitive: bool) -> bool {
    if case_sensitive {
        target.contains(pattern)
    } else {
        target.to_lowercase().contains(&pattern.to_lowercase())
    }
}
