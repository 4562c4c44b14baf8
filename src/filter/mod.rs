//! Rule-based entry filtering.
//!
//! - [`matcher`] - keyword/regex predicates with a compiled-pattern cache
//! - [`engine`] - whitelist/blacklist evaluation of filter groups, backed by
//!   a TTL cache of the active configuration

mod engine;
mod matcher;

pub use engine::{FilterDecision, FilterEngine, DEFAULT_CACHE_TTL};
pub use matcher::{validate_regex_pattern, PatternMatcher};

use crate::storage::DatabaseError;
use thiserror::Error;

/// Errors raised while evaluating filters.
#[derive(Debug, Error)]
pub enum FilterError {
    /// A regex filter's pattern does not compile
    #[error("Invalid regex pattern {pattern:?}: {source}")]
    InvalidRegex {
        pattern: String,
        #[source]
        source: regex::Error,
    },
    /// Active filter groups could not be loaded from storage
    #[error("Failed to load filter configuration: {0}")]
    Load(#[from] DatabaseError),
}
