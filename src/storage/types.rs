use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use thiserror::Error;

// ============================================================================
// Error Types
// ============================================================================

/// Database-specific errors with user-friendly messages
#[derive(Debug, Error)]
pub enum DatabaseError {
    /// Another process holds the database lock
    #[error("Database is locked by another process. Please close it and try again.")]
    InstanceLocked,

    /// Migration failed
    #[error("Database migration failed: {0}")]
    Migration(String),

    /// A referenced row does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// Input rejected before it reached the database
    #[error("Invalid input: {0}")]
    Invalid(String),

    /// Storage backend failure outside of sqlx (used by alternative stores)
    #[error("Storage backend error: {0}")]
    Backend(String),

    /// Generic database error
    #[error("Database error: {0}")]
    Other(#[from] sqlx::Error),
}

impl DatabaseError {
    /// Check if a sqlx error indicates database locking
    pub(crate) fn from_sqlx(err: sqlx::Error) -> Self {
        let error_string = err.to_string().to_lowercase();

        // SQLITE_BUSY (5), SQLITE_LOCKED (6), SQLITE_CANTOPEN (14)
        if error_string.contains("database is locked")
            || error_string.contains("database table is locked")
            || error_string.contains("sqlite_busy")
            || error_string.contains("sqlite_locked")
            || error_string.contains("unable to open database file")
        {
            return DatabaseError::InstanceLocked;
        }

        DatabaseError::Other(err)
    }
}

/// Raised when a stored enum column holds a value this build does not know.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("Unknown {kind}: {value}")]
pub struct UnknownVariant {
    pub kind: &'static str,
    pub value: String,
}

// ============================================================================
// Feed
// ============================================================================

/// Lifecycle status of a subscribed feed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FeedStatus {
    Active,
    Error,
    Disabled,
}

impl FeedStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            FeedStatus::Active => "active",
            FeedStatus::Error => "error",
            FeedStatus::Disabled => "disabled",
        }
    }
}

impl FromStr for FeedStatus {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(FeedStatus::Active),
            "error" => Ok(FeedStatus::Error),
            "disabled" => Ok(FeedStatus::Disabled),
            other => Err(UnknownVariant {
                kind: "feed status",
                value: other.to_string(),
            }),
        }
    }
}

impl fmt::Display for FeedStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// HTTP cache validators for conditional GET.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Validators {
    pub etag: Option<String>,
    pub last_modified: Option<String>,
}

impl Validators {
    pub fn is_empty(&self) -> bool {
        self.etag.is_none() && self.last_modified.is_none()
    }
}

/// Feed data from database
///
/// `title` uses `Arc<str>` so fetch tasks can log it without copying.
#[derive(Debug, Clone)]
pub struct Feed {
    pub id: i64,
    pub url: String,
    pub title: Arc<str>,
    pub title_manually_edited: bool,
    pub site_url: Option<String>,
    pub status: FeedStatus,
    pub error_count: i64,
    pub last_error: Option<String>,
    pub last_fetched: Option<i64>,
    pub validators: Validators,
    pub category: Option<String>,
    pub tags: Vec<String>,
}

impl Feed {
    /// Category string used for filter-group relevance; empty when unset.
    pub fn category_str(&self) -> &str {
        self.category.as_deref().unwrap_or("")
    }
}

/// Row type for feed queries
#[derive(Debug, sqlx::FromRow)]
pub(crate) struct FeedRow {
    pub id: i64,
    pub url: String,
    pub title: String,
    pub title_manually_edited: bool,
    pub site_url: Option<String>,
    pub status: String,
    pub error_count: i64,
    pub last_error: Option<String>,
    pub last_fetched: Option<i64>,
    pub etag: Option<String>,
    pub last_modified: Option<String>,
    pub category: Option<String>,
    pub tags: String,
}

impl FeedRow {
    pub(crate) fn into_feed(self) -> Feed {
        let status = self.status.parse().unwrap_or_else(|e: UnknownVariant| {
            tracing::warn!(feed_id = self.id, error = %e, "Treating feed as active");
            FeedStatus::Active
        });
        let tags = serde_json::from_str::<Vec<String>>(&self.tags).unwrap_or_else(|e| {
            tracing::warn!(feed_id = self.id, error = %e, "Malformed tags column, ignoring");
            Vec::new()
        });

        Feed {
            id: self.id,
            url: self.url,
            title: Arc::from(self.title),
            title_manually_edited: self.title_manually_edited,
            site_url: self.site_url,
            status,
            error_count: self.error_count,
            last_error: self.last_error,
            last_fetched: self.last_fetched,
            validators: Validators {
                etag: self.etag,
                last_modified: self.last_modified,
            },
            category: self.category,
            tags,
        }
    }
}

/// Metadata written back to a feed at the end of a fetch cycle.
///
/// `None` fields leave the stored value untouched.
#[derive(Debug, Clone)]
pub struct FeedMeta {
    pub feed_id: i64,
    pub title: Option<String>,
    pub site_url: Option<String>,
    pub validators: Option<Validators>,
    pub status: FeedStatus,
    pub error: Option<String>,
}

// ============================================================================
// Entry
// ============================================================================

/// An entry that survived filtering and is ready to be written.
#[derive(Debug, Clone, PartialEq)]
pub struct NewEntry {
    pub title: String,
    pub url: String,
    pub content: Option<String>,
    pub guid: String,
    pub published_at: i64,
    pub favicon_url: Option<String>,
}

/// Entry data from database
#[derive(Debug, Clone, PartialEq, sqlx::FromRow)]
pub struct Entry {
    pub id: i64,
    pub feed_id: i64,
    pub title: String,
    pub url: String,
    pub content: Option<String>,
    pub guid: String,
    pub published_at: i64,
    pub favicon_url: Option<String>,
}

/// Row counts from a committed feed update.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CommitReport {
    /// Rows inserted or updated (newer-wins) by the upsert
    pub written: u64,
    /// Rows removed by retention trimming
    pub trimmed: u64,
}

// ============================================================================
// Filters
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PatternType {
    Keyword,
    Regex,
}

impl PatternType {
    pub fn as_str(&self) -> &'static str {
        match self {
            PatternType::Keyword => "keyword",
            PatternType::Regex => "regex",
        }
    }
}

impl FromStr for PatternType {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "keyword" => Ok(PatternType::Keyword),
            "regex" => Ok(PatternType::Regex),
            other => Err(UnknownVariant {
                kind: "pattern type",
                value: other.to_string(),
            }),
        }
    }
}

/// Which part of an entry (or its feed) a filter inspects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TargetType {
    Title,
    Content,
    FeedCategory,
    FeedTags,
}

impl TargetType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TargetType::Title => "title",
            TargetType::Content => "content",
            TargetType::FeedCategory => "feed_category",
            TargetType::FeedTags => "feed_tags",
        }
    }
}

impl FromStr for TargetType {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "title" => Ok(TargetType::Title),
            "content" => Ok(TargetType::Content),
            "feed_category" => Ok(TargetType::FeedCategory),
            "feed_tags" => Ok(TargetType::FeedTags),
            other => Err(UnknownVariant {
                kind: "target type",
                value: other.to_string(),
            }),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterAction {
    Keep,
    Discard,
}

impl FilterAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            FilterAction::Keep => "keep",
            FilterAction::Discard => "discard",
        }
    }
}

impl FromStr for FilterAction {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "keep" => Ok(FilterAction::Keep),
            "discard" => Ok(FilterAction::Discard),
            other => Err(UnknownVariant {
                kind: "filter action",
                value: other.to_string(),
            }),
        }
    }
}

/// How a rule combines with the accumulated result of the rules before it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleOperator {
    And,
    Or,
}

impl RuleOperator {
    pub fn as_str(&self) -> &'static str {
        match self {
            RuleOperator::And => "AND",
            RuleOperator::Or => "OR",
        }
    }

    /// Parse a stored operator. Anything other than `OR` combines as `AND`.
    pub fn from_db(s: &str) -> Self {
        if s.eq_ignore_ascii_case("OR") {
            RuleOperator::Or
        } else {
            if !s.eq_ignore_ascii_case("AND") {
                tracing::warn!(operator = %s, "Unknown rule operator, using AND");
            }
            RuleOperator::And
        }
    }
}

/// A single keyword or regex predicate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryFilter {
    pub id: i64,
    pub name: String,
    pub pattern: String,
    pub pattern_type: PatternType,
    pub target_type: TargetType,
    pub case_sensitive: bool,
}

/// Input for creating an [`EntryFilter`].
#[derive(Debug, Clone)]
pub struct NewEntryFilter {
    pub name: String,
    pub pattern: String,
    pub pattern_type: PatternType,
    pub target_type: TargetType,
    pub case_sensitive: bool,
}

/// One link in a group's rule chain.
///
/// `filter` is `None` when the referenced filter no longer resolves.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilterGroupRule {
    pub filter_id: i64,
    pub operator: RuleOperator,
    pub position: i64,
    pub filter: Option<EntryFilter>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilterGroup {
    pub id: i64,
    pub name: String,
    pub action: FilterAction,
    pub is_active: bool,
    pub priority: i64,
    /// Empty applies to every feed
    pub apply_to_category: String,
    /// Sorted by `position`
    pub rules: Vec<FilterGroupRule>,
}

impl FilterGroup {
    /// Whether this group applies to entries from a feed in `category`.
    pub fn applies_to(&self, category: &str) -> bool {
        self.apply_to_category.is_empty() || self.apply_to_category == category
    }
}

/// Input for creating a [`FilterGroup`].
#[derive(Debug, Clone)]
pub struct NewFilterGroup {
    pub name: String,
    pub action: FilterAction,
    pub is_active: bool,
    pub priority: i64,
    pub apply_to_category: String,
}
