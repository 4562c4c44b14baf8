//! SQLite-backed storage for feeds, entries, filter configuration and settings.
//!
//! The update pipeline only talks to storage through the [`Store`] trait;
//! [`Database`] implements it on top of an `sqlx` connection pool.

mod entries;
mod feeds;
mod filters;
mod schema;
mod settings;
mod store;
mod types;

pub use schema::Database;
pub use settings::{SETTING_FEED_CONCURRENCY, SETTING_MAX_POSTS, SETTING_UPDATE_INTERVAL};
pub use store::Store;
pub use types::{
    CommitReport, DatabaseError, Entry, EntryFilter, Feed, FeedMeta, FeedStatus, FilterAction,
    FilterGroup, FilterGroupRule, NewEntry, NewEntryFilter, NewFilterGroup, PatternType,
    RuleOperator, TargetType, UnknownVariant, Validators,
};
