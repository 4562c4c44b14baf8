//! The feed update pipeline.
//!
//! - **Fetching**: conditional GET with SSRF guarding, a body cap and an
//!   in-process validator cache
//! - **Parsing**: RSS/Atom/JSON Feed into normalized items via `feed-rs`
//! - **Persistence**: filtering, then a single-transaction upsert and trim
//! - **Scheduling**: bounded concurrent fan-out over every feed
//!
//! # Architecture
//!
//! - [`fetcher`] - [`FeedFetcher`], the production [`FeedSource`]
//! - [`parser`] - the [`FeedParser`] seam and its `feed-rs` implementation
//! - [`persist`] - [`Persister`], the per-feed save step
//! - [`scheduler`] - [`Scheduler::update_feeds`], one full cycle
//!
//! # Example
//!
//! ```ignore
//! let store: Arc<dyn Store> = Arc::new(Database::open("feeds.db").await?);
//! let engine = Arc::new(FilterEngine::new(store.clone()));
//! let fetcher = Arc::new(FeedFetcher::new(store.clone(), FetcherOptions::default())?);
//! let persister = Arc::new(Persister::new(store.clone(), engine, DEFAULT_MAX_POSTS));
//!
//! let scheduler = Scheduler::new(store, fetcher, persister);
//! let summary = scheduler.update_feeds(&CancellationToken::new()).await?;
//! ```

mod error;
mod favicon;
mod fetcher;
mod parser;
mod persist;
mod scheduler;
mod settings;
mod validators;

pub use error::{ErrorKind, FetchError, ParseError, UpdateError};
pub use favicon::{FaviconResolver, OriginFavicon};
pub use fetcher::{
    FeedFetcher, FeedSource, FetchOutcome, FetcherOptions, DEFAULT_REQUEST_TIMEOUT,
    DEFAULT_USER_AGENT, MAX_FEED_SIZE, MAX_REDIRECTS,
};
pub use parser::{FeedParser, FeedRsParser, ParsedFeed, ParsedItem};
pub use persist::{Persister, SaveReport, DEFAULT_MAX_POSTS};
pub use scheduler::{default_concurrency, resolve_concurrency, Scheduler, UpdateSummary};
pub use settings::positive_setting;
pub use validators::{ValidatorCache, DEFAULT_VALIDATOR_TTL};
