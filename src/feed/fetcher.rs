use async_trait::async_trait;
use futures::StreamExt;
use reqwest::header::{HeaderMap, HeaderName, ETAG, IF_MODIFIED_SINCE, IF_NONE_MATCH, LAST_MODIFIED};
use reqwest::redirect::Policy;
use reqwest::StatusCode;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use url::Url;

use super::error::{FetchError, UpdateError};
use super::favicon::{FaviconResolver, OriginFavicon};
use super::parser::{FeedParser, FeedRsParser, ParsedItem};
use super::validators::{ValidatorCache, DEFAULT_VALIDATOR_TTL};
use crate::storage::{Feed, NewEntry, Store, Validators};
use crate::util::{guard_destination, validate_url, GuardedResolver};

/// Response bodies above this size are rejected before parsing.
pub const MAX_FEED_SIZE: usize = 5 * 1024 * 1024; // 5MB
pub const MAX_REDIRECTS: usize = 5;
pub const DEFAULT_USER_AGENT: &str = concat!("feedsieve/", env!("CARGO_PKG_VERSION"));
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Result of one conditional fetch.
#[derive(Debug, Clone)]
pub struct FetchOutcome {
    /// The feed as it was listed at the start of the cycle
    pub feed: Feed,
    /// Feed title from the document; `None` on 304
    pub title: Option<String>,
    pub site_url: Option<String>,
    /// Items strictly newer than the stored watermark, newest first
    pub items: Vec<NewEntry>,
    /// Validators to persist and cache once the outcome is saved
    pub validators: Validators,
    pub not_modified: bool,
    /// Items dropped for lacking a usable URL
    pub skipped_items: usize,
}

/// Produces fetch outcomes for the scheduler.
#[async_trait]
pub trait FeedSource: Send + Sync {
    async fn fetch(&self, feed: &Feed) -> Result<FetchOutcome, UpdateError>;

    /// Called after an outcome was committed to storage.
    fn on_saved(&self, _feed_id: i64, _validators: &Validators) {}
}

#[derive(Debug, Clone)]
pub struct FetcherOptions {
    pub timeout: Duration,
    pub user_agent: String,
    pub validator_ttl: Duration,
}

impl Default for FetcherOptions {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_REQUEST_TIMEOUT,
            user_agent: DEFAULT_USER_AGENT.to_string(),
            validator_ttl: DEFAULT_VALIDATOR_TTL,
        }
    }
}

/// Conditional-GET feed client.
///
/// Every request is validated and its destination resolved and checked
/// against the blocked address ranges before dispatch. Redirect hops are
/// limited to [`MAX_REDIRECTS`] and each hop's literal host is re-checked.
/// Hostnames are resolved through [`GuardedResolver`] at connect time, so
/// a hop to an internal name fails the same way.
/// Validators come from the in-process cache when fresh, else from the
/// feed row.
pub struct FeedFetcher {
    client: reqwest::Client,
    store: Arc<dyn Store>,
    parser: Arc<dyn FeedParser>,
    favicons: Arc<dyn FaviconResolver>,
    validators: ValidatorCache,
    timeout: Duration,
}

impl FeedFetcher {
    pub fn new(store: Arc<dyn Store>, options: FetcherOptions) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .user_agent(options.user_agent)
            .redirect(redirect_policy())
            .dns_resolver(GuardedResolver)
            .timeout(options.timeout)
            .pool_max_idle_per_host(4)
            .build()?;

        Ok(Self {
            client,
            store,
            parser: Arc::new(FeedRsParser),
            favicons: Arc::new(OriginFavicon),
            validators: ValidatorCache::new(options.validator_ttl),
            timeout: options.timeout,
        })
    }

    pub fn with_parser(mut self, parser: Arc<dyn FeedParser>) -> Self {
        self.parser = parser;
        self
    }

    pub fn with_favicon_resolver(mut self, favicons: Arc<dyn FaviconResolver>) -> Self {
        self.favicons = favicons;
        self
    }

    pub fn validator_cache(&self) -> &ValidatorCache {
        &self.validators
    }

    async fn fetch_feed(&self, feed: &Feed) -> Result<FetchOutcome, UpdateError> {
        let url = validate_url(&feed.url)?;
        guard_destination(&url).await?;

        let sent = self
            .validators
            .get_fresh(feed.id)
            .unwrap_or_else(|| feed.validators.clone());

        let response = tokio::time::timeout(self.timeout, self.send(url, &sent))
            .await
            .map_err(|_| FetchError::Timeout)??;

        let status = response.status();
        if status == StatusCode::NOT_MODIFIED {
            let received = response_validators(response.headers());
            tracing::debug!(feed_id = feed.id, "Feed not modified");
            return Ok(FetchOutcome {
                feed: feed.clone(),
                title: None,
                site_url: None,
                items: Vec::new(),
                validators: Validators {
                    etag: received.etag.or(sent.etag),
                    last_modified: received.last_modified.or(sent.last_modified),
                },
                not_modified: true,
                skipped_items: 0,
            });
        }

        // 429 included: no backoff, the feed is retried next cycle
        if !status.is_success() {
            return Err(FetchError::HttpStatus(status.as_u16()).into());
        }

        let validators = response_validators(response.headers());
        let bytes = tokio::time::timeout(self.timeout, read_limited_bytes(response, MAX_FEED_SIZE))
            .await
            .map_err(|_| FetchError::Timeout)??;
        let parsed = self.parser.parse(&bytes)?;

        let watermark = self.store.get_entry_watermark(feed.id).await?;
        let fetched_at = chrono::Utc::now().timestamp();

        let mut skipped_items = 0;
        let mut undated = Vec::new();
        let mut candidates = Vec::with_capacity(parsed.items.len());
        for item in parsed.items {
            let dated = item.published_at.is_some();
            let Some(entry) = to_entry(item, fetched_at) else {
                skipped_items += 1;
                continue;
            };
            if !dated {
                undated.push(entry.url.clone());
            }
            candidates.push((entry, dated));
        }

        // An undated item already stored keeps its first-seen date
        let known = if undated.is_empty() {
            HashMap::new()
        } else {
            self.store.get_entry_dates(&undated).await?
        };

        let mut items: Vec<NewEntry> = Vec::with_capacity(candidates.len());
        for (mut entry, dated) in candidates {
            if !dated {
                if let Some(&published_at) = known.get(&entry.url) {
                    entry.published_at = published_at;
                }
            }
            if watermark.is_some_and(|w| entry.published_at <= w) {
                continue;
            }
            items.push(entry);
        }

        if skipped_items > 0 {
            tracing::warn!(
                feed_id = feed.id,
                skipped = skipped_items,
                "Items without a usable URL skipped"
            );
        }

        let site_url = parsed.link.or_else(|| feed.site_url.clone());
        if !items.is_empty() {
            let favicon = self.resolve_favicon(feed, site_url.as_deref()).await;
            for item in &mut items {
                item.favicon_url = favicon.clone();
            }
        }

        items.sort_by(|a, b| b.published_at.cmp(&a.published_at));

        Ok(FetchOutcome {
            feed: feed.clone(),
            title: parsed.title,
            site_url,
            items,
            validators,
            not_modified: false,
            skipped_items,
        })
    }

    async fn send(&self, url: Url, sent: &Validators) -> Result<reqwest::Response, FetchError> {
        let mut request = self.client.get(url);
        if let Some(etag) = &sent.etag {
            request = request.header(IF_NONE_MATCH, etag);
        }
        if let Some(last_modified) = &sent.last_modified {
            request = request.header(IF_MODIFIED_SINCE, last_modified);
        }

        request.send().await.map_err(|e| {
            if e.is_timeout() {
                FetchError::Timeout
            } else {
                FetchError::Network(e)
            }
        })
    }

    async fn resolve_favicon(&self, feed: &Feed, site_url: Option<&str>) -> Option<String> {
        let site = site_url.unwrap_or(&feed.url);
        match self.favicons.resolve(site).await {
            Ok(favicon) => Some(favicon),
            Err(e) => {
                tracing::warn!(feed_id = feed.id, site = %site, error = %e, "Favicon resolution failed");
                None
            }
        }
    }
}

#[async_trait]
impl FeedSource for FeedFetcher {
    async fn fetch(&self, feed: &Feed) -> Result<FetchOutcome, UpdateError> {
        self.fetch_feed(feed).await
    }

    fn on_saved(&self, feed_id: i64, validators: &Validators) {
        self.validators.store(feed_id, validators);
    }
}

fn redirect_policy() -> Policy {
    Policy::custom(|attempt| {
        if attempt.previous().len() >= MAX_REDIRECTS {
            return attempt.error(format!("Too many redirects (max {MAX_REDIRECTS})"));
        }
        if let Err(e) = validate_url(attempt.url().as_str()) {
            return attempt.error(e);
        }
        attempt.follow()
    })
}

fn response_validators(headers: &HeaderMap) -> Validators {
    let value = |name: HeaderName| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(str::to_owned)
    };
    Validators {
        etag: value(ETAG),
        last_modified: value(LAST_MODIFIED),
    }
}

/// Item URL is its first link, else a guid that is itself an http(s) URL.
/// Undated items take `fetched_at`.
fn to_entry(item: ParsedItem, fetched_at: i64) -> Option<NewEntry> {
    let url = item
        .link
        .filter(|l| !l.trim().is_empty())
        .or_else(|| {
            Url::parse(&item.guid)
                .ok()
                .filter(|u| matches!(u.scheme(), "http" | "https"))
                .map(|_| item.guid.clone())
        })?;

    Some(NewEntry {
        title: item.title,
        url,
        content: item.content,
        guid: item.guid,
        published_at: item.published_at.unwrap_or(fetched_at),
        favicon_url: None,
    })
}

async fn read_limited_bytes(
    response: reqwest::Response,
    limit: usize,
) -> Result<Vec<u8>, FetchError> {
    let expected_length = response.content_length();

    if let Some(len) = expected_length {
        if len > limit as u64 {
            return Err(FetchError::ResponseTooLarge { limit });
        }
    }

    let mut bytes = Vec::new();
    let mut stream = response.bytes_stream();

    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(FetchError::Network)?;
        if bytes.len().saturating_add(chunk.len()) > limit {
            return Err(FetchError::ResponseTooLarge { limit });
        }
        bytes.extend_from_slice(&chunk);
    }

    if let Some(expected) = expected_length {
        if (bytes.len() as u64) < expected {
            return Err(FetchError::IncompleteResponse {
                expected,
                received: bytes.len(),
            });
        }
    }

    Ok(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feed::error::{ErrorKind, ParseError};
    use crate::feed::parser::ParsedFeed;
    use crate::storage::{Database, FeedMeta, FeedStatus};
    use anyhow::anyhow;
    use pretty_assertions::assert_eq;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const RSS: &str = r#"<?xml version="1.0"?>
<rss version="2.0"><channel>
    <title>Mock Feed</title>
    <link>https://blog.example.com/</link>
    <item>
        <guid>a</guid>
        <title>Old</title>
        <link>https://blog.example.com/old</link>
        <pubDate>Mon, 01 Jan 2024 00:00:00 +0000</pubDate>
    </item>
    <item>
        <guid>c</guid>
        <title>Newest</title>
        <link>https://blog.example.com/newest</link>
        <pubDate>Wed, 03 Jan 2024 00:00:00 +0000</pubDate>
    </item>
    <item>
        <guid>b</guid>
        <title>Middle</title>
        <link>https://blog.example.com/middle</link>
        <pubDate>Tue, 02 Jan 2024 00:00:00 +0000</pubDate>
    </item>
</channel></rss>"#;

    async fn setup(server: &MockServer) -> (Arc<Database>, Feed) {
        let db = Database::open(":memory:").await.unwrap();
        let url = format!("{}/feed", server.uri());
        let id = db.insert_feed(&url, "Test", None, &[]).await.unwrap();
        let feed = db.get_feed(id).await.unwrap().unwrap();
        (Arc::new(db), feed)
    }

    fn fetcher(db: &Arc<Database>) -> FeedFetcher {
        FeedFetcher::new(db.clone(), FetcherOptions::default()).unwrap()
    }

    async fn mount_rss(server: &MockServer) {
        Mock::given(method("GET"))
            .and(path("/feed"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string(RSS)
                    .insert_header("Content-Type", "application/rss+xml")
                    .insert_header("ETag", "\"v1\"")
                    .insert_header("Last-Modified", "Wed, 03 Jan 2024 00:00:00 GMT"),
            )
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn test_fetch_success() {
        let server = MockServer::start().await;
        mount_rss(&server).await;
        let (db, feed) = setup(&server).await;

        let outcome = fetcher(&db).fetch(&feed).await.unwrap();

        assert!(!outcome.not_modified);
        assert_eq!(outcome.title.as_deref(), Some("Mock Feed"));
        assert_eq!(outcome.site_url.as_deref(), Some("https://blog.example.com/"));
        let titles: Vec<&str> = outcome.items.iter().map(|i| i.title.as_str()).collect();
        assert_eq!(titles, vec!["Newest", "Middle", "Old"]);
        assert!(outcome
            .items
            .iter()
            .all(|i| i.favicon_url.as_deref() == Some("https://blog.example.com/favicon.ico")));
        assert_eq!(
            outcome.validators,
            Validators {
                etag: Some("\"v1\"".into()),
                last_modified: Some("Wed, 03 Jan 2024 00:00:00 GMT".into()),
            }
        );
    }

    #[tokio::test]
    async fn test_watermark_skips_seen_items() {
        let server = MockServer::start().await;
        mount_rss(&server).await;
        let (db, feed) = setup(&server).await;

        db.upsert_entries(
            feed.id,
            &[NewEntry {
                title: "Middle".into(),
                url: "https://blog.example.com/middle".into(),
                content: None,
                guid: "b".into(),
                published_at: 1_704_153_600,
                favicon_url: None,
            }],
        )
        .await
        .unwrap();

        let outcome = fetcher(&db).fetch(&feed).await.unwrap();
        let titles: Vec<&str> = outcome.items.iter().map(|i| i.title.as_str()).collect();
        assert_eq!(titles, vec!["Newest"]);
    }

    #[tokio::test]
    async fn test_not_modified_keeps_sent_validators() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(header("If-None-Match", "\"v1\""))
            .respond_with(ResponseTemplate::new(304))
            .mount(&server)
            .await;
        let (db, feed) = setup(&server).await;

        db.update_feed_meta(&FeedMeta {
            feed_id: feed.id,
            title: None,
            site_url: None,
            validators: Some(Validators {
                etag: Some("\"v1\"".into()),
                last_modified: None,
            }),
            status: FeedStatus::Active,
            error: None,
        })
        .await
        .unwrap();
        let feed = db.get_feed(feed.id).await.unwrap().unwrap();

        let outcome = fetcher(&db).fetch(&feed).await.unwrap();
        assert!(outcome.not_modified);
        assert!(outcome.items.is_empty());
        assert_eq!(outcome.validators.etag.as_deref(), Some("\"v1\""));
    }

    #[tokio::test]
    async fn test_fresh_cache_overrides_persisted_validators() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(header("If-None-Match", "\"cached\""))
            .respond_with(ResponseTemplate::new(304).insert_header("ETag", "\"cached\""))
            .mount(&server)
            .await;
        let (db, mut feed) = setup(&server).await;
        feed.validators.etag = Some("\"persisted\"".into());

        let fetcher = fetcher(&db);
        fetcher.on_saved(
            feed.id,
            &Validators {
                etag: Some("\"cached\"".into()),
                last_modified: None,
            },
        );

        assert_eq!(fetcher.validator_cache().len(), 1);

        let outcome = fetcher.fetch(&feed).await.unwrap();
        assert!(outcome.not_modified);
        assert_eq!(outcome.validators.etag.as_deref(), Some("\"cached\""));
    }

    #[tokio::test]
    async fn test_http_errors() {
        for status in [404u16, 429, 500] {
            let server = MockServer::start().await;
            Mock::given(method("GET"))
                .respond_with(ResponseTemplate::new(status))
                .expect(1)
                .mount(&server)
                .await;
            let (db, feed) = setup(&server).await;

            let err = fetcher(&db).fetch(&feed).await.unwrap_err();
            assert!(
                matches!(err, UpdateError::Fetch(FetchError::HttpStatus(s)) if s == status),
                "status {status}: {err}"
            );
        }
    }

    #[tokio::test]
    async fn test_malformed_body_is_parse_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>not a feed</html>"))
            .mount(&server)
            .await;
        let (db, feed) = setup(&server).await;

        let err = fetcher(&db).fetch(&feed).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Parse);
    }

    #[tokio::test]
    async fn test_oversize_body_rejected() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![b'x'; MAX_FEED_SIZE + 1]))
            .mount(&server)
            .await;
        let (db, feed) = setup(&server).await;

        let err = fetcher(&db).fetch(&feed).await.unwrap_err();
        assert!(matches!(
            err,
            UpdateError::Fetch(FetchError::ResponseTooLarge { .. })
        ));
    }

    #[tokio::test]
    async fn test_redirect_to_private_address_blocked() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(302).insert_header("Location", "http://10.0.0.1/feed"),
            )
            .mount(&server)
            .await;
        let (db, feed) = setup(&server).await;

        let err = fetcher(&db).fetch(&feed).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Fetch);
    }

    #[tokio::test]
    async fn test_redirect_to_internal_hostname_blocked() {
        let server = MockServer::start().await;
        let port = server.address().port();
        Mock::given(method("GET"))
            .and(path("/feed"))
            .respond_with(
                ResponseTemplate::new(302)
                    .insert_header("Location", format!("http://localhost:{port}/internal").as_str()),
            )
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/internal"))
            .respond_with(ResponseTemplate::new(200).set_body_string(RSS))
            .expect(0)
            .mount(&server)
            .await;
        let (db, feed) = setup(&server).await;

        let err = fetcher(&db).fetch(&feed).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Fetch);
    }

    #[tokio::test]
    async fn test_blocked_destination_fails_validation() {
        let db = Arc::new(Database::open(":memory:").await.unwrap());
        let id = db
            .insert_feed("http://10.0.0.1/feed", "Private", None, &[])
            .await
            .unwrap();
        let feed = db.get_feed(id).await.unwrap().unwrap();

        let err = fetcher(&db).fetch(&feed).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
    }

    #[tokio::test]
    async fn test_items_without_url_skipped() {
        let rss = r#"<?xml version="1.0"?>
<rss version="2.0"><channel>
    <item><guid>not-a-url</guid><title>Nowhere</title></item>
    <item><guid isPermaLink="true">https://example.com/p/1</guid><title>Guid link</title></item>
</channel></rss>"#;
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string(rss))
            .mount(&server)
            .await;
        let (db, feed) = setup(&server).await;

        let outcome = fetcher(&db).fetch(&feed).await.unwrap();
        assert_eq!(outcome.skipped_items, 1);
        assert_eq!(outcome.items.len(), 1);
        assert_eq!(outcome.items[0].url, "https://example.com/p/1");
    }

    #[tokio::test]
    async fn test_undated_items_not_refetched() {
        let rss = r#"<?xml version="1.0"?>
<rss version="2.0"><channel>
    <item><guid>u</guid><title>Undated</title><link>https://blog.example.com/undated</link></item>
</channel></rss>"#;
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string(rss))
            .mount(&server)
            .await;
        let (db, feed) = setup(&server).await;
        let fetcher = fetcher(&db);

        let first = fetcher.fetch(&feed).await.unwrap();
        assert_eq!(first.items.len(), 1);
        let first_seen = first.items[0].published_at;
        db.upsert_entries(feed.id, &first.items).await.unwrap();

        tokio::time::sleep(Duration::from_millis(1100)).await;
        let second = fetcher.fetch(&feed).await.unwrap();
        assert!(second.items.is_empty());
        assert_eq!(db.get_entry_watermark(feed.id).await.unwrap(), Some(first_seen));
    }

    struct FixedParser;

    impl FeedParser for FixedParser {
        fn parse(&self, _bytes: &[u8]) -> Result<ParsedFeed, ParseError> {
            Ok(ParsedFeed {
                title: Some("Fixed".into()),
                link: None,
                items: vec![ParsedItem {
                    title: "Only".into(),
                    link: Some("https://fixed.example.com/only".into()),
                    guid: "only".into(),
                    content: Some("body".into()),
                    published_at: Some(42),
                }],
            })
        }
    }

    #[tokio::test]
    async fn test_custom_parser() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string("anything"))
            .mount(&server)
            .await;
        let (db, feed) = setup(&server).await;

        let fetcher = fetcher(&db).with_parser(Arc::new(FixedParser));
        let outcome = fetcher.fetch(&feed).await.unwrap();
        assert_eq!(outcome.title.as_deref(), Some("Fixed"));
        assert_eq!(outcome.items.len(), 1);
        assert_eq!(outcome.items[0].published_at, 42);
        // No site link in the document: favicon derives from the feed URL
        assert_eq!(
            outcome.items[0].favicon_url,
            Some(format!("{}/favicon.ico", server.uri()))
        );
    }

    struct FailingFavicon;

    #[async_trait]
    impl FaviconResolver for FailingFavicon {
        async fn resolve(&self, _site_url: &str) -> anyhow::Result<String> {
            Err(anyhow!("unreachable"))
        }
    }

    #[tokio::test]
    async fn test_favicon_failure_is_not_fatal() {
        let server = MockServer::start().await;
        mount_rss(&server).await;
        let (db, feed) = setup(&server).await;

        let fetcher = fetcher(&db).with_favicon_resolver(Arc::new(FailingFavicon));
        let outcome = fetcher.fetch(&feed).await.unwrap();
        assert_eq!(outcome.items.len(), 3);
        assert!(outcome.items.iter().all(|i| i.favicon_url.is_none()));
    }
}
