use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use feedsieve::config::Config;
use feedsieve::feed::{positive_setting, FeedFetcher, Persister, Scheduler};
use feedsieve::filter::FilterEngine;
use feedsieve::storage::{Database, Store, SETTING_UPDATE_INTERVAL};
use feedsieve::util::validate_url;

/// Get the config directory path (~/.config/feedsieve/)
fn get_config_dir() -> Result<PathBuf> {
    let home = std::env::var("HOME").context("HOME environment variable not set")?;
    Ok(PathBuf::from(home).join(".config").join("feedsieve"))
}

#[derive(Parser, Debug)]
#[command(
    name = "feedsieve",
    version,
    about = "Fetch RSS/Atom feeds, filter entries by rule, store what survives"
)]
struct Args {
    /// Config file (default: ~/.config/feedsieve/config.toml)
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Database file, overriding the config file
    #[arg(long, value_name = "FILE")]
    db: Option<PathBuf>,

    /// Run a single update cycle and exit
    #[arg(long)]
    once: bool,

    /// Subscribe to a feed URL before updating
    #[arg(long, value_name = "URL")]
    subscribe: Option<String>,

    /// Title for --subscribe (replaced by the feed's own title on fetch)
    #[arg(long, requires = "subscribe")]
    title: Option<String>,

    /// Category for --subscribe
    #[arg(long, requires = "subscribe")]
    category: Option<String>,

    /// Tag for --subscribe (repeatable)
    #[arg(long = "tag", requires = "subscribe")]
    tags: Vec<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = Args::parse();

    let config_dir = get_config_dir()?;
    let config_path = args
        .config
        .clone()
        .unwrap_or_else(|| config_dir.join("config.toml"));
    let config = Config::load(&config_path)
        .with_context(|| format!("Failed to load config from {}", config_path.display()))?;

    let db_path = match args.db.clone().or_else(|| config.database_path.clone()) {
        Some(path) => path,
        None => {
            std::fs::create_dir_all(&config_dir).context("Failed to create config directory")?;
            config_dir.join("feedsieve.db")
        }
    };
    let db_path_str = db_path
        .to_str()
        .ok_or_else(|| anyhow::anyhow!("Invalid UTF-8 in database path"))?;

    let db = Arc::new(
        Database::open(db_path_str)
            .await
            .with_context(|| format!("Failed to open database at {}", db_path.display()))?,
    );

    if let Some(url) = &args.subscribe {
        let parsed = validate_url(url).with_context(|| format!("Refusing to subscribe to {url}"))?;
        let title = args.title.as_deref().unwrap_or(url);
        let id = db
            .insert_feed(parsed.as_str(), title, args.category.as_deref(), &args.tags)
            .await
            .context("Failed to subscribe")?;
        println!("Subscribed to {} (feed {})", parsed, id);
    }

    let store: Arc<dyn Store> = db.clone();
    let engine = Arc::new(FilterEngine::with_ttl(
        store.clone(),
        config.filter_cache_ttl(),
    ));
    let fetcher = Arc::new(
        FeedFetcher::new(store.clone(), config.fetcher_options())
            .context("Failed to build HTTP client")?,
    );
    let persister = Arc::new(Persister::new(store.clone(), engine, config.max_posts));
    let scheduler = Scheduler::new(store.clone(), fetcher, persister)
        .with_concurrency(config.feed_concurrency);

    let cancel = CancellationToken::new();
    tokio::spawn({
        let cancel = cancel.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("Shutdown requested");
                cancel.cancel();
            }
        }
    });

    loop {
        match scheduler.update_feeds(&cancel).await {
            Ok(summary) => println!(
                "Updated {}/{} feeds ({} failed, {} not modified): {} entries written, {} filtered out",
                summary.succeeded,
                summary.attempted,
                summary.failed,
                summary.not_modified,
                summary.written,
                summary.filtered_out
            ),
            Err(e) => tracing::error!(error = %e, "Update cycle failed"),
        }

        if args.once || cancel.is_cancelled() {
            break;
        }

        let interval = positive_setting::<u64>(store.as_ref(), SETTING_UPDATE_INTERVAL)
            .await
            .map(Duration::from_secs)
            .unwrap_or_else(|| config.update_interval());
        tracing::debug!(secs = interval.as_secs(), "Waiting for next cycle");

        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(interval) => {}
        }
    }

    Ok(())
}
