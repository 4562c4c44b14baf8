//! Configuration file parser for ~/.config/feedsieve/config.toml.
//!
//! The config file is optional. A missing file yields `Config::default()`.
//! Unknown keys are ignored by serde, though we log a warning when the file
//! contains potential typos. Values stored in the database `settings` table
//! take precedence over `max_posts`, `feed_concurrency` and the update
//! interval configured here.
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::feed::{FetcherOptions, DEFAULT_MAX_POSTS, DEFAULT_USER_AGENT};

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid TOML in config file: {0}")]
    Parse(#[from] toml::de::Error),

    /// Config file exceeds maximum allowed size.
    #[error("Config file too large: {0}")]
    TooLarge(String),
}

// ============================================================================
// Configuration Structs
// ============================================================================

/// Top-level configuration.
///
/// All fields use `#[serde(default)]` so any subset of keys can be specified.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct Config {
    /// SQLite database file. Defaults to `feedsieve.db` next to the config.
    pub database_path: Option<PathBuf>,

    /// Seconds between update cycles.
    pub update_interval_secs: u64,

    /// Entries retained per feed.
    pub max_posts: i64,

    /// Concurrent fetches. Unset = 4 per CPU, clamped to [4, 32].
    pub feed_concurrency: Option<usize>,

    /// Per-request timeout in seconds.
    pub request_timeout_secs: u64,

    /// User-Agent header sent with every feed request.
    pub user_agent: String,

    /// How long cached HTTP validators are preferred over stored ones.
    pub validator_cache_ttl_secs: u64,

    /// How long loaded filter groups are served before re-querying.
    pub filter_cache_ttl_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_path: None,
            update_interval_secs: 1800,
            max_posts: DEFAULT_MAX_POSTS,
            feed_concurrency: None,
            request_timeout_secs: 30,
            user_agent: DEFAULT_USER_AGENT.to_string(),
            validator_cache_ttl_secs: 3600,
            filter_cache_ttl_secs: 300,
        }
    }
}

impl Config {
    /// Maximum config file size (1 MB).
    const MAX_FILE_SIZE: u64 = 1_048_576;

    const KNOWN_KEYS: [&'static str; 8] = [
        "database_path",
        "update_interval_secs",
        "max_posts",
        "feed_concurrency",
        "request_timeout_secs",
        "user_agent",
        "validator_cache_ttl_secs",
        "filter_cache_ttl_secs",
    ];

    /// Load configuration from a TOML file.
    ///
    /// - Missing file → `Ok(Config::default())`
    /// - Empty file → `Ok(Config::default())`
    /// - Invalid TOML → `Err(ConfigError::Parse)` with line number info
    /// - Unknown keys → accepted, logged as warning
    /// - Zero/negative numeric values → replaced by the default, logged
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        match std::fs::metadata(path) {
            Ok(meta) if meta.len() > Self::MAX_FILE_SIZE => {
                return Err(ConfigError::TooLarge(format!(
                    "Config file is {} bytes (max {} bytes)",
                    meta.len(),
                    Self::MAX_FILE_SIZE
                )));
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "No config file found, using defaults");
                return Ok(Self::default());
            }
            Err(e) => return Err(ConfigError::Io(e)),
            Ok(_) => {}
        }

        let content = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                // Deleted between metadata and read
                tracing::debug!(path = %path.display(), "Config file disappeared, using defaults");
                return Ok(Self::default());
            }
            Err(e) => return Err(ConfigError::Io(e)),
        };

        if content.trim().is_empty() {
            tracing::debug!(path = %path.display(), "Config file is empty, using defaults");
            return Ok(Self::default());
        }

        if let Ok(raw) = content.parse::<toml::Table>() {
            for key in raw.keys() {
                if !Self::KNOWN_KEYS.contains(&key.as_str()) {
                    tracing::warn!(key = %key, "Unknown key in config file, ignoring");
                }
            }
        }

        let mut config: Config = toml::from_str(&content)?;
        config.sanitize();
        tracing::info!(path = %path.display(), "Loaded configuration");
        Ok(config)
    }

    fn sanitize(&mut self) {
        let defaults = Self::default();
        let reset = |key: &str, value: &mut u64, default: u64| {
            if *value == 0 {
                tracing::warn!(key = key, default = default, "Config value must be positive, using default");
                *value = default;
            }
        };
        reset(
            "update_interval_secs",
            &mut self.update_interval_secs,
            defaults.update_interval_secs,
        );
        reset(
            "request_timeout_secs",
            &mut self.request_timeout_secs,
            defaults.request_timeout_secs,
        );
        reset(
            "validator_cache_ttl_secs",
            &mut self.validator_cache_ttl_secs,
            defaults.validator_cache_ttl_secs,
        );
        reset(
            "filter_cache_ttl_secs",
            &mut self.filter_cache_ttl_secs,
            defaults.filter_cache_ttl_secs,
        );

        if self.max_posts <= 0 {
            tracing::warn!(
                key = "max_posts",
                default = defaults.max_posts,
                "Config value must be positive, using default"
            );
            self.max_posts = defaults.max_posts;
        }
        if self.user_agent.trim().is_empty() {
            self.user_agent = defaults.user_agent;
        }
    }

    pub fn update_interval(&self) -> Duration {
        Duration::from_secs(self.update_interval_secs)
    }

    pub fn filter_cache_ttl(&self) -> Duration {
        Duration::from_secs(self.filter_cache_ttl_secs)
    }

    pub fn fetcher_options(&self) -> FetcherOptions {
        FetcherOptions {
            timeout: Duration::from_secs(self.request_timeout_secs),
            user_agent: self.user_agent.clone(),
            validator_ttl: Duration::from_secs(self.validator_cache_ttl_secs),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
