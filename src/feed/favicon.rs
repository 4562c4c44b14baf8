use anyhow::{Context, Result};
use async_trait::async_trait;
use url::Url;

/// Resolves the favicon for a feed's website.
///
/// Best effort: a failure is logged by the caller and the entries are
/// stored without a favicon.
#[async_trait]
pub trait FaviconResolver: Send + Sync {
    async fn resolve(&self, site_url: &str) -> Result<String>;
}

/// Points at `/favicon.ico` on the site's origin. No network I/O.
#[derive(Debug, Clone, Copy, Default)]
pub struct OriginFavicon;

#[async_trait]
impl FaviconResolver for OriginFavicon {
    async fn resolve(&self, site_url: &str) -> Result<String> {
        let url = Url::parse(site_url).with_context(|| format!("invalid site URL {site_url}"))?;
        let favicon = url.join("/favicon.ico").context("cannot derive favicon URL")?;
        Ok(favicon.to_string())
    }
}
