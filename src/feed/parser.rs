use feed_rs::parser;
use sha2::{Digest, Sha256};

use super::error::ParseError;

/// One item as it appears in the feed document.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedItem {
    pub title: String,
    pub link: Option<String>,
    pub guid: String,
    pub content: Option<String>,
    /// Unix seconds; `None` when the item carries no date
    pub published_at: Option<i64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ParsedFeed {
    pub title: Option<String>,
    /// Link to the feed's website
    pub link: Option<String>,
    pub items: Vec<ParsedItem>,
}

/// Turns a response body into a normalized item list.
pub trait FeedParser: Send + Sync {
    fn parse(&self, bytes: &[u8]) -> Result<ParsedFeed, ParseError>;
}

/// RSS 0.9x/1.0/2.0, Atom and JSON Feed via `feed-rs`.
#[derive(Debug, Clone, Copy, Default)]
pub struct FeedRsParser;

impl FeedParser for FeedRsParser {
    fn parse(&self, bytes: &[u8]) -> Result<ParsedFeed, ParseError> {
        let feed = parser::parse(bytes).map_err(|e| ParseError(e.to_string()))?;

        let title = feed
            .title
            .map(|t| t.content.trim().to_string())
            .filter(|t| !t.is_empty());
        let link = feed
            .links
            .iter()
            .find(|l| l.rel.as_deref() != Some("self"))
            .map(|l| l.href.clone());

        let items = feed
            .entries
            .into_iter()
            .map(|entry| {
                let link = entry.links.first().map(|l| l.href.clone());
                let published_at = entry.published.or(entry.updated).map(|dt| dt.timestamp());
                let content = entry
                    .content
                    .and_then(|c| c.body)
                    .or_else(|| entry.summary.map(|s| s.content));
                let title = entry
                    .title
                    .map(|t| t.content)
                    .unwrap_or_else(|| "Untitled".to_string());

                let existing_id = if entry.id.is_empty() {
                    None
                } else {
                    Some(entry.id.as_str())
                };
                let guid = generate_guid(existing_id, link.as_deref(), &title, published_at);

                ParsedItem {
                    title,
                    link,
                    guid,
                    content,
                    published_at,
                }
            })
            .collect();

        Ok(ParsedFeed { title, link, items })
    }
}

fn generate_guid(
    existing: Option<&str>,
    url: Option<&str>,
    title: &str,
    published: Option<i64>,
) -> String {
    if let Some(guid) = existing {
        let trimmed = guid.trim();
        if !trimmed.is_empty() {
            return trimmed.to_string();
        }
    }

    let input = format!(
        "{}|{}|{}",
        url.unwrap_or(""),
        title,
        published.map(|p| p.to_string()).unwrap_or_default()
    );
    let hash = Sha256::digest(input.as_bytes());
    format!("{:x}", hash)
}
