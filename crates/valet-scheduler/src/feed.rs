//! Feed fetching, lightweight RSS extraction, and keyword filtering.

use async_trait::async_trait;
use std::sync::OnceLock;

use valet_core::error::{Result, ValetError};

/// One entry of a fetched feed. `guid` is the dedup identifier — the `<guid>`
/// element when present, else the link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedItem {
    pub title: String,
    pub link: String,
    pub guid: String,
}

#[derive(Debug, Clone)]
pub struct ParsedFeed {
    pub title: String,
    pub items: Vec<FeedItem>,
}

/// Fetches and parses one feed URL. The poll loop depends on this trait so
/// tests can substitute canned feeds and injected failures.
#[async_trait]
pub trait FeedFetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<ParsedFeed>;
}

/// Production fetcher: HTTP GET + regex extraction over the raw XML. Good
/// enough for the common RSS shapes; a parse miss only costs one feed one
/// tick.
pub struct HttpFeedFetcher {
    client: reqwest::Client,
}

impl HttpFeedFetcher {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }
}

impl Default for HttpFeedFetcher {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl FeedFetcher for HttpFeedFetcher {
    async fn fetch(&self, url: &str) -> Result<ParsedFeed> {
        let response = self
            .client
            .get(url)
            .timeout(std::time::Duration::from_secs(30))
            .send()
            .await
            .map_err(|e| ValetError::Feed(format!("Fetch failed: {e}")))?;
        let xml = response
            .text()
            .await
            .map_err(|e| ValetError::Feed(format!("Read failed: {e}")))?;
        parse_feed(&xml)
    }
}

fn title_re() -> &'static regex::Regex {
    static RE: OnceLock<regex::Regex> = OnceLock::new();
    RE.get_or_init(|| {
        regex::Regex::new(r"(?s)<title>\s*(?:<!\[CDATA\[(.*?)\]\]>|(.*?))\s*</title>").unwrap()
    })
}

fn item_re() -> &'static regex::Regex {
    static RE: OnceLock<regex::Regex> = OnceLock::new();
    RE.get_or_init(|| regex::Regex::new(r"(?s)<item>(.*?)</item>").unwrap())
}

fn link_re() -> &'static regex::Regex {
    static RE: OnceLock<regex::Regex> = OnceLock::new();
    RE.get_or_init(|| regex::Regex::new(r"(?s)<link>(.*?)</link>").unwrap())
}

fn guid_re() -> &'static regex::Regex {
    static RE: OnceLock<regex::Regex> = OnceLock::new();
    RE.get_or_init(|| regex::Regex::new(r"(?s)<guid[^>]*>(.*?)</guid>").unwrap())
}

fn first_title(xml: &str) -> Option<String> {
    title_re().captures(xml).map(|c| {
        c.get(1)
            .or_else(|| c.get(2))
            .map(|m| m.as_str().trim().to_string())
            .unwrap_or_default()
    })
}

/// Extract the channel title and up to five newest items.
pub fn parse_feed(xml: &str) -> Result<ParsedFeed> {
    let title = first_title(xml).unwrap_or_else(|| "Unknown Feed".to_string());
    let mut items = Vec::new();
    for caps in item_re().captures_iter(xml).take(5) {
        let body = &caps[1];
        let item_title = first_title(body).unwrap_or_else(|| "No Title".to_string());
        let link = link_re()
            .captures(body)
            .map(|c| c[1].trim().to_string())
            .unwrap_or_default();
        let guid = guid_re()
            .captures(body)
            .map(|c| c[1].trim().to_string())
            .unwrap_or_else(|| link.clone());
        items.push(FeedItem {
            title: item_title,
            link,
            guid,
        });
    }
    if items.is_empty() && !xml.contains("<rss") && !xml.contains("<channel") {
        return Err(ValetError::Feed("Not an RSS document".into()));
    }
    Ok(ParsedFeed { title, items })
}

/// Keyword filter: exclude rules are checked first and veto the item; with
/// no include rules everything else passes, otherwise at least one include
/// keyword must match. Matching is case-insensitive substring.
pub fn title_passes(title: &str, includes: &[String], excludes: &[String]) -> bool {
    let haystack = title.to_lowercase();
    if excludes
        .iter()
        .any(|w| haystack.contains(&w.to_lowercase()))
    {
        return false;
    }
    if includes.is_empty() {
        return true;
    }
    includes
        .iter()
        .any(|w| haystack.contains(&w.to_lowercase()))
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"<?xml version="1.0"?>
<rss version="2.0"><channel>
<title><![CDATA[Example News]]></title>
<item>
  <title>Rust 1.85 released</title>
  <link>https://example.com/rust-185</link>
  <guid isPermaLink="false">post-42</guid>
</item>
<item>
  <title><![CDATA[Weekly digest]]></title>
  <link>https://example.com/digest</link>
</item>
</channel></rss>"#;

    #[test]
    fn parses_channel_and_items() {
        let feed = parse_feed(SAMPLE).unwrap();
        assert_eq!(feed.title, "Example News");
        assert_eq!(feed.items.len(), 2);
        assert_eq!(feed.items[0].guid, "post-42");
        assert_eq!(feed.items[0].title, "Rust 1.85 released");
        // guid falls back to link when absent
        assert_eq!(feed.items[1].guid, "https://example.com/digest");
        assert_eq!(feed.items[1].title, "Weekly digest");
    }

    #[test]
    fn non_feed_document_is_an_error() {
        assert!(parse_feed("<html><body>nope</body></html>").is_err());
    }

    #[test]
    fn exclude_rules_veto_before_includes() {
        let includes = vec!["rust".to_string()];
        let excludes = vec!["beta".to_string()];
        assert!(title_passes("Rust 1.85 released", &includes, &excludes));
        assert!(!title_passes("Rust 1.86 beta", &includes, &excludes));
        assert!(!title_passes("Go 1.24 released", &includes, &excludes));
    }

    #[test]
    fn empty_include_set_passes_everything() {
        assert!(title_passes("anything at all", &[], &[]));
        assert!(!title_passes("spam offer", &[], &["spam".to_string()]));
    }
}
