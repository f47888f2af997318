use std::sync::Arc;

use thiserror::Error;

use crate::entry::Entry;

/// Display format used for entry publish dates (RFC 2822 without zone).
const PUBLISHED_FORMAT: &str = "%a, %d %b %Y %H:%M:%S";

/// Errors produced by a [`FeedParser`] implementation.
///
/// A parse failure is cycle-fatal: the orchestrator surfaces it and the
/// subscription retries from scratch on its next scheduled cycle.
#[derive(Debug, Error)]
pub enum ParseError {
    /// The feed content is not well-formed RSS/Atom.
    #[error("Malformed feed: {0}")]
    Malformed(String),
}

impl From<feed_rs::parser::ParseFeedError> for ParseError {
    fn from(e: feed_rs::parser::ParseFeedError) -> Self {
        ParseError::Malformed(e.to_string())
    }
}

/// Parsing capability for one feed family.
///
/// Implementations translate raw feed content into an ordered sequence of
/// [`Entry`] values. There is no shared algorithm beyond this contract:
/// feeds that embed images in descriptions, mangle links, or invent their
/// own namespaces get their own implementation. Entries without a link are
/// not notifiable and must be dropped by the parser, not surfaced as errors.
pub trait FeedParser: Send + Sync {
    fn parse(&self, raw: &str) -> Result<Vec<Entry>, ParseError>;
}

/// Default parser for well-behaved RSS and Atom feeds, backed by `feed-rs`.
///
/// Field mapping:
/// - `url` — first link href (query string stripped when `strip_query` is set,
///   for feeds that append per-request tracking parameters)
/// - `published` — `published` falling back to `updated`, rendered in the
///   same calendar format the change detector compares
/// - `image` — first media object content URL, when the feed carries one
#[derive(Debug, Clone, Default)]
pub struct SyndicationParser {
    /// Strip query strings from entry links before dedup keying.
    pub strip_query: bool,
}

impl FeedParser for SyndicationParser {
    fn parse(&self, raw: &str) -> Result<Vec<Entry>, ParseError> {
        let feed = feed_rs::parser::parse(raw.as_bytes())?;

        let entries = feed
            .entries
            .into_iter()
            .filter_map(|item| {
                let mut url = item.links.first().map(|l| l.href.clone())?;
                if self.strip_query {
                    if let Some(pos) = url.find('?') {
                        url.truncate(pos);
                    }
                }

                let title = item
                    .title
                    .map(|t| t.content.trim().to_string())
                    .unwrap_or_default();
                let description = item
                    .summary
                    .map(|s| s.content)
                    .or_else(|| item.content.and_then(|c| c.body))
                    .map(|d| d.trim().to_string())
                    .unwrap_or_default();
                let published = item
                    .published
                    .or(item.updated)
                    .map(|dt| dt.format(PUBLISHED_FORMAT).to_string())
                    .unwrap_or_default();
                let author = item
                    .authors
                    .first()
                    .map(|a| a.name.clone())
                    .unwrap_or_default();
                let image = item
                    .media
                    .iter()
                    .flat_map(|m| m.content.iter())
                    .find_map(|c| c.url.as_ref().map(|u| u.to_string()));

                Some(Entry {
                    title,
                    url,
                    description,
                    published,
                    author,
                    image,
                })
            })
            .collect();

        Ok(entries)
    }
}

/// Resolve a parser capability by its configured name.
///
/// `"syndication"` is the built-in default; new feed families register
/// here as they grow their own [`FeedParser`] implementations.
pub fn parser_by_name(name: &str) -> Option<Arc<dyn FeedParser>> {
    match name {
        "syndication" => Some(Arc::new(SyndicationParser::default())),
        "syndication-strip-query" => Some(Arc::new(SyndicationParser { strip_query: true })),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE_RSS: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<rss version="2.0" xmlns:dc="http://purl.org/dc/elements/1.1/">
<channel>
  <title>Dev Blog</title>
  <lastBuildDate>Tue, 03 Jun 2025 10:00:00 +0000</lastBuildDate>
  <item>
    <title>  Patch Notes  </title>
    <link>https://example.com/news/patch?utm_source=rss</link>
    <description>Balance changes.</description>
    <pubDate>Tue, 03 Jun 2025 09:30:00 +0000</pubDate>
    <dc:creator>The Team</dc:creator>
  </item>
  <item>
    <title>No link, should be dropped</title>
  </item>
</channel>
</rss>"#;

    #[test]
    fn test_parse_maps_fields() {
        let parser = SyndicationParser::default();
        let entries = parser.parse(SAMPLE_RSS).unwrap();

        assert_eq!(entries.len(), 1, "link-less items are dropped");
        let e = &entries[0];
        assert_eq!(e.title, "Patch Notes");
        assert_eq!(e.url, "https://example.com/news/patch?utm_source=rss");
        assert_eq!(e.description, "Balance changes.");
        assert_eq!(e.published, "Tue, 03 Jun 2025 09:30:00");
        assert_eq!(e.author, "The Team");
        assert_eq!(e.image, None);
    }

    #[test]
    fn test_strip_query_removes_tracking_params() {
        let parser = SyndicationParser { strip_query: true };
        let entries = parser.parse(SAMPLE_RSS).unwrap();
        assert_eq!(entries[0].url, "https://example.com/news/patch");
    }

    #[test]
    fn test_malformed_feed_is_an_error() {
        let parser = SyndicationParser::default();
        let err = parser.parse("<not valid xml").unwrap_err();
        assert!(matches!(err, ParseError::Malformed(_)));
    }

    #[test]
    fn test_parser_registry() {
        assert!(parser_by_name("syndication").is_some());
        assert!(parser_by_name("syndication-strip-query").is_some());
        assert!(parser_by_name("bespoke-nonsense").is_none());
    }
}
