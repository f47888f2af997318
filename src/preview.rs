//! Best-effort preview-image enrichment.
//!
//! Entries that arrive from the parser without an image get one chance at
//! a preview: fetch the entry's own page and let a [`PreviewStrategy`]
//! pick a representative image out of the HTML. Every failure mode here —
//! network error, unparseable page, no candidate — is non-fatal; the entry
//! simply proceeds without an image.

use std::time::Duration;

use futures::future;
use scraper::{Html, Selector};

use crate::entry::Entry;

const PREVIEW_TIMEOUT: Duration = Duration::from_secs(30);

/// Heuristic for locating a representative image in an entry's page.
///
/// Pluggable because feed families embed images differently; the strategy
/// only sees the fetched HTML and the entry it belongs to.
pub trait PreviewStrategy: Send + Sync {
    fn find_image(&self, html: &str, entry: &Entry) -> Option<String>;
}

/// Default strategy: the first element whose `alt` attribute equals the
/// entry title, taking its `src`.
pub struct AltTextMatch;

impl PreviewStrategy for AltTextMatch {
    fn find_image(&self, html: &str, entry: &Entry) -> Option<String> {
        let document = Html::parse_document(html);
        let selector = Selector::parse("[alt]").ok()?;
        document
            .select(&selector)
            .find(|el| el.value().attr("alt") == Some(entry.title.as_str()))
            .and_then(|el| el.value().attr("src"))
            .map(str::to_string)
    }
}

/// Enrich every image-less entry in place, concurrently.
///
/// One page fetch per entry with no image; results are joined in input
/// order, so each found image lands on the entry it was fetched for.
pub async fn enrich_all(
    client: &reqwest::Client,
    strategy: &dyn PreviewStrategy,
    entries: &mut [Entry],
) {
    let found = {
        let lookups: Vec<_> = entries
            .iter()
            .map(|entry| fetch_preview(client, strategy, entry))
            .collect();
        future::join_all(lookups).await
    };

    for (entry, image) in entries.iter_mut().zip(found) {
        if entry.image.is_none() {
            entry.image = image;
        }
    }
}

/// Fetch one entry's page and apply the strategy. `None` on any failure.
async fn fetch_preview(
    client: &reqwest::Client,
    strategy: &dyn PreviewStrategy,
    entry: &Entry,
) -> Option<String> {
    if entry.image.is_some() {
        return None;
    }

    let response = match tokio::time::timeout(PREVIEW_TIMEOUT, client.get(&entry.url).send()).await
    {
        Ok(Ok(r)) if r.status().is_success() => r,
        Ok(Ok(r)) => {
            tracing::debug!(url = %entry.url, status = %r.status(), "Preview page fetch rejected");
            return None;
        }
        Ok(Err(e)) => {
            tracing::debug!(url = %entry.url, error = %e, "Preview page fetch failed");
            return None;
        }
        Err(_) => {
            tracing::debug!(url = %entry.url, "Preview page fetch timed out");
            return None;
        }
    };

    let html = match response.text().await {
        Ok(html) => html,
        Err(e) => {
            tracing::debug!(url = %entry.url, error = %e, "Preview page body read failed");
            return None;
        }
    };

    strategy.find_image(&html, entry)
}
