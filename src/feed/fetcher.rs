use std::time::Duration;

use chrono::NaiveDateTime;
use quick_xml::events::Event;
use quick_xml::Reader;
use thiserror::Error;

/// Substitute for absent `ETag`/`Last-Modified` headers. Guarantees the
/// conditional fetch always round-trips even against servers that never
/// emit validators.
pub const HEADER_SENTINEL: &str = "***";

/// Build-timestamp sentinel for a subscription that has never been fetched.
/// Always compares unequal to a real feed, so the first cycle is "changed".
const EPOCH_BUILD_DATE: &str = "Thu, 1 Jan 1970 00:00:00";

/// Calendar format of RSS build timestamps after the zone suffix is stripped.
const BUILD_DATE_FORMAT: &str = "%a, %d %b %Y %H:%M:%S";

const FETCH_TIMEOUT: Duration = Duration::from_secs(30);

/// Per-subscription cache-validation bookkeeping, persisted between cycles.
///
/// Read at the start of every cycle; written back only when a refresh is
/// classified as changed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeState {
    /// Last `ETag` response header, or [`HEADER_SENTINEL`].
    pub etag: String,
    /// Last `Last-Modified` response header, or [`HEADER_SENTINEL`].
    pub last_modified: String,
    /// Last seen `<lastBuildDate>` with the zone suffix stripped.
    pub last_build: String,
}

impl ChangeState {
    /// Initial state for a subscription's first-ever cycle.
    pub fn never_fetched() -> Self {
        Self {
            etag: HEADER_SENTINEL.to_string(),
            last_modified: HEADER_SENTINEL.to_string(),
            last_build: EPOCH_BUILD_DATE.to_string(),
        }
    }
}

/// Outcome of a conditional feed refresh.
#[derive(Debug)]
pub enum FeedRefresh {
    /// Server answered `304 Not Modified` to the conditional GET.
    NotModified,
    /// Server returned content but the build timestamp is unchanged.
    /// Covers servers that do not honor conditional retrieval.
    Unchanged,
    /// The feed has materially changed: here is the body and the fresh
    /// validation state to persist.
    Changed { body: String, state: ChangeState },
}

/// Errors that can occur during a conditional feed fetch.
///
/// All of these are cycle-fatal for the owning subscription; the next
/// scheduled cycle retries with the last persisted [`ChangeState`].
#[derive(Debug, Error)]
pub enum FetchError {
    /// Network-level error (DNS, connection, TLS, body read).
    #[error("Request failed: {0}")]
    Network(#[from] reqwest::Error),
    /// Request exceeded the 30-second timeout.
    #[error("Request timed out")]
    Timeout,
    /// HTTP response with a non-2xx, non-304 status code.
    #[error("HTTP error: status {0}")]
    HttpStatus(u16),
    /// The feed's build timestamp could not be parsed as a calendar date.
    #[error("Unparseable build timestamp: {0:?}")]
    BuildDate(String),
}

/// Conditionally refresh a feed and decide whether it has materially
/// changed since `prior` was recorded.
///
/// Presents the prior validators as `If-None-Match`/`If-Modified-Since`
/// preconditions. A `304` ends the cycle immediately. Otherwise the feed's
/// self-reported `<lastBuildDate>` is compared, as a parsed calendar
/// timestamp, against `prior.last_build` — equal means unchanged even
/// though the transport layer returned content. A feed that omits its
/// build date cannot prove staleness and is always treated as changed.
pub async fn refresh_feed(
    client: &reqwest::Client,
    feed_url: &str,
    prior: &ChangeState,
) -> Result<FeedRefresh, FetchError> {
    let response = tokio::time::timeout(
        FETCH_TIMEOUT,
        client
            .get(feed_url)
            .header("If-None-Match", &prior.etag)
            .header("If-Modified-Since", &prior.last_modified)
            .send(),
    )
    .await
    .map_err(|_| FetchError::Timeout)?
    .map_err(FetchError::Network)?;

    if response.status() == reqwest::StatusCode::NOT_MODIFIED {
        return Ok(FeedRefresh::NotModified);
    }
    if !response.status().is_success() {
        return Err(FetchError::HttpStatus(response.status().as_u16()));
    }

    let etag = header_or_sentinel(&response, reqwest::header::ETAG);
    let last_modified = header_or_sentinel(&response, reqwest::header::LAST_MODIFIED);

    let body = tokio::time::timeout(FETCH_TIMEOUT, response.text())
        .await
        .map_err(|_| FetchError::Timeout)?
        .map_err(FetchError::Network)?;

    let last_build = match extract_build_date(&body) {
        Some(raw) => {
            let fresh = strip_zone_suffix(&raw).to_string();
            if build_dates_equal(&prior.last_build, &fresh)? {
                tracing::debug!(feed = feed_url, build = %fresh, "Build timestamp unchanged");
                return Ok(FeedRefresh::Unchanged);
            }
            fresh
        }
        // No build date to compare: cannot prove the feed is stale, so
        // every refresh that gets this far counts as changed.
        None => {
            tracing::debug!(feed = feed_url, "Feed reports no build timestamp");
            prior.last_build.clone()
        }
    };

    Ok(FeedRefresh::Changed {
        body,
        state: ChangeState {
            etag,
            last_modified,
            last_build,
        },
    })
}

fn header_or_sentinel(response: &reqwest::Response, name: reqwest::header::HeaderName) -> String {
    response
        .headers()
        .get(name)
        .and_then(|v| v.to_str().ok())
        .unwrap_or(HEADER_SENTINEL)
        .to_string()
}

/// Compare two build timestamps as parsed calendar dates.
///
/// The stored value always parses (it is either the epoch sentinel or a
/// previously validated stamp); a fresh stamp that does not parse is a
/// feed defect and aborts the cycle.
fn build_dates_equal(stored: &str, fresh: &str) -> Result<bool, FetchError> {
    let stored_dt = NaiveDateTime::parse_from_str(stored, BUILD_DATE_FORMAT)
        .map_err(|_| FetchError::BuildDate(stored.to_string()))?;
    let fresh_dt = NaiveDateTime::parse_from_str(fresh, BUILD_DATE_FORMAT)
        .map_err(|_| FetchError::BuildDate(fresh.to_string()))?;
    Ok(stored_dt == fresh_dt)
}

/// Drop a trailing zone token (`+0000`, `-0500`, `GMT`, `UTC`, ...) from an
/// RFC 2822 style timestamp, leaving the calendar part.
fn strip_zone_suffix(stamp: &str) -> &str {
    let stamp = stamp.trim();
    if let Some((head, tail)) = stamp.rsplit_once(' ') {
        let is_offset = (tail.starts_with('+') || tail.starts_with('-'))
            && tail[1..].chars().all(|c| c.is_ascii_digit());
        let is_zone_name = !tail.is_empty() && tail.chars().all(|c| c.is_ascii_uppercase());
        if is_offset || is_zone_name {
            return head.trim_end();
        }
    }
    stamp
}

/// Pull the text of the first `<lastBuildDate>` element out of raw feed
/// XML without running a full feed parse.
///
/// quick-xml (0.37) never expands entity declarations, so this scan is
/// safe on hostile input; a document that is not XML at all simply yields
/// `None` and is handled by the no-build-date path.
fn extract_build_date(body: &str) -> Option<String> {
    let mut reader = Reader::from_reader(body.as_bytes());
    reader.config_mut().trim_text(true);

    let mut buf = Vec::new();
    let mut inside = false;
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) if e.local_name().as_ref() == b"lastBuildDate" => inside = true,
            Ok(Event::Text(t)) if inside => {
                return t.unescape().ok().map(|s| s.into_owned());
            }
            Ok(Event::End(e)) if e.local_name().as_ref() == b"lastBuildDate" => inside = false,
            Ok(Event::Eof) | Err(_) => return None,
            _ => {}
        }
        buf.clear();
    }
}
