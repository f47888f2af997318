//! Feed retrieval and parsing.
//!
//! - [`fetcher`](self) — conditional HTTP retrieval and change detection
//!   against the persisted cache-validation state
//! - [`parser`](self) — the pluggable [`FeedParser`] capability and the
//!   default `feed-rs` based implementation

mod fetcher;
mod parser;

pub use fetcher::{refresh_feed, ChangeState, FeedRefresh, FetchError, HEADER_SENTINEL};
pub use parser::{parser_by_name, FeedParser, ParseError, SyndicationParser};
