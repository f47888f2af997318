//! herald — polls RSS/Atom feeds and pushes new entries to chat webhooks.
//!
//! The core of the crate is the per-subscription update cycle:
//! conditional fetch → change detection → parse → dedup filter →
//! preview enrichment → concurrent delivery with retry → dedup commit.
//! Everything else (config, CLI, logging) is glue around that cycle.

pub mod config;
pub mod delivery;
pub mod entry;
pub mod feed;
pub mod preview;
pub mod storage;
pub mod subscription;

pub use config::Config;
pub use delivery::{DeliveryOutcome, DeliveryPolicy};
pub use entry::Entry;
pub use feed::{parser_by_name, ChangeState, FeedParser, FeedRefresh, FetchError, ParseError};
pub use preview::{AltTextMatch, PreviewStrategy};
pub use storage::{Database, StorageError};
pub use subscription::{CycleError, CycleOutcome, Notifier, Subscription};
