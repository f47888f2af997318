//! Per-subscription update cycle.
//!
//! One cycle runs detect → parse → dedup filter → enrich → deliver →
//! commit for a single subscription. Subscriptions are independent: their
//! cycles run concurrently and share nothing but the store, which is
//! partitioned by subscription name.

use std::sync::Arc;

use futures::future;
use thiserror::Error;

use crate::delivery::{self, DeliveryOutcome, DeliveryPolicy};
use crate::entry::Entry;
use crate::feed::{refresh_feed, FeedParser, FeedRefresh, FetchError, ParseError};
use crate::preview::{self, AltTextMatch, PreviewStrategy};
use crate::storage::{Database, StorageError};

/// One independent polling target: a feed source paired with a delivery
/// endpoint and a parsing capability.
///
/// `name` must be unique across the running process — it keys both the
/// dedup partition and the change-state record.
#[derive(Clone)]
pub struct Subscription {
    pub name: String,
    pub feed_url: String,
    pub webhook_url: String,
    pub parser: Arc<dyn FeedParser>,
}

/// Errors that abort a cycle for one subscription.
///
/// None of these touch other subscriptions; the owner simply retries on
/// its next scheduled cycle with the last persisted change state.
#[derive(Debug, Error)]
pub enum CycleError {
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error(transparent)]
    Parse(#[from] ParseError),
    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// What a completed cycle did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleOutcome {
    /// Nothing new: 304 response or unchanged build timestamp. No parse,
    /// no dedup lookups, no deliveries.
    NoChange,
    /// The feed changed; `new_entries` passed the dedup filter, of which
    /// `delivered` were accepted and recorded and `failed` were rejected
    /// (left unrecorded, so they reappear as candidates next cycle).
    Completed {
        new_entries: usize,
        delivered: usize,
        failed: usize,
    },
}

/// Runs subscription cycles against shared resources.
///
/// Owns the HTTP client, the keyed record store, the delivery policy and
/// the preview strategy — everything a cycle needs beyond the subscription
/// itself. Construction is explicit; there is no ambient environment
/// coupling.
pub struct Notifier {
    db: Database,
    client: reqwest::Client,
    policy: DeliveryPolicy,
    preview: Arc<dyn PreviewStrategy>,
}

impl Notifier {
    pub fn new(db: Database, client: reqwest::Client, policy: DeliveryPolicy) -> Self {
        Self {
            db,
            client,
            policy,
            preview: Arc::new(AltTextMatch),
        }
    }

    /// Replace the default preview strategy.
    pub fn with_preview_strategy(mut self, strategy: Arc<dyn PreviewStrategy>) -> Self {
        self.preview = strategy;
        self
    }

    /// Run one full cycle for a subscription.
    pub async fn run_cycle(&self, sub: &Subscription) -> Result<CycleOutcome, CycleError> {
        // Detecting
        let prior = self.db.change_state(&sub.name).await?;
        let (body, fresh_state) =
            match refresh_feed(&self.client, &sub.feed_url, &prior).await? {
                FeedRefresh::NotModified | FeedRefresh::Unchanged => {
                    tracing::debug!(subscription = %sub.name, "No new entries");
                    return Ok(CycleOutcome::NoChange);
                }
                FeedRefresh::Changed { body, state } => (body, state),
            };

        // The fresh validation state is persisted before parse/delivery
        // complete. A crash between here and commit skips this batch on
        // the next cycle; dedup-by-URL makes the reverse ordering safe
        // too, but this matches the recorded behavior of the system.
        self.db.store_change_state(&sub.name, &fresh_state).await?;

        // Parsing
        let entries = sub.parser.parse(&body)?;

        // Filtering
        let mut new_entries = Vec::new();
        for entry in entries {
            if !self.db.exists(&sub.name, &entry.url).await? {
                new_entries.push(entry);
            }
        }
        if new_entries.is_empty() {
            tracing::info!(subscription = %sub.name, "Feed changed but all entries already delivered");
            return Ok(CycleOutcome::Completed {
                new_entries: 0,
                delivered: 0,
                failed: 0,
            });
        }

        // Enriching
        preview::enrich_all(&self.client, self.preview.as_ref(), &mut new_entries).await;

        // Delivering
        let outcomes = delivery::deliver_all(
            &self.client,
            &self.policy,
            &sub.webhook_url,
            &sub.name,
            &new_entries,
        )
        .await;

        // Committing: only entries whose own delivery succeeded.
        let delivered_entries: Vec<Entry> = new_entries
            .iter()
            .zip(&outcomes)
            .filter(|(_, outcome)| **outcome == DeliveryOutcome::Delivered)
            .map(|(entry, _)| entry.clone())
            .collect();
        self.db
            .record_delivered(&sub.name, &delivered_entries)
            .await?;

        let delivered = delivered_entries.len();
        let failed = new_entries.len() - delivered;
        tracing::info!(
            subscription = %sub.name,
            new_entries = new_entries.len(),
            delivered = delivered,
            failed = failed,
            "Cycle complete"
        );

        Ok(CycleOutcome::Completed {
            new_entries: new_entries.len(),
            delivered,
            failed,
        })
    }

    /// Run one cycle per subscription, concurrently.
    ///
    /// Results correspond index-wise to the input; a failed cycle never
    /// disturbs its neighbors.
    pub async fn run_all(
        &self,
        subscriptions: &[Subscription],
    ) -> Vec<Result<CycleOutcome, CycleError>> {
        let cycles: Vec<_> = subscriptions
            .iter()
            .map(|sub| self.run_cycle(sub))
            .collect();
        future::join_all(cycles).await
    }
}
