//! Webhook delivery with rate-limit-aware retry.
//!
//! Each entry is posted independently; the only state machine lives inside
//! a single entry's retry loop: `Sending → {Delivered, RateLimited,
//! Rejected}`, where `RateLimited` loops back to `Sending` after a fixed
//! backoff. Deliveries for a cycle fan out concurrently and rejoin in
//! input order, so outcome `i` always belongs to entry `i`.

use std::time::Duration;

use futures::future;

use crate::entry::Entry;

const DELIVERY_TIMEOUT: Duration = Duration::from_secs(30);

/// Retry policy for a single entry's delivery loop.
#[derive(Debug, Clone)]
pub struct DeliveryPolicy {
    /// Attempt budget per entry.
    pub max_attempts: u32,
    /// Wait between rate-limited attempts.
    pub backoff: Duration,
    /// When false (the default), a 429 response does not consume an
    /// attempt, so a sustained rate limit retries indefinitely at
    /// `backoff` intervals — the endpoint is assumed to eventually let a
    /// benevolent sender through. Set true to enforce `max_attempts` as a
    /// hard ceiling including rate-limited attempts.
    pub count_rate_limited_attempts: bool,
}

impl Default for DeliveryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            backoff: Duration::from_secs(10),
            count_rate_limited_attempts: false,
        }
    }
}

/// Terminal result of one entry's delivery loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryOutcome {
    /// Endpoint accepted the message (200 or 204).
    Delivered,
    /// Endpoint rejected the message, the transport failed, or the retry
    /// budget ran out. The entry is not recorded as delivered and will be
    /// re-attempted on the next cycle.
    Rejected,
}

/// Deliver every entry concurrently, returning one outcome per entry in
/// input order.
pub async fn deliver_all(
    client: &reqwest::Client,
    policy: &DeliveryPolicy,
    webhook_url: &str,
    sender: &str,
    entries: &[Entry],
) -> Vec<DeliveryOutcome> {
    let posts: Vec<_> = entries
        .iter()
        .map(|entry| deliver_entry(client, policy, webhook_url, sender, entry))
        .collect();
    future::join_all(posts).await
}

/// Post one entry's payload, retrying on rate limiting per the policy.
pub async fn deliver_entry(
    client: &reqwest::Client,
    policy: &DeliveryPolicy,
    webhook_url: &str,
    sender: &str,
    entry: &Entry,
) -> DeliveryOutcome {
    let payload = entry.webhook_payload(sender);
    let mut attempts = policy.max_attempts;

    while attempts > 0 {
        let response = match tokio::time::timeout(
            DELIVERY_TIMEOUT,
            client.post(webhook_url).json(&payload).send(),
        )
        .await
        {
            Ok(Ok(r)) => r,
            Ok(Err(e)) => {
                tracing::warn!(sender = sender, url = %entry.url, error = %e, "Webhook post failed");
                return DeliveryOutcome::Rejected;
            }
            Err(_) => {
                tracing::warn!(sender = sender, url = %entry.url, "Webhook post timed out");
                return DeliveryOutcome::Rejected;
            }
        };

        match response.status().as_u16() {
            200 | 204 => return DeliveryOutcome::Delivered,
            429 => {
                if policy.count_rate_limited_attempts {
                    attempts -= 1;
                }
                tracing::warn!(
                    sender = sender,
                    url = %entry.url,
                    backoff_secs = policy.backoff.as_secs_f64(),
                    "Rate limited, backing off"
                );
                tokio::time::sleep(policy.backoff).await;
            }
            status => {
                tracing::warn!(sender = sender, url = %entry.url, status = status, "Webhook rejected entry");
                return DeliveryOutcome::Rejected;
            }
        }
    }

    // Rate limited on every attempt of a bounded budget.
    tracing::warn!(sender = sender, url = %entry.url, "Delivery retry budget exhausted");
    DeliveryOutcome::Rejected
}
