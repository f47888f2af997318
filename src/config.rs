//! Configuration file parser for herald.toml.
//!
//! A missing file yields `Config::default()` (zero subscriptions — the
//! caller decides whether that is fatal). Unknown top-level keys are
//! accepted but logged as potential typos. Webhook URLs carry secret
//! tokens and are masked in `Debug` output.

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;
use url::Url;

use crate::delivery::DeliveryPolicy;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid TOML in config file: {0}")]
    Parse(#[from] toml::de::Error),

    /// Config file exceeds maximum allowed size.
    #[error("Config file too large: {0}")]
    TooLarge(String),

    #[error("Subscription {name:?}: {problem}")]
    InvalidSubscription { name: String, problem: String },

    #[error("Duplicate subscription name {0:?}")]
    DuplicateName(String),
}

/// Top-level application configuration.
///
/// All fields use `#[serde(default)]` so any subset of keys can be
/// specified. Missing keys fall back to `Default::default()`.
#[derive(Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// SQLite store path holding dedup partitions and change state.
    pub database_path: String,

    /// Minutes between polling rounds. 0 = run a single round and exit.
    pub poll_interval_minutes: u64,

    /// Retry policy for webhook delivery.
    pub delivery: DeliveryConfig,

    /// The polling targets.
    pub subscriptions: Vec<SubscriptionConfig>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_path: "herald.db".to_string(),
            poll_interval_minutes: 0,
            delivery: DeliveryConfig::default(),
            subscriptions: Vec::new(),
        }
    }
}

/// Retry policy knobs, mirrored into [`DeliveryPolicy`].
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct DeliveryConfig {
    pub max_attempts: u32,
    pub backoff_secs: u64,
    /// When true, rate-limited responses consume the attempt budget and a
    /// sustained 429 eventually fails the entry. The default retries
    /// indefinitely under rate limiting.
    pub count_rate_limited_attempts: bool,
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            backoff_secs: 10,
            count_rate_limited_attempts: false,
        }
    }
}

impl DeliveryConfig {
    pub fn to_policy(&self) -> DeliveryPolicy {
        DeliveryPolicy {
            max_attempts: self.max_attempts,
            backoff: Duration::from_secs(self.backoff_secs),
            count_rate_limited_attempts: self.count_rate_limited_attempts,
        }
    }
}

/// One polling target as declared in the config file.
#[derive(Clone, Deserialize)]
pub struct SubscriptionConfig {
    /// Unique label; keys the dedup partition and the change-state record,
    /// and is shown as the webhook sender name.
    pub name: String,
    pub feed_url: String,
    /// Endpoint URL including its secret token. Masked in Debug output.
    pub webhook_url: String,
    /// Parser capability name (see `feed::parser_by_name`).
    #[serde(default = "default_parser_name")]
    pub parser: String,
}

fn default_parser_name() -> String {
    "syndication".to_string()
}

/// Mask webhook URLs in Debug output to prevent token leakage in logs.
impl std::fmt::Debug for SubscriptionConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriptionConfig")
            .field("name", &self.name)
            .field("feed_url", &self.feed_url)
            .field("webhook_url", &"[REDACTED]")
            .field("parser", &self.parser)
            .finish()
    }
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("database_path", &self.database_path)
            .field("poll_interval_minutes", &self.poll_interval_minutes)
            .field("delivery", &self.delivery)
            .field("subscriptions", &self.subscriptions)
            .finish()
    }
}

impl Config {
    /// Maximum config file size (1 MB).
    const MAX_FILE_SIZE: u64 = 1_048_576;

    /// Load configuration from a TOML file.
    ///
    /// - Missing file → `Ok(Config::default())`
    /// - Empty file → `Ok(Config::default())`
    /// - Invalid TOML → `Err(ConfigError::Parse)` with line number info
    /// - Unknown top-level keys → accepted, logged as warning
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        match std::fs::metadata(path) {
            Ok(meta) if meta.len() > Self::MAX_FILE_SIZE => {
                return Err(ConfigError::TooLarge(format!(
                    "Config file is {} bytes (max {} bytes)",
                    meta.len(),
                    Self::MAX_FILE_SIZE
                )));
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "No config file found, using defaults");
                return Ok(Self::default());
            }
            Err(e) => return Err(ConfigError::Io(e)),
            Ok(_) => {}
        }

        let content = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "Config file disappeared, using defaults");
                return Ok(Self::default());
            }
            Err(e) => return Err(ConfigError::Io(e)),
        };

        if content.trim().is_empty() {
            tracing::debug!(path = %path.display(), "Config file is empty, using defaults");
            return Ok(Self::default());
        }

        if let Ok(raw) = content.parse::<toml::Table>() {
            let known_keys = [
                "database_path",
                "poll_interval_minutes",
                "delivery",
                "subscriptions",
            ];
            for key in raw.keys() {
                if !known_keys.contains(&key.as_str()) {
                    tracing::warn!(key = %key, "Unknown key in config file, ignoring");
                }
            }
        }

        let config: Config = toml::from_str(&content)?;
        config.validate()?;
        tracing::info!(
            path = %path.display(),
            subscriptions = config.subscriptions.len(),
            "Loaded configuration"
        );
        Ok(config)
    }

    /// Check subscription declarations: unique names, a usable and unique
    /// partition identifier, http(s) URLs, and a known parser capability.
    fn validate(&self) -> Result<(), ConfigError> {
        let mut seen = HashSet::new();
        // Dedup partitions are keyed by the sanitized name, so two names
        // that sanitize identically (dev-blog / devblog) would silently
        // share a partition. Reject them up front.
        let mut seen_partitions: HashMap<String, &str> = HashMap::new();
        for sub in &self.subscriptions {
            if !seen.insert(sub.name.as_str()) {
                return Err(ConfigError::DuplicateName(sub.name.clone()));
            }
            let partition = crate::storage::Database::sanitize_partition(&sub.name);
            if partition.is_empty() {
                return Err(ConfigError::InvalidSubscription {
                    name: sub.name.clone(),
                    problem: "name contains no alphanumeric characters".to_string(),
                });
            }
            if let Some(other) = seen_partitions.insert(partition.clone(), &sub.name) {
                return Err(ConfigError::InvalidSubscription {
                    name: sub.name.clone(),
                    problem: format!(
                        "partition identifier {:?} collides with subscription {:?}",
                        partition, other
                    ),
                });
            }
            for (label, url) in [("feed_url", &sub.feed_url), ("webhook_url", &sub.webhook_url)] {
                match Url::parse(url) {
                    Ok(parsed) if matches!(parsed.scheme(), "http" | "https") => {}
                    Ok(parsed) => {
                        return Err(ConfigError::InvalidSubscription {
                            name: sub.name.clone(),
                            problem: format!("{} has unsupported scheme {:?}", label, parsed.scheme()),
                        });
                    }
                    Err(e) => {
                        return Err(ConfigError::InvalidSubscription {
                            name: sub.name.clone(),
                            problem: format!("{} is not a valid URL: {}", label, e),
                        });
                    }
                }
            }
            if crate::feed::parser_by_name(&sub.parser).is_none() {
                return Err(ConfigError::InvalidSubscription {
                    name: sub.name.clone(),
                    problem: format!("unknown parser {:?}", sub.parser),
                });
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_config(dir_name: &str, content: &str) -> std::path::PathBuf {
        let dir = std::env::temp_dir().join(dir_name);
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("herald.toml");
        std::fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.database_path, "herald.db");
        assert_eq!(config.poll_interval_minutes, 0);
        assert_eq!(config.delivery.max_attempts, 5);
        assert_eq!(config.delivery.backoff_secs, 10);
        assert!(!config.delivery.count_rate_limited_attempts);
        assert!(config.subscriptions.is_empty());
    }

    #[test]
    fn test_missing_file_returns_default() {
        let path = Path::new("/tmp/herald_test_nonexistent_config.toml");
        let config = Config::load(path).unwrap();
        assert!(config.subscriptions.is_empty());
    }

    #[test]
    fn test_full_config() {
        let path = write_config(
            "herald_config_test_full",
            r#"
database_path = "/var/lib/herald/herald.db"
poll_interval_minutes = 15

[delivery]
max_attempts = 8
backoff_secs = 5
count_rate_limited_attempts = true

[[subscriptions]]
name = "albion"
feed_url = "https://albiononline.com/rss"
webhook_url = "https://discord.com/api/webhooks/1/secret-token"

[[subscriptions]]
name = "cm"
feed_url = "https://example.com/feed.xml"
webhook_url = "https://discord.com/api/webhooks/2/other-token"
parser = "syndication-strip-query"
"#,
        );

        let config = Config::load(&path).unwrap();
        assert_eq!(config.database_path, "/var/lib/herald/herald.db");
        assert_eq!(config.poll_interval_minutes, 15);
        assert_eq!(config.delivery.max_attempts, 8);
        assert!(config.delivery.count_rate_limited_attempts);
        assert_eq!(config.subscriptions.len(), 2);
        assert_eq!(config.subscriptions[0].parser, "syndication");
        assert_eq!(config.subscriptions[1].parser, "syndication-strip-query");

        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn test_duplicate_names_rejected() {
        let path = write_config(
            "herald_config_test_dup",
            r#"
[[subscriptions]]
name = "albion"
feed_url = "https://a.example.com/rss"
webhook_url = "https://discord.com/api/webhooks/1/t"

[[subscriptions]]
name = "albion"
feed_url = "https://b.example.com/rss"
webhook_url = "https://discord.com/api/webhooks/2/t"
"#,
        );
        assert!(matches!(
            Config::load(&path),
            Err(ConfigError::DuplicateName(_))
        ));
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn test_colliding_partition_identifiers_rejected() {
        // Distinct names, identical sanitized partition id.
        let path = write_config(
            "herald_config_test_collide",
            r#"
[[subscriptions]]
name = "dev-blog"
feed_url = "https://a.example.com/rss"
webhook_url = "https://discord.com/api/webhooks/1/t"

[[subscriptions]]
name = "devblog"
feed_url = "https://b.example.com/rss"
webhook_url = "https://discord.com/api/webhooks/2/t"
"#,
        );
        let err = Config::load(&path).unwrap_err();
        match err {
            ConfigError::InvalidSubscription { name, problem } => {
                assert_eq!(name, "devblog");
                assert!(problem.contains("collides"));
            }
            other => panic!("Expected InvalidSubscription, got {:?}", other),
        }
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn test_bad_scheme_rejected() {
        let path = write_config(
            "herald_config_test_scheme",
            r#"
[[subscriptions]]
name = "albion"
feed_url = "file:///etc/passwd"
webhook_url = "https://discord.com/api/webhooks/1/t"
"#,
        );
        assert!(matches!(
            Config::load(&path),
            Err(ConfigError::InvalidSubscription { .. })
        ));
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn test_unknown_parser_rejected() {
        let path = write_config(
            "herald_config_test_parser",
            r#"
[[subscriptions]]
name = "albion"
feed_url = "https://a.example.com/rss"
webhook_url = "https://discord.com/api/webhooks/1/t"
parser = "does-not-exist"
"#,
        );
        assert!(matches!(
            Config::load(&path),
            Err(ConfigError::InvalidSubscription { .. })
        ));
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn test_debug_masks_webhook_url() {
        let sub = SubscriptionConfig {
            name: "albion".to_string(),
            feed_url: "https://a.example.com/rss".to_string(),
            webhook_url: "https://discord.com/api/webhooks/1/super-secret".to_string(),
            parser: "syndication".to_string(),
        };
        let debug_output = format!("{:?}", sub);
        assert!(!debug_output.contains("super-secret"));
        assert!(debug_output.contains("[REDACTED]"));
    }

    #[test]
    fn test_invalid_toml_returns_error() {
        let path = write_config("herald_config_test_invalid", "this is not [valid toml");
        assert!(matches!(Config::load(&path), Err(ConfigError::Parse(_))));
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn test_too_large_file_rejected() {
        let path = write_config("herald_config_test_too_large", &"a".repeat(1_048_577));
        assert!(matches!(Config::load(&path), Err(ConfigError::TooLarge(_))));
        std::fs::remove_file(&path).ok();
    }
}
