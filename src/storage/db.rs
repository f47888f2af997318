use sqlx::sqlite::SqlitePoolOptions;
use sqlx::SqlitePool;
use thiserror::Error;

use crate::entry::Entry;
use crate::feed::ChangeState;

/// Errors produced by the keyed record store.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Database error: {0}")]
    Sqlx(#[from] sqlx::Error),
    /// Subscription name sanitized down to nothing — unusable as a
    /// partition identifier.
    #[error("Subscription name {0:?} contains no alphanumeric characters")]
    EmptyPartition(String),
}

/// Process-wide keyed record store backed by SQLite.
///
/// Two record shapes live here, both addressed by subscription name:
///
/// - **Dedup partitions** — one table per subscription holding the URLs of
///   previously delivered entries. Presence means "already delivered, do
///   not re-deliver". Partition names are sanitized to alphanumerics and
///   auto-created on first use.
/// - **Change state** — one row per subscription with the cache-validation
///   tags and last seen build timestamp, read at cycle start and written
///   on detected change.
///
/// Concurrent subscriptions never touch each other's partitions, so the
/// pool needs no cross-subscription locking.
#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Open (creating if necessary) the store and run migrations.
    ///
    /// `":memory:"` opens a transient in-memory store; the pool is pinned
    /// to one connection there, since each SQLite memory connection is its
    /// own database.
    pub async fn open(path: &str) -> Result<Self, StorageError> {
        let url = format!("sqlite:{}?mode=rwc", path);
        let max_connections = if path == ":memory:" { 1 } else { 5 };
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect(&url)
            .await?;
        let db = Self { pool };
        db.migrate().await?;
        Ok(db)
    }

    async fn migrate(&self) -> Result<(), StorageError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS change_state (
                subscription TEXT PRIMARY KEY,
                etag TEXT NOT NULL,
                last_modified TEXT NOT NULL,
                last_build TEXT NOT NULL
            )
        "#,
        )
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Reduce a subscription name to a safe partition identifier.
    ///
    /// Only alphanumeric characters survive: `'); drop table --'` becomes
    /// `droptable`. Partition names are interpolated into DDL/DML, so this
    /// is the injection boundary.
    pub fn sanitize_partition(name: &str) -> String {
        name.chars().filter(|c| c.is_alphanumeric()).collect()
    }

    /// Sanitized partition name for `subscription`, with the backing table
    /// created on first use.
    ///
    /// The identifier is always double-quoted at the interpolation sites:
    /// a sanitized name may be digit-leading (`24news`) or a SQL keyword
    /// (`table`), neither of which is a legal bare identifier.
    async fn partition(&self, subscription: &str) -> Result<String, StorageError> {
        let table = Self::sanitize_partition(subscription);
        if table.is_empty() {
            return Err(StorageError::EmptyPartition(subscription.to_string()));
        }
        sqlx::query(&format!(
            "CREATE TABLE IF NOT EXISTS \"{}\" (url TEXT NOT NULL PRIMARY KEY, title TEXT, date TEXT, time TEXT)",
            table
        ))
        .execute(&self.pool)
        .await?;
        Ok(table)
    }

    // ========================================================================
    // Dedup partition
    // ========================================================================

    /// Has an entry with this URL already been delivered for `subscription`?
    pub async fn exists(&self, subscription: &str, url: &str) -> Result<bool, StorageError> {
        let table = self.partition(subscription).await?;
        let row: Option<(String,)> =
            sqlx::query_as(&format!("SELECT url FROM \"{}\" WHERE url = ?", table))
                .bind(url)
                .fetch_optional(&self.pool)
                .await?;
        Ok(row.is_some())
    }

    /// Record entries as delivered. Idempotent: a URL already present in
    /// the partition is left untouched, never duplicated.
    pub async fn record_delivered(
        &self,
        subscription: &str,
        entries: &[Entry],
    ) -> Result<(), StorageError> {
        if entries.is_empty() {
            return Ok(());
        }
        let table = self.partition(subscription).await?;
        let now = chrono::Utc::now();
        let date = now.format("%Y-%m-%d").to_string();
        let time = now.format("%H:%M:%S").to_string();

        for entry in entries {
            sqlx::query(&format!(
                "INSERT OR IGNORE INTO \"{}\" (url, title, date, time) VALUES (?, ?, ?, ?)",
                table
            ))
            .bind(&entry.url)
            .bind(&entry.title)
            .bind(&date)
            .bind(&time)
            .execute(&self.pool)
            .await?;
        }
        Ok(())
    }

    /// Number of delivered records in a subscription's partition.
    pub async fn delivered_count(&self, subscription: &str) -> Result<i64, StorageError> {
        let table = self.partition(subscription).await?;
        let (count,): (i64,) = sqlx::query_as(&format!("SELECT COUNT(*) FROM \"{}\"", table))
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    // ========================================================================
    // Change state
    // ========================================================================

    /// Fetch the persisted change state for a subscription, seeding the
    /// never-fetched sentinel on first access.
    pub async fn change_state(&self, subscription: &str) -> Result<ChangeState, StorageError> {
        let row: Option<(String, String, String)> = sqlx::query_as(
            "SELECT etag, last_modified, last_build FROM change_state WHERE subscription = ?",
        )
        .bind(subscription)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some((etag, last_modified, last_build)) => Ok(ChangeState {
                etag,
                last_modified,
                last_build,
            }),
            None => {
                let state = ChangeState::never_fetched();
                self.store_change_state(subscription, &state).await?;
                Ok(state)
            }
        }
    }

    /// Persist fresh change state for a subscription.
    pub async fn store_change_state(
        &self,
        subscription: &str,
        state: &ChangeState,
    ) -> Result<(), StorageError> {
        sqlx::query(
            r#"
            INSERT INTO change_state (subscription, etag, last_modified, last_build)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(subscription) DO UPDATE SET
                etag = excluded.etag,
                last_modified = excluded.last_modified,
                last_build = excluded.last_build
        "#,
        )
        .bind(subscription)
        .bind(&state.etag)
        .bind(&state.last_modified)
        .bind(&state.last_build)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feed::HEADER_SENTINEL;

    fn test_entry(url: &str) -> Entry {
        Entry {
            title: "A post".to_string(),
            url: url.to_string(),
            description: String::new(),
            published: String::new(),
            author: String::new(),
            image: None,
        }
    }

    async fn test_db() -> Database {
        Database::open(":memory:").await.unwrap()
    }

    #[test]
    fn test_sanitize_partition() {
        assert_eq!(Database::sanitize_partition("'); drop table --'"), "droptable");
        assert_eq!(Database::sanitize_partition("albion"), "albion");
        assert_eq!(Database::sanitize_partition("dev-blog 2"), "devblog2");
        assert_eq!(Database::sanitize_partition("--;'"), "");
    }

    #[tokio::test]
    async fn test_record_and_exists() {
        let db = test_db().await;
        assert!(!db.exists("albion", "https://example.com/1").await.unwrap());

        db.record_delivered("albion", &[test_entry("https://example.com/1")])
            .await
            .unwrap();
        assert!(db.exists("albion", "https://example.com/1").await.unwrap());
        assert!(!db.exists("albion", "https://example.com/2").await.unwrap());
    }

    #[tokio::test]
    async fn test_record_is_idempotent() {
        let db = test_db().await;
        let entry = test_entry("https://example.com/1");
        db.record_delivered("albion", &[entry.clone()]).await.unwrap();
        db.record_delivered("albion", &[entry]).await.unwrap();
        assert_eq!(db.delivered_count("albion").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_partitions_are_isolated() {
        let db = test_db().await;
        db.record_delivered("albion", &[test_entry("https://example.com/1")])
            .await
            .unwrap();
        assert!(!db.exists("cm", "https://example.com/1").await.unwrap());
    }

    #[tokio::test]
    async fn test_hostile_subscription_name_is_usable() {
        let db = test_db().await;
        let name = "'); drop table --'";
        db.record_delivered(name, &[test_entry("https://example.com/1")])
            .await
            .unwrap();
        assert!(db.exists(name, "https://example.com/1").await.unwrap());
        assert_eq!(db.delivered_count(name).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_digit_leading_name_is_usable() {
        let db = test_db().await;
        db.record_delivered("24news", &[test_entry("https://example.com/1")])
            .await
            .unwrap();
        assert!(db.exists("24news", "https://example.com/1").await.unwrap());
        assert!(!db.exists("24news", "https://example.com/2").await.unwrap());
        assert_eq!(db.delivered_count("24news").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_sql_keyword_name_is_usable() {
        let db = test_db().await;
        db.record_delivered("table", &[test_entry("https://example.com/1")])
            .await
            .unwrap();
        assert!(db.exists("table", "https://example.com/1").await.unwrap());
    }

    #[tokio::test]
    async fn test_all_symbol_name_is_rejected() {
        let db = test_db().await;
        let err = db.exists("--;'", "https://example.com/1").await.unwrap_err();
        assert!(matches!(err, StorageError::EmptyPartition(_)));
    }

    #[tokio::test]
    async fn test_change_state_seeds_sentinel() {
        let db = test_db().await;
        let state = db.change_state("albion").await.unwrap();
        assert_eq!(state.etag, HEADER_SENTINEL);
        assert_eq!(state.last_modified, HEADER_SENTINEL);
        assert_eq!(state.last_build, "Thu, 1 Jan 1970 00:00:00");
    }

    #[tokio::test]
    async fn test_change_state_roundtrip() {
        let db = test_db().await;
        db.change_state("albion").await.unwrap();

        let fresh = ChangeState {
            etag: "\"v2\"".to_string(),
            last_modified: "Tue, 03 Jun 2025 10:00:00 GMT".to_string(),
            last_build: "Tue, 03 Jun 2025 10:00:00".to_string(),
        };
        db.store_change_state("albion", &fresh).await.unwrap();
        assert_eq!(db.change_state("albion").await.unwrap(), fresh);
    }
}
