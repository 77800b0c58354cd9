use anyhow::Result;
use sqlx::{
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
    SqlitePool,
};
use std::str::FromStr;
use std::time::Duration;

use super::types::{is_lock_message, CacheError};

// ============================================================================
// Cache
// ============================================================================

/// Disk-backed feed cache.
///
/// Cloning is cheap and shares the underlying connection pool, so each
/// aggregation worker can hold its own handle.
#[derive(Clone)]
pub struct Cache {
    pub(crate) pool: SqlitePool,
}

impl Cache {
    /// Open (or create) the cache database and run migrations.
    ///
    /// `":memory:"` opens a private in-memory cache, used by tests.
    ///
    /// # Errors
    ///
    /// Returns `CacheError::InstanceLocked` if another run holds the
    /// database (SQLITE_BUSY, SQLITE_LOCKED, SQLITE_CANTOPEN).
    /// Returns `CacheError::Other` for other database errors.
    pub async fn open(path: &str) -> Result<Self, CacheError> {
        let in_memory = path == ":memory:";
        let url = format!("sqlite:{}?mode=rwc", path);

        // Create the file with owner-only permissions before SQLite touches it
        #[cfg(unix)]
        if !in_memory {
            use std::os::unix::fs::PermissionsExt;
            let db_path = std::path::Path::new(path);
            if db_path.exists() {
                let perms = std::fs::Permissions::from_mode(0o600);
                if let Err(e) = std::fs::set_permissions(path, perms) {
                    tracing::warn!(path = %path, error = %e, "Failed to set cache file permissions");
                }
            } else if let Some(parent) = db_path.parent() {
                if parent.exists() {
                    use std::os::unix::fs::OpenOptionsExt;
                    let _file = std::fs::OpenOptions::new()
                        .write(true)
                        .create_new(true)
                        .mode(0o600)
                        .open(db_path)
                        .ok(); // If creation fails, SQLite will report the error at connect_with.
                }
            }
        }

        // busy_timeout=5000: a writer waits up to 5 seconds for another
        // worker's per-feed transaction to commit.
        let options = SqliteConnectOptions::from_str(&url)
            .map_err(CacheError::from_sqlx)?
            .pragma("busy_timeout", "5000");

        // Shared-cache in-memory databases report SQLITE_LOCKED instead of
        // waiting on busy_timeout, so they get a single connection.
        let max_connections = if in_memory { 1 } else { 5 };
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(Duration::from_secs(10))
            .connect_with(options)
            .await
            .map_err(CacheError::from_sqlx)?;
        let cache = Self { pool };
        cache.migrate().await.map_err(|e| {
            if is_lock_message(&e.to_string()) {
                CacheError::InstanceLocked
            } else {
                CacheError::Migration(e.to_string())
            }
        })?;
        Ok(cache)
    }

    /// Close the pool, flushing connections. Used before reopening in tests.
    pub async fn close(&self) {
        self.pool.close().await;
    }

    /// Run schema migrations atomically within a transaction.
    ///
    /// All statements use `IF NOT EXISTS`, so re-running on an existing
    /// cache is a no-op.
    async fn migrate(&self) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        // One row per feed URI ever fetched; rows are never pruned
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS feeds (
                uri TEXT PRIMARY KEY NOT NULL,
                title TEXT,
                site_link TEXT,
                last_fetch_attempt INTEGER,
                last_fetch_success INTEGER,
                last_error TEXT,
                etag TEXT,
                last_modified TEXT
            )
        "#,
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS entries (
                feed_uri TEXT NOT NULL REFERENCES feeds(uri),
                entry_id TEXT NOT NULL,
                title TEXT NOT NULL,
                link TEXT,
                author TEXT,
                content TEXT,
                published_at INTEGER,
                updated_at INTEGER,
                PRIMARY KEY (feed_uri, entry_id)
            )
        "#,
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_entries_published ON entries(published_at DESC)",
        )
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_open_in_memory() {
        let cache = Cache::open(":memory:").await.unwrap();
        let statuses = cache.statuses().await.unwrap();
        assert!(statuses.is_empty());
    }

    #[tokio::test]
    async fn test_migrate_is_idempotent() {
        let cache = Cache::open(":memory:").await.unwrap();
        cache.migrate().await.unwrap();
        cache.migrate().await.unwrap();
    }

    #[tokio::test]
    async fn test_open_file_in_missing_directory_fails() {
        let result = Cache::open("/nonexistent-planet-dir/sub/planet.db").await;
        assert!(result.is_err());
    }

    #[test]
    fn test_lock_messages_detected() {
        assert!(is_lock_message("error returned from database: database is locked"));
        assert!(is_lock_message("SQLITE_BUSY"));
        assert!(!is_lock_message("no such table: feeds"));
    }
}
