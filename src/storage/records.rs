use chrono::Utc;
use sqlx::QueryBuilder;
use std::collections::BTreeMap;

use super::schema::Cache;
use super::types::{CacheError, CacheRecord, Entry, FeedDbRow, FeedStatus, FetchOutcome, Validator};

/// Rows per multi-row upsert. 8 columns * 50 = 400 binds, under SQLite's 999 limit.
const BATCH_SIZE: usize = 50;

const STATUS_SELECT: &str = r#"
    SELECT f.uri, f.title, f.site_link, f.last_fetch_attempt, f.last_fetch_success,
           f.last_error, f.etag, f.last_modified,
           (SELECT COUNT(*) FROM entries e WHERE e.feed_uri = f.uri) AS entry_count
    FROM feeds f
"#;

impl Cache {
    // ========================================================================
    // Record Reads
    // ========================================================================

    /// Full snapshot of one feed's record, or `None` for a never-fetched URI.
    pub async fn get(&self, feed_uri: &str) -> Result<Option<CacheRecord>, CacheError> {
        let Some(status) = self.status(feed_uri).await? else {
            return Ok(None);
        };

        let entries: BTreeMap<String, Entry> = self
            .entries_for(&[feed_uri])
            .await?
            .into_iter()
            .map(|e| (e.entry_id.clone(), e))
            .collect();

        Ok(Some(CacheRecord {
            feed_uri: status.feed_uri,
            title: status.title,
            site_link: status.site_link,
            entries,
            last_fetch_attempt: status.last_fetch_attempt,
            last_fetch_success: status.last_fetch_success,
            last_error: status.last_error,
            validator: status.validator,
        }))
    }

    /// Fetch bookkeeping for one feed without loading its entries.
    pub async fn status(&self, feed_uri: &str) -> Result<Option<FeedStatus>, CacheError> {
        let sql = format!("{STATUS_SELECT} WHERE f.uri = ?");
        let row = sqlx::query_as::<_, FeedDbRow>(&sql)
            .bind(feed_uri)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.map(FeedDbRow::into_status))
    }

    /// Status of every feed in the cache, orphans included, ordered by URI.
    pub async fn statuses(&self) -> Result<Vec<FeedStatus>, CacheError> {
        let sql = format!("{STATUS_SELECT} ORDER BY f.uri");
        let rows = sqlx::query_as::<_, FeedDbRow>(&sql)
            .fetch_all(&self.pool)
            .await?;

        Ok(rows.into_iter().map(FeedDbRow::into_status).collect())
    }

    /// Stored conditional-fetch token for a feed (empty if never fetched).
    pub async fn validator(&self, feed_uri: &str) -> Result<Validator, CacheError> {
        let row: Option<(Option<String>, Option<String>)> =
            sqlx::query_as("SELECT etag, last_modified FROM feeds WHERE uri = ?")
                .bind(feed_uri)
                .fetch_optional(&self.pool)
                .await?;

        Ok(row
            .map(|(etag, last_modified)| Validator {
                etag,
                last_modified,
            })
            .unwrap_or_default())
    }

    // ========================================================================
    // Record Updates
    // ========================================================================

    /// Apply one fetch cycle's outcome to a feed's record.
    ///
    /// - `Fetched`: upserts entries by id (never removes one), stamps
    ///   attempt and success, clears the error, stores the new validator.
    /// - `NotModified`: stamps attempt and success only.
    /// - `Failed`: stores the error and stamps the attempt; entries, the
    ///   validator and `last_fetch_success` stay as they were.
    ///
    /// The whole update is one transaction: after a crash the record is
    /// either fully old or fully new.
    pub async fn update(&self, feed_uri: &str, outcome: FetchOutcome) -> Result<(), CacheError> {
        let now = Utc::now().timestamp();
        let mut tx = self.pool.begin().await?;

        sqlx::query("INSERT INTO feeds (uri) VALUES (?) ON CONFLICT(uri) DO NOTHING")
            .bind(feed_uri)
            .execute(&mut *tx)
            .await?;

        match outcome {
            FetchOutcome::Fetched { feed, validator } => {
                sqlx::query(
                    r#"
                    UPDATE feeds
                    SET title = ?, site_link = ?, last_fetch_attempt = ?,
                        last_fetch_success = ?, last_error = NULL,
                        etag = ?, last_modified = ?
                    WHERE uri = ?
                "#,
                )
                .bind(&feed.title)
                .bind(&feed.link)
                .bind(now)
                .bind(now)
                .bind(&validator.etag)
                .bind(&validator.last_modified)
                .bind(feed_uri)
                .execute(&mut *tx)
                .await?;

                let entries: Vec<Entry> = feed
                    .entries
                    .into_iter()
                    .map(|parsed| Entry::from_parsed(feed_uri, parsed))
                    .collect();

                for chunk in entries.chunks(BATCH_SIZE) {
                    let mut builder: QueryBuilder<sqlx::Sqlite> = QueryBuilder::new(
                        "INSERT INTO entries (feed_uri, entry_id, title, link, author, content, published_at, updated_at) ",
                    );

                    builder.push_values(chunk, |mut b, entry| {
                        b.push_bind(&entry.feed_uri)
                            .push_bind(&entry.entry_id)
                            .push_bind(&entry.title)
                            .push_bind(&entry.link)
                            .push_bind(&entry.author)
                            .push_bind(&entry.content)
                            .push_bind(entry.published_at.map(|t| t.timestamp()))
                            .push_bind(entry.updated_at.map(|t| t.timestamp()));
                    });

                    // Replacement overwrites every field, including ones that became empty
                    builder.push(
                        " ON CONFLICT(feed_uri, entry_id) DO UPDATE SET \
                         title = excluded.title, link = excluded.link, \
                         author = excluded.author, content = excluded.content, \
                         published_at = excluded.published_at, updated_at = excluded.updated_at",
                    );

                    builder.build().execute(&mut *tx).await?;
                }
            }
            FetchOutcome::NotModified => {
                sqlx::query(
                    "UPDATE feeds SET last_fetch_attempt = ?, last_fetch_success = ? WHERE uri = ?",
                )
                .bind(now)
                .bind(now)
                .bind(feed_uri)
                .execute(&mut *tx)
                .await?;
            }
            FetchOutcome::Failed(detail) => {
                sqlx::query("UPDATE feeds SET last_fetch_attempt = ?, last_error = ? WHERE uri = ?")
                    .bind(now)
                    .bind(&detail)
                    .bind(feed_uri)
                    .execute(&mut *tx)
                    .await?;
            }
        }

        tx.commit().await?;
        Ok(())
    }
}
