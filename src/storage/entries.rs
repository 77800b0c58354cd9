use sqlx::QueryBuilder;

use super::schema::Cache;
use super::types::{CacheError, Entry, EntryDbRow};

/// URIs per `IN (...)` query, well under SQLite's bind-parameter limit.
const URI_CHUNK_SIZE: usize = 500;

impl Cache {
    // ========================================================================
    // Entry Queries
    // ========================================================================

    /// Every cached entry across every record, orphaned feeds included.
    ///
    /// Ordered by `(feed_uri, entry_id)`; callers that need timeline order
    /// sort themselves.
    pub async fn all_entries(&self) -> Result<Vec<Entry>, CacheError> {
        let rows = sqlx::query_as::<_, EntryDbRow>(
            r#"
            SELECT feed_uri, entry_id, title, link, author, content, published_at, updated_at
            FROM entries
            ORDER BY feed_uri, entry_id
        "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(EntryDbRow::into_entry).collect())
    }

    /// Cached entries belonging to the given feeds, ordered by `(feed_uri, entry_id)`.
    pub async fn entries_for(&self, feed_uris: &[&str]) -> Result<Vec<Entry>, CacheError> {
        if feed_uris.is_empty() {
            return Ok(Vec::new());
        }

        let mut result = Vec::new();

        for chunk in feed_uris.chunks(URI_CHUNK_SIZE) {
            let mut builder: QueryBuilder<sqlx::Sqlite> = QueryBuilder::new(
                "SELECT feed_uri, entry_id, title, link, author, content, published_at, updated_at \
                 FROM entries WHERE feed_uri IN (",
            );

            let mut separated = builder.separated(", ");
            for uri in chunk {
                separated.push_bind(*uri);
            }
            separated.push_unseparated(")");

            let rows: Vec<EntryDbRow> = builder.build_query_as().fetch_all(&self.pool).await?;
            result.extend(rows.into_iter().map(EntryDbRow::into_entry));
        }

        result.sort_by(|a, b| {
            a.feed_uri
                .cmp(&b.feed_uri)
                .then_with(|| a.entry_id.cmp(&b.entry_id))
        });
        Ok(result)
    }

    /// Number of cached entries for one feed.
    pub async fn entry_count(&self, feed_uri: &str) -> Result<usize, CacheError> {
        let row: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM entries WHERE feed_uri = ?")
            .bind(feed_uri)
            .fetch_one(&self.pool)
            .await?;

        Ok(usize::try_from(row.0).unwrap_or(0))
    }
}
