use sqlx::{QueryBuilder, SqliteConnection};
use std::collections::HashMap;

use super::feeds::write_feed_meta;
use super::schema::Database;
use super::types::{CommitReport, DatabaseError, Entry, FeedMeta, NewEntry};

/// 8 columns * 50 rows keeps us well under SQLite's 999 parameter limit.
const BATCH_SIZE: usize = 50;

impl Database {
    // ========================================================================
    // Entry Operations
    // ========================================================================

    /// Maximum `published_at` already stored for a feed.
    pub async fn get_entry_watermark(&self, feed_id: i64) -> Result<Option<i64>, DatabaseError> {
        let row: (Option<i64>,) =
            sqlx::query_as("SELECT MAX(published_at) FROM entries WHERE feed_id = ?")
                .bind(feed_id)
                .fetch_one(&self.pool)
                .await?;
        Ok(row.0)
    }

    /// Stored `published_at` for each of `urls` that already has a row.
    pub async fn get_entry_dates(
        &self,
        urls: &[String],
    ) -> Result<HashMap<String, i64>, DatabaseError> {
        let mut dates = HashMap::with_capacity(urls.len());
        for chunk in urls.chunks(BATCH_SIZE) {
            let mut builder: QueryBuilder<sqlx::Sqlite> =
                QueryBuilder::new("SELECT url, published_at FROM entries WHERE url IN (");
            let mut separated = builder.separated(", ");
            for url in chunk {
                separated.push_bind(url);
            }
            separated.push_unseparated(")");

            let rows: Vec<(String, i64)> = builder.build_query_as().fetch_all(&self.pool).await?;
            dates.extend(rows);
        }
        Ok(dates)
    }

    /// Upsert entries for a feed in one transaction, returning rows written.
    pub async fn upsert_entries(
        &self,
        feed_id: i64,
        entries: &[NewEntry],
    ) -> Result<u64, DatabaseError> {
        if entries.is_empty() {
            return Ok(0);
        }
        let mut tx = self.pool.begin().await?;
        let written = write_entries(&mut tx, feed_id, entries).await?;
        tx.commit().await?;
        Ok(written)
    }

    /// Delete all but the `keep` most recent entries of a feed.
    pub async fn trim_entries(&self, feed_id: i64, keep: i64) -> Result<u64, DatabaseError> {
        let mut conn = self.pool.acquire().await?;
        trim_feed_entries(&mut conn, feed_id, keep).await
    }

    /// Complete a feed update atomically: metadata, entry upsert, retention trim.
    ///
    /// If any step fails the transaction is rolled back (on drop), leaving the
    /// feed exactly as it was before the cycle.
    pub async fn commit_feed_update(
        &self,
        meta: &FeedMeta,
        entries: &[NewEntry],
        keep: i64,
    ) -> Result<CommitReport, DatabaseError> {
        let mut tx = self.pool.begin().await?;

        write_feed_meta(&mut tx, meta).await?;
        let written = write_entries(&mut tx, meta.feed_id, entries).await?;
        let trimmed = trim_feed_entries(&mut tx, meta.feed_id, keep).await?;

        tx.commit().await?;

        Ok(CommitReport { written, trimmed })
    }

    /// Get a feed's entries, newest first.
    pub async fn get_entries_for_feed(&self, feed_id: i64) -> Result<Vec<Entry>, DatabaseError> {
        let entries = sqlx::query_as::<_, Entry>(
            r#"
            SELECT id, feed_id, title, url, content, guid, published_at, favicon_url
            FROM entries
            WHERE feed_id = ?
            ORDER BY published_at DESC, id DESC
        "#,
        )
        .bind(feed_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(entries)
    }
}

/// Insert entries; on URL collision update the row only if the incoming
/// `published_at` is strictly newer.
async fn write_entries(
    conn: &mut SqliteConnection,
    feed_id: i64,
    entries: &[NewEntry],
) -> Result<u64, DatabaseError> {
    let now = chrono::Utc::now().timestamp();
    let mut written = 0;

    for chunk in entries.chunks(BATCH_SIZE) {
        let mut builder: QueryBuilder<sqlx::Sqlite> = QueryBuilder::new(
            "INSERT INTO entries (feed_id, title, url, content, guid, published_at, favicon_url, created_at) ",
        );

        builder.push_values(chunk, |mut b, entry| {
            b.push_bind(feed_id)
                .push_bind(&entry.title)
                .push_bind(&entry.url)
                .push_bind(&entry.content)
                .push_bind(&entry.guid)
                .push_bind(entry.published_at)
                .push_bind(&entry.favicon_url)
                .push_bind(now);
        });

        builder.push(
            " ON CONFLICT(url) DO UPDATE SET \
             title = excluded.title, \
             content = excluded.content, \
             guid = excluded.guid, \
             published_at = excluded.published_at, \
             favicon_url = COALESCE(excluded.favicon_url, entries.favicon_url) \
             WHERE excluded.published_at > entries.published_at",
        );

        let result = builder.build().execute(&mut *conn).await?;
        written += result.rows_affected();
    }

    Ok(written)
}

async fn trim_feed_entries(
    conn: &mut SqliteConnection,
    feed_id: i64,
    keep: i64,
) -> Result<u64, DatabaseError> {
    if keep < 0 {
        return Err(DatabaseError::Invalid(format!(
            "retention count must not be negative (got {keep})"
        )));
    }

    let result = sqlx::query(
        r#"
        DELETE FROM entries
        WHERE feed_id = ?1
          AND id NOT IN (
              SELECT id FROM entries
              WHERE feed_id = ?1
              ORDER BY published_at DESC, id DESC
              LIMIT ?2
          )
    "#,
    )
    .bind(feed_id)
    .bind(keep)
    .execute(&mut *conn)
    .await?;

    Ok(result.rows_affected())
}
