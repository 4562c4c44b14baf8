use sqlx::SqliteConnection;

use super::schema::Database;
use super::types::{DatabaseError, Feed, FeedMeta, FeedRow, FeedStatus};

const FEED_COLUMNS: &str = "id, url, title, title_manually_edited, site_url, status, error_count, \
     last_error, last_fetched, etag, last_modified, category, tags";

impl Database {
    // ========================================================================
    // Feed Operations
    // ========================================================================

    /// Subscribe to a feed, returning its ID.
    ///
    /// Re-subscribing an existing URL updates its category and tags and keeps
    /// the same ID.
    pub async fn insert_feed(
        &self,
        url: &str,
        title: &str,
        category: Option<&str>,
        tags: &[String],
    ) -> Result<i64, DatabaseError> {
        let tags_json = serde_json::to_string(tags)
            .map_err(|e| DatabaseError::Invalid(format!("tags: {e}")))?;

        let row: (i64,) = sqlx::query_as(
            r#"
            INSERT INTO feeds (url, title, category, tags)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(url) DO UPDATE SET
                category = excluded.category,
                tags = excluded.tags
            RETURNING id
        "#,
        )
        .bind(url)
        .bind(title)
        .bind(category)
        .bind(&tags_json)
        .fetch_one(&self.pool)
        .await?;

        Ok(row.0)
    }

    /// Get a single feed by ID.
    pub async fn get_feed(&self, feed_id: i64) -> Result<Option<Feed>, DatabaseError> {
        let row = sqlx::query_as::<_, FeedRow>(&format!(
            "SELECT {FEED_COLUMNS} FROM feeds WHERE id = ?"
        ))
        .bind(feed_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(FeedRow::into_feed))
    }

    /// Get every subscribed feed, including disabled ones.
    pub async fn list_feeds(&self) -> Result<Vec<Feed>, DatabaseError> {
        let rows = sqlx::query_as::<_, FeedRow>(&format!(
            "SELECT {FEED_COLUMNS} FROM feeds ORDER BY id"
        ))
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(FeedRow::into_feed).collect())
    }

    /// Set a feed's status directly (e.g. disable or re-enable it).
    pub async fn set_feed_status(
        &self,
        feed_id: i64,
        status: FeedStatus,
    ) -> Result<(), DatabaseError> {
        let result = sqlx::query("UPDATE feeds SET status = ? WHERE id = ?")
            .bind(status.as_str())
            .bind(feed_id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(DatabaseError::NotFound(format!("feed {feed_id}")));
        }
        Ok(())
    }

    /// Rename a feed by hand. Fetched titles will no longer overwrite it.
    pub async fn set_feed_title_manually(
        &self,
        feed_id: i64,
        title: &str,
    ) -> Result<(), DatabaseError> {
        let result =
            sqlx::query("UPDATE feeds SET title = ?, title_manually_edited = 1 WHERE id = ?")
                .bind(title)
                .bind(feed_id)
                .execute(&self.pool)
                .await?;
        if result.rows_affected() == 0 {
            return Err(DatabaseError::NotFound(format!("feed {feed_id}")));
        }
        Ok(())
    }

    /// Record the outcome of a fetch cycle on the feed row.
    pub async fn update_feed_meta(&self, meta: &FeedMeta) -> Result<(), DatabaseError> {
        let mut conn = self.pool.acquire().await?;
        write_feed_meta(&mut conn, meta).await
    }
}

/// Write feed metadata on an existing connection or transaction.
///
/// - `title` is ignored when the feed's title was edited by hand
/// - `None` validators and site URL keep the stored values
/// - `error` status increments `error_count`; `active` resets it
pub(crate) async fn write_feed_meta(
    conn: &mut SqliteConnection,
    meta: &FeedMeta,
) -> Result<(), DatabaseError> {
    let now = chrono::Utc::now().timestamp();
    let (etag, last_modified) = match &meta.validators {
        Some(v) => (v.etag.as_deref(), v.last_modified.as_deref()),
        None => (None, None),
    };

    let result = sqlx::query(
        r#"
        UPDATE feeds SET
            title = CASE
                WHEN ?1 IS NOT NULL AND title_manually_edited = 0 THEN ?1
                ELSE title
            END,
            site_url = COALESCE(?2, site_url),
            etag = COALESCE(?3, etag),
            last_modified = COALESCE(?4, last_modified),
            status = ?5,
            error_count = CASE ?5
                WHEN 'error' THEN error_count + 1
                WHEN 'active' THEN 0
                ELSE error_count
            END,
            last_error = ?6,
            last_fetched = ?7
        WHERE id = ?8
    "#,
    )
    .bind(meta.title.as_deref())
    .bind(meta.site_url.as_deref())
    .bind(etag)
    .bind(last_modified)
    .bind(meta.status.as_str())
    .bind(meta.error.as_deref())
    .bind(now)
    .bind(meta.feed_id)
    .execute(&mut *conn)
    .await?;

    if result.rows_affected() == 0 {
        return Err(DatabaseError::NotFound(format!("feed {}", meta.feed_id)));
    }
    Ok(())
}
