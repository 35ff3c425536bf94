use sqlx::QueryBuilder;

use super::schema::Database;
use super::types::{FeedStatus, LedgerError, SentRecord};

impl Database {
    // ========================================================================
    // Sent-Item Operations
    // ========================================================================

    /// Check whether an entry has already been delivered for this feed.
    ///
    /// Pure lookup; safe to call repeatedly with no side effect.
    pub async fn has_sent(&self, feed_url: &str, entry_id: &str) -> Result<bool, LedgerError> {
        let row: Option<(i64,)> =
            sqlx::query_as("SELECT 1 FROM sent_items WHERE feed_url = ? AND entry_id = ?")
                .bind(feed_url)
                .bind(entry_id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(row.is_some())
    }

    /// Record an entry as sent.
    ///
    /// Idempotent: a second call for the same `(feed_url, entry_id)` pair is
    /// a no-op that preserves the original `sent_at`, because a delivery may
    /// partially fail and be retried. Returns whether a new row was written.
    pub async fn mark_sent(
        &self,
        feed_url: &str,
        entry_id: &str,
        sent_at: i64,
    ) -> Result<bool, LedgerError> {
        let result = sqlx::query(
            "INSERT OR IGNORE INTO sent_items (feed_url, entry_id, sent_at) VALUES (?, ?, ?)",
        )
        .bind(feed_url)
        .bind(entry_id)
        .bind(sent_at)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    // ========================================================================
    // Feed Registry Operations
    // ========================================================================

    /// Whether this feed's initial backlog has already been seeded.
    ///
    /// Distinct from "has a registry row": a feed whose first fetch failed is
    /// registered (for status tracking) but not bootstrapped, so the backlog
    /// seeding still happens on the first successful fetch.
    pub async fn is_bootstrapped(&self, feed_url: &str) -> Result<bool, LedgerError> {
        let row: Option<(Option<i64>,)> =
            sqlx::query_as("SELECT bootstrapped_at FROM feeds WHERE url = ?")
                .bind(feed_url)
                .fetch_optional(&self.pool)
                .await?;
        Ok(matches!(row, Some((Some(_),))))
    }

    /// First encounter of a feed: seed every currently-present entry id as
    /// already sent, without delivering, and mark the feed bootstrapped.
    ///
    /// Runs in a single transaction so a crash mid-seed cannot leave the feed
    /// half-seeded (which would flood the channel with the rest of the
    /// backlog on the next pass). Returns the number of ids seeded.
    ///
    /// PERF-001: Batch INSERT in chunks of 100 so a large backlog seeds in a
    /// handful of statements instead of one round-trip per entry.
    pub async fn bootstrap_feed(
        &self,
        feed_url: &str,
        entry_ids: &[String],
        seeded_at: i64,
    ) -> Result<usize, LedgerError> {
        const BATCH_SIZE: usize = 100;
        let mut tx = self.pool.begin().await?;

        // first_seen_at survives if the feed was registered by an earlier
        // failed check; bootstrapped_at is what flips the feed to "known".
        sqlx::query(
            r#"
            INSERT INTO feeds (url, first_seen_at, bootstrapped_at, last_checked_at)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(url) DO UPDATE SET
                bootstrapped_at = excluded.bootstrapped_at,
                last_checked_at = excluded.last_checked_at,
                last_error = NULL
            "#,
        )
        .bind(feed_url)
        .bind(seeded_at)
        .bind(seeded_at)
        .bind(seeded_at)
        .execute(&mut *tx)
        .await?;

        let mut seeded: usize = 0;
        for chunk in entry_ids.chunks(BATCH_SIZE) {
            let mut builder: QueryBuilder<sqlx::Sqlite> =
                QueryBuilder::new("INSERT OR IGNORE INTO sent_items (feed_url, entry_id, sent_at) ");

            builder.push_values(chunk, |mut b, entry_id| {
                b.push_bind(feed_url)
                    .push_bind(entry_id)
                    .push_bind(seeded_at);
            });

            builder.build().execute(&mut *tx).await?;

            // changes() counts only newly inserted rows, not ignored ones
            let changes: (i64,) = sqlx::query_as("SELECT changes()")
                .fetch_one(&mut *tx)
                .await?;
            seeded += changes.0 as usize;
        }

        tx.commit().await?;
        Ok(seeded)
    }

    /// Record the outcome of a reconciliation attempt for a feed.
    ///
    /// Upserts the registry row: a feed that fails its very first fetch still
    /// gets a row (with `last_error` set) so operators can see it, without
    /// being marked bootstrapped.
    pub async fn record_check(
        &self,
        feed_url: &str,
        checked_at: i64,
        error: Option<&str>,
    ) -> Result<(), LedgerError> {
        sqlx::query(
            r#"
            INSERT INTO feeds (url, first_seen_at, last_checked_at, last_error)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(url) DO UPDATE SET
                last_checked_at = excluded.last_checked_at,
                last_error = excluded.last_error
            "#,
        )
        .bind(feed_url)
        .bind(checked_at)
        .bind(checked_at)
        .bind(error)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Registry row for one feed, if the bot has ever checked it.
    pub async fn feed_status(&self, feed_url: &str) -> Result<Option<FeedStatus>, LedgerError> {
        let status = sqlx::query_as::<_, FeedStatus>(
            "SELECT url, first_seen_at, bootstrapped_at, last_checked_at, last_error
             FROM feeds WHERE url = ?",
        )
        .bind(feed_url)
        .fetch_optional(&self.pool)
        .await?;
        Ok(status)
    }

    /// All sent records for a feed, oldest first.
    pub async fn sent_records(&self, feed_url: &str) -> Result<Vec<SentRecord>, LedgerError> {
        let records = sqlx::query_as::<_, SentRecord>(
            "SELECT feed_url, entry_id, sent_at FROM sent_items
             WHERE feed_url = ? ORDER BY sent_at, id",
        )
        .bind(feed_url)
        .fetch_all(&self.pool)
        .await?;
        Ok(records)
    }

    /// Number of sent records for a feed.
    pub async fn sent_count(&self, feed_url: &str) -> Result<i64, LedgerError> {
        let row: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM sent_items WHERE feed_url = ?")
            .bind(feed_url)
            .fetch_one(&self.pool)
            .await?;
        Ok(row.0)
    }
}
