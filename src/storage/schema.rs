use anyhow::Result;
use sqlx::{
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
    SqlitePool,
};
use std::str::FromStr;
use std::time::Duration;

use super::types::LedgerError;

// ============================================================================
// Database
// ============================================================================

#[derive(Clone)]
pub struct Database {
    pub(crate) pool: SqlitePool,
}

impl Database {
    /// Open the ledger database and run migrations.
    ///
    /// # Errors
    ///
    /// Returns `LedgerError::InstanceLocked` if another instance of crier
    /// has the database locked (SQLITE_BUSY, SQLITE_LOCKED, SQLITE_CANTOPEN).
    /// Returns `LedgerError::Other` for other database errors.
    pub async fn open(path: &str) -> Result<Self, LedgerError> {
        let url = format!("sqlite:{}?mode=rwc", path);

        // Configure SQLite connection options with busy_timeout pragma.
        // busy_timeout=5000: SQLite waits up to 5 seconds for locks to release
        // before returning SQLITE_BUSY. This handles transient lock contention
        // (concurrent mark_sent calls from parallel feed groups) automatically.
        // Using pragma() ensures all connections in the pool inherit this setting.
        let options = SqliteConnectOptions::from_str(&url)
            .map_err(LedgerError::from_sqlx)?
            .pragma("busy_timeout", "5000");
        // SQLite is single-writer; 5 connections covers the bounded feed
        // concurrency (4 groups) plus the scheduler itself. A pooled
        // :memory: database gives every connection its own empty store,
        // so in-memory ledgers are pinned to a single shared connection.
        let max_connections = if path.contains(":memory:") { 1 } else { 5 };
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(Duration::from_secs(10))
            .connect_with(options)
            .await
            .map_err(LedgerError::from_sqlx)?;
        let db = Self { pool };
        db.migrate().await.map_err(|e| {
            // Migration errors could also be lock-related
            let error_string = e.to_string().to_lowercase();
            if error_string.contains("database is locked")
                || error_string.contains("database table is locked")
                || error_string.contains("sqlite_busy")
                || error_string.contains("sqlite_locked")
            {
                LedgerError::InstanceLocked
            } else {
                LedgerError::Migration(e.to_string())
            }
        })?;
        Ok(db)
    }

    /// Run database migrations atomically within a transaction.
    ///
    /// Both schema statements use `IF NOT EXISTS` for idempotency, so
    /// re-running on an existing database is a no-op. If any step fails
    /// (disk full, power loss), the transaction rolls back and the database
    /// keeps its previous consistent state.
    async fn migrate(&self) -> Result<()> {
        // Set busy timeout to 5 seconds: SQLite waits for locks to release
        // before returning SQLITE_BUSY.
        sqlx::query("PRAGMA busy_timeout = 5000")
            .execute(&self.pool)
            .await?;

        let mut tx = self.pool.begin().await?;

        // Feed registry: one row per feed URL the bot has ever checked.
        // bootstrapped_at is NULL until the first successful fetch seeds the
        // sent history; a feed whose first fetch failed stays un-bootstrapped
        // so its backlog is still seeded (not delivered) on the next success.
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS feeds (
                url TEXT PRIMARY KEY,
                first_seen_at INTEGER NOT NULL,
                bootstrapped_at INTEGER,
                last_checked_at INTEGER,
                last_error TEXT
            )
        "#,
        )
        .execute(&mut *tx)
        .await?;

        // Sent-item ledger: one row per delivered (or seeded) entry.
        // UNIQUE(feed_url, entry_id) is the dedup guarantee; INSERT OR IGNORE
        // against it makes mark_sent idempotent under concurrency.
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS sent_items (
                id INTEGER PRIMARY KEY,
                feed_url TEXT NOT NULL,
                entry_id TEXT NOT NULL,
                sent_at INTEGER NOT NULL,
                UNIQUE(feed_url, entry_id)
            )
        "#,
        )
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(())
    }
}
