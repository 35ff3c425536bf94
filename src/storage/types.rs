use thiserror::Error;

// ============================================================================
// Error Types
// ============================================================================

/// Ledger-specific errors with user-friendly messages.
///
/// Any ledger failure is treated as fatal for the affected feed's run: the
/// reconciler never delivers an entry it cannot record, so a broken ledger
/// fails closed rather than risking duplicate sends on the next pass.
#[derive(Debug, Error)]
pub enum LedgerError {
    /// Another instance of the application has locked the database
    #[error("Another instance of crier appears to be running. Please close it and try again.")]
    InstanceLocked,

    /// Migration failed
    #[error("Ledger migration failed: {0}")]
    Migration(String),

    /// Generic database error
    #[error("Ledger error: {0}")]
    Other(#[from] sqlx::Error),
}

impl LedgerError {
    /// Check if a sqlx error indicates database locking
    pub(crate) fn from_sqlx(err: sqlx::Error) -> Self {
        let error_string = err.to_string().to_lowercase();

        // Check for SQLite lock-related error messages
        // SQLITE_BUSY (5): database is locked
        // SQLITE_LOCKED (6): database table is locked
        // SQLITE_CANTOPEN (14): unable to open database file
        if error_string.contains("database is locked")
            || error_string.contains("database table is locked")
            || error_string.contains("sqlite_busy")
            || error_string.contains("sqlite_locked")
            || error_string.contains("unable to open database file")
        {
            return LedgerError::InstanceLocked;
        }

        LedgerError::Other(err)
    }
}

// ============================================================================
// Data Structures
// ============================================================================

/// One delivered (or bootstrap-seeded) entry, as persisted.
///
/// At most one row exists per `(feed_url, entry_id)` pair; rows are created
/// after successful delivery and never updated.
#[derive(Debug, Clone, PartialEq, sqlx::FromRow)]
pub struct SentRecord {
    pub feed_url: String,
    pub entry_id: String,
    pub sent_at: i64,
}

/// Registry row describing the bot's history with one feed URL.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct FeedStatus {
    pub url: String,
    pub first_seen_at: i64,
    /// Set once the feed's initial backlog has been seeded into the ledger.
    pub bootstrapped_at: Option<i64>,
    pub last_checked_at: Option<i64>,
    pub last_error: Option<String>,
}
