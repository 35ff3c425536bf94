//! The feed-to-channel reconciliation loop.
//!
//! One pass walks every configured feed: fetch the current entries, diff
//! them against the sent-item ledger, deliver the unseen ones oldest-first,
//! and record each delivery before moving on. Feeds sharing a URL are
//! fetched once and reconciled per channel; unrelated feeds run
//! concurrently with a bounded fan-out.
//!
//! Two seams keep this testable without a network or a real database:
//! [`SentLedger`] (implemented by [`Database`]) and [`Delivery`]
//! (implemented by [`DiscordClient`]).

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use thiserror::Error;

use crate::config::{Config, FeedConfig};
use crate::discord::{ChannelMessage, DeliveryError, DiscordClient};
use crate::feed::{fetch_entries, FeedEntry, FetchError};
use crate::format::format_entry;
use crate::storage::{Database, LedgerError};

/// Max feed groups reconciled at once within a pass.
const MAX_CONCURRENT_FEEDS: usize = 4;

// ============================================================================
// Seams
// ============================================================================

/// Durable record of which entries have already been delivered.
///
/// `mark_sent` must be idempotent for a `(feed_url, entry_id)` pair; every
/// method is fallible and a failure aborts the affected feed's run rather
/// than risking a duplicate send.
#[async_trait]
pub trait SentLedger: Send + Sync {
    async fn has_sent(&self, feed_url: &str, entry_id: &str) -> Result<bool, LedgerError>;

    /// Records a delivery. Returns `false` when the pair was already present.
    async fn mark_sent(
        &self,
        feed_url: &str,
        entry_id: &str,
        sent_at: i64,
    ) -> Result<bool, LedgerError>;

    async fn is_bootstrapped(&self, feed_url: &str) -> Result<bool, LedgerError>;

    /// Seeds a feed's entire current entry set as already sent.
    async fn bootstrap_feed(
        &self,
        feed_url: &str,
        entry_ids: &[String],
        seeded_at: i64,
    ) -> Result<usize, LedgerError>;

    /// Updates the feed registry after a check. Informational only.
    async fn record_check(
        &self,
        feed_url: &str,
        checked_at: i64,
        error: Option<&str>,
    ) -> Result<(), LedgerError>;
}

#[async_trait]
impl SentLedger for Database {
    async fn has_sent(&self, feed_url: &str, entry_id: &str) -> Result<bool, LedgerError> {
        Database::has_sent(self, feed_url, entry_id).await
    }

    async fn mark_sent(
        &self,
        feed_url: &str,
        entry_id: &str,
        sent_at: i64,
    ) -> Result<bool, LedgerError> {
        Database::mark_sent(self, feed_url, entry_id, sent_at).await
    }

    async fn is_bootstrapped(&self, feed_url: &str) -> Result<bool, LedgerError> {
        Database::is_bootstrapped(self, feed_url).await
    }

    async fn bootstrap_feed(
        &self,
        feed_url: &str,
        entry_ids: &[String],
        seeded_at: i64,
    ) -> Result<usize, LedgerError> {
        Database::bootstrap_feed(self, feed_url, entry_ids, seeded_at).await
    }

    async fn record_check(
        &self,
        feed_url: &str,
        checked_at: i64,
        error: Option<&str>,
    ) -> Result<(), LedgerError> {
        Database::record_check(self, feed_url, checked_at, error).await
    }
}

/// Posts one formatted message to a destination channel.
#[async_trait]
pub trait Delivery: Send + Sync {
    async fn post(&self, channel_id: u64, message: &ChannelMessage) -> Result<(), DeliveryError>;
}

#[async_trait]
impl Delivery for DiscordClient {
    async fn post(&self, channel_id: u64, message: &ChannelMessage) -> Result<(), DeliveryError> {
        self.create_message(channel_id, message).await
    }
}

// ============================================================================
// Outcomes
// ============================================================================

/// What one feed config's reconciliation accomplished.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedOutcome {
    /// First encounter: history seeded, nothing delivered.
    Seeded(usize),
    /// Normal pass: this many entries delivered (0 on a quiet feed).
    Delivered(usize),
}

#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error("feed fetch failed: {0}")]
    Fetch(#[from] FetchError),

    /// Delivery stopped mid-feed. Entries delivered before the failure are
    /// already marked; the rest stay pending for the next pass.
    #[error("delivery failed after {delivered} entries: {source}")]
    Delivery {
        delivered: usize,
        #[source]
        source: DeliveryError,
    },

    #[error("ledger unavailable after {delivered} deliveries: {source}")]
    Ledger {
        delivered: usize,
        #[source]
        source: LedgerError,
    },
}

impl ReconcileError {
    /// Entries that went out before the failure (already marked or at least
    /// posted). Counted so pass totals reflect what readers actually saw.
    pub fn delivered(&self) -> usize {
        match self {
            ReconcileError::Fetch(_) => 0,
            ReconcileError::Delivery { delivered, .. }
            | ReconcileError::Ledger { delivered, .. } => *delivered,
        }
    }
}

/// Aggregate counters for one reconciliation pass.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PassStats {
    /// Feed configs processed (including failed ones).
    pub feeds_checked: usize,
    pub entries_delivered: usize,
    pub entries_seeded: usize,
    /// Feed configs that ended in an error.
    pub feeds_failed: usize,
}

impl PassStats {
    fn merge(&mut self, other: PassStats) {
        self.feeds_checked += other.feeds_checked;
        self.entries_delivered += other.entries_delivered;
        self.entries_seeded += other.entries_seeded;
        self.feeds_failed += other.feeds_failed;
    }

    fn absorb(&mut self, outcome: &Result<FeedOutcome, ReconcileError>) {
        self.feeds_checked += 1;
        match outcome {
            Ok(FeedOutcome::Seeded(n)) => self.entries_seeded += n,
            Ok(FeedOutcome::Delivered(n)) => self.entries_delivered += n,
            Err(e) => {
                self.entries_delivered += e.delivered();
                self.feeds_failed += 1;
            }
        }
    }
}

// ============================================================================
// Core loop
// ============================================================================

/// Reconciles one feed config against an already-fetched entry set.
///
/// On the feed's first encounter, every current entry id is seeded into the
/// ledger without delivering anything, so adding an established feed does
/// not replay its backlog into the channel.
///
/// Otherwise unseen entries are delivered oldest-first (undated entries
/// last, in fetch order) and each one is marked sent only after its post
/// succeeds. A delivery failure stops the feed for this pass so a later
/// retry cannot post entries out of order; a ledger failure stops it so an
/// unrecordable delivery is never attempted.
pub async fn reconcile_feed<L: SentLedger, D: Delivery>(
    feed: &FeedConfig,
    entries: &[FeedEntry],
    ledger: &L,
    delivery: &D,
    max_summary_chars: usize,
    now: i64,
) -> Result<FeedOutcome, ReconcileError> {
    let url = feed.feed_url.as_str();

    let bootstrapped = ledger
        .is_bootstrapped(url)
        .await
        .map_err(|source| ReconcileError::Ledger {
            delivered: 0,
            source,
        })?;

    if !bootstrapped {
        let ids: Vec<String> = entries.iter().map(|e| e.id.clone()).collect();
        let seeded = ledger
            .bootstrap_feed(url, &ids, now)
            .await
            .map_err(|source| ReconcileError::Ledger {
                delivered: 0,
                source,
            })?;
        tracing::info!(
            feed_url = %url,
            seeded = seeded,
            "New feed: seeded current entries without delivering"
        );
        return Ok(FeedOutcome::Seeded(seeded));
    }

    let mut pending: Vec<&FeedEntry> = Vec::new();
    for entry in entries {
        let sent = ledger
            .has_sent(url, &entry.id)
            .await
            .map_err(|source| ReconcileError::Ledger {
                delivered: 0,
                source,
            })?;
        if !sent {
            pending.push(entry);
        }
    }

    // Oldest first so the channel history reads chronologically. The sort
    // is stable, so undated entries keep their fetch order at the end.
    pending.sort_by_key(|e| (e.published_at.is_none(), e.published_at.unwrap_or(0)));

    let mut delivered = 0usize;
    for entry in pending {
        let message = format_entry(entry, url, max_summary_chars);
        delivery
            .post(feed.channel_id, &message)
            .await
            .map_err(|source| ReconcileError::Delivery { delivered, source })?;

        let newly_marked = ledger
            .mark_sent(url, &entry.id, now)
            .await
            .map_err(|source| ReconcileError::Ledger {
                delivered: delivered + 1,
                source,
            })?;
        if !newly_marked {
            tracing::debug!(
                feed_url = %url,
                entry_id = %entry.id,
                "Entry was already recorded as sent"
            );
        }
        delivered += 1;

        tracing::info!(
            feed_url = %url,
            channel_id = feed.channel_id,
            entry_id = %entry.id,
            title = %entry.title,
            "Delivered feed entry"
        );
    }

    Ok(FeedOutcome::Delivered(delivered))
}

/// Fetches one feed URL and reconciles every config subscribed to it.
///
/// Subscribers run sequentially in config order; with a shared ledger the
/// first channel receives new entries and later channels see them as
/// already sent. A fetch failure fails every subscriber but never
/// propagates past this group.
async fn reconcile_group<L: SentLedger, D: Delivery>(
    http: &reqwest::Client,
    feed_url: &str,
    members: Vec<&FeedConfig>,
    ledger: &L,
    delivery: &D,
    max_summary_chars: usize,
    now: i64,
) -> PassStats {
    let mut stats = PassStats::default();

    let entries = match fetch_entries(http, feed_url).await {
        Ok(entries) => entries,
        Err(e) => {
            tracing::warn!(
                feed_url = %feed_url,
                error = %e,
                "Feed fetch failed, skipping until next pass"
            );
            stats.feeds_checked = members.len();
            stats.feeds_failed = members.len();
            if let Err(db_err) = ledger.record_check(feed_url, now, Some(&e.to_string())).await {
                tracing::warn!(feed_url = %feed_url, error = %db_err, "Failed to record feed check");
            }
            return stats;
        }
    };

    let mut first_error: Option<String> = None;
    for feed in members {
        let outcome =
            reconcile_feed(feed, &entries, ledger, delivery, max_summary_chars, now).await;
        if let Err(e) = &outcome {
            tracing::warn!(
                feed_url = %feed_url,
                channel_id = feed.channel_id,
                error = %e,
                "Feed reconciliation failed"
            );
            first_error.get_or_insert_with(|| e.to_string());
        }
        stats.absorb(&outcome);
    }

    if let Err(db_err) = ledger
        .record_check(feed_url, now, first_error.as_deref())
        .await
    {
        tracing::warn!(feed_url = %feed_url, error = %db_err, "Failed to record feed check");
    }

    stats
}

/// Runs one reconciliation pass over every configured feed.
///
/// Configs are grouped by feed URL (first-appearance order) so a URL is
/// fetched once per pass no matter how many channels subscribe to it.
/// Groups run concurrently, at most [`MAX_CONCURRENT_FEEDS`] at a time.
/// Per-feed failures are contained and counted; the pass itself always
/// completes.
pub async fn run_pass<L: SentLedger, D: Delivery>(
    http: &reqwest::Client,
    config: &Config,
    ledger: &L,
    delivery: &D,
) -> PassStats {
    let now = chrono::Utc::now().timestamp();

    let mut groups: Vec<(&str, Vec<&FeedConfig>)> = Vec::new();
    for feed in &config.feeds {
        match groups.iter_mut().find(|(url, _)| *url == feed.feed_url) {
            Some((_, members)) => members.push(feed),
            None => groups.push((feed.feed_url.as_str(), vec![feed])),
        }
    }

    let group_stats: Vec<PassStats> = stream::iter(groups)
        .map(|(feed_url, members)| {
            reconcile_group(
                http,
                feed_url,
                members,
                ledger,
                delivery,
                config.max_summary_chars,
                now,
            )
        })
        .buffer_unordered(MAX_CONCURRENT_FEEDS)
        .collect()
        .await;

    let mut stats = PassStats::default();
    for s in group_stats {
        stats.merge(s);
    }

    tracing::info!(
        feeds_checked = stats.feeds_checked,
        delivered = stats.entries_delivered,
        seeded = stats.entries_seeded,
        failed = stats.feeds_failed,
        "Reconciliation pass complete"
    );
    stats
}
