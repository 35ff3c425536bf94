//! crier announces new RSS/Atom feed entries in Discord channels.
//!
//! A TOML config maps feed URLs to channel ids. On each pass the bot
//! fetches every feed, diffs the entries against a persistent sent-item
//! ledger (SQLite), and posts anything unseen as a rich embed, oldest
//! first. A feed's first encounter seeds the ledger without posting, so
//! subscribing to an established feed never floods the channel.

pub mod app;
pub mod config;
pub mod discord;
pub mod feed;
pub mod format;
pub mod health;
pub mod reconcile;
pub mod storage;
