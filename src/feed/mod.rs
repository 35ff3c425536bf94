//! Feed retrieval for RSS/Atom sources.
//!
//! Two submodules split the work:
//!
//! - [`parser`] - feed-rs XML parsing into [`FeedEntry`] values, including
//!   stable id derivation and first-image extraction
//! - [`fetcher`] - HTTP retrieval with retry logic, rate-limit backoff, and
//!   response size caps

mod fetcher;
mod parser;

pub use fetcher::{fetch_entries, FetchError};
pub use parser::{parse_feed, FeedEntry, ParseResult};
