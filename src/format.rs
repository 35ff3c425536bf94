//! Turns a feed entry into a postable Discord message.
//!
//! The pipeline is: HTML summary → plain text → character-capped text →
//! blockquoted markdown inside an embed. Truncation is char-based (not
//! byte-based) so multi-byte summaries never split mid-codepoint.

use chrono::DateTime;
use nanohtml2text::html2text;
use std::borrow::Cow;

use crate::discord::{ChannelMessage, Embed, EmbedFooter, EmbedImage};
use crate::feed::FeedEntry;

/// Ellipsis marker appended when text is cut.
const ELLIPSIS: char = '…';

/// Discord hard limit on embed titles.
const EMBED_TITLE_MAX: usize = 256;

/// Discord hard limit on embed descriptions.
const EMBED_DESCRIPTION_MAX: usize = 4096;

/// Embed accent color (the classic blurple-adjacent blue).
const EMBED_COLOR: u32 = 0x3498db;

/// Truncates a string to at most `max_chars` characters.
///
/// - If the string fits, it is returned unchanged (no allocation).
/// - Otherwise the first `max_chars` characters are kept and [`ELLIPSIS`]
///   is appended, so the result is exactly `max_chars + 1` characters.
pub fn truncate_chars(s: &str, max_chars: usize) -> Cow<'_, str> {
    match s.char_indices().nth(max_chars) {
        None => Cow::Borrowed(s),
        Some((byte_idx, _)) => {
            let mut out = String::with_capacity(byte_idx + ELLIPSIS.len_utf8());
            out.push_str(&s[..byte_idx]);
            out.push(ELLIPSIS);
            Cow::Owned(out)
        }
    }
}

/// Collapse an HTML summary into plain text.
pub fn summary_text(html: &str) -> String {
    html2text(html).trim().to_string()
}

/// Render text as a markdown blockquote, dropping blank lines.
fn blockquote(text: &str) -> String {
    text.lines()
        .filter(|line| !line.trim().is_empty())
        .map(|line| format!("> {line}"))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Build the Discord message announcing one feed entry.
///
/// Shape follows the bot's house style: a 📰-prefixed title linking to the
/// entry, the summary as a quoted block (or an explicit "no summary"
/// notice), the feed URL in the footer, the entry's publish time as the
/// embed timestamp, and the first embedded image when there is one.
/// A missing image is simply omitted, never an error.
pub fn format_entry(entry: &FeedEntry, feed_url: &str, max_summary_chars: usize) -> ChannelMessage {
    let title = truncate_chars(&format!("📰 {}", entry.title), EMBED_TITLE_MAX - 1).into_owned();

    let summary = entry
        .summary_html
        .as_deref()
        .map(summary_text)
        .filter(|text| !text.is_empty());

    let description = match summary {
        Some(text) => {
            let capped = truncate_chars(&text, max_summary_chars);
            format!("💬 **Summary:**\n\n{}", blockquote(&capped))
        }
        None => "💬 **Summary:**\n\n_No Summary Provided_".to_string(),
    };
    // Guard against operator configs that push past Discord's own cap
    let description = truncate_chars(&description, EMBED_DESCRIPTION_MAX - 1).into_owned();

    let timestamp = entry
        .published_at
        .and_then(|secs| DateTime::from_timestamp(secs, 0))
        .map(|dt| dt.to_rfc3339());

    ChannelMessage {
        embeds: vec![Embed {
            title,
            url: Some(entry.link.clone()),
            description,
            color: EMBED_COLOR,
            timestamp,
            image: entry
                .image_url
                .clone()
                .map(|url| EmbedImage { url }),
            footer: Some(EmbedFooter {
                text: format!("🔗 {} 🔗", feed_url),
            }),
        }],
    }
}
