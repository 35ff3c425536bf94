use anyhow::Result;
use feed_rs::model::MediaObject;
use feed_rs::parser;
use sha2::{Digest, Sha256};
use url::Url;

/// One item from a fetched feed, as handed to the reconciler.
///
/// Ephemeral: lives only within a single reconciliation pass. Only `id` is
/// persisted (in the sent-item ledger), so it must be stable across fetches.
#[derive(Debug, Clone, PartialEq)]
pub struct FeedEntry {
    /// Stable identifier. The feed's own id when present, otherwise derived
    /// by hashing link|title|published.
    pub id: String,
    pub title: String,
    pub link: String,
    /// Publish time as epoch seconds; `updated` stands in when the feed
    /// omits `published`.
    pub published_at: Option<i64>,
    pub summary_html: Option<String>,
    /// First embedded image, if any.
    pub image_url: Option<String>,
}

/// Outcome of parsing one feed document.
pub struct ParseResult {
    /// Entries in feed order.
    pub entries: Vec<FeedEntry>,
    /// Entries dropped for lacking a usable link.
    pub skipped: usize,
}

pub fn parse_feed(bytes: &[u8]) -> Result<ParseResult> {
    let feed = parser::parse(bytes)?;

    let mut entries = Vec::with_capacity(feed.entries.len());
    let mut skipped: usize = 0;

    for entry in feed.entries {
        // An entry we cannot link back to is not worth announcing; count it
        // so the fetcher can log how much of the feed was unusable.
        let link = entry
            .links
            .iter()
            .map(|l| l.href.trim())
            .find(|href| Url::parse(href).is_ok())
            .map(str::to_string);
        let Some(link) = link else {
            skipped += 1;
            continue;
        };

        let published_at = entry.published.or(entry.updated).map(|dt| dt.timestamp());
        let title = entry
            .title
            .map(|t| t.content)
            .unwrap_or_else(|| "Untitled".to_string());
        let summary_html = entry
            .summary
            .map(|s| s.content)
            .or_else(|| entry.content.and_then(|c| c.body));
        let image_url = first_image(summary_html.as_deref(), &entry.media);

        let existing_id = if entry.id.is_empty() {
            None
        } else {
            Some(entry.id.as_str())
        };
        let id = generate_entry_id(existing_id, &link, &title, published_at);

        entries.push(FeedEntry {
            id,
            title,
            link,
            published_at,
            summary_html,
            image_url,
        });
    }

    Ok(ParseResult { entries, skipped })
}

/// Stable entry identity for deduplication.
///
/// Prefers the feed's own id. Feeds that omit ids get a hash of
/// link|title|published instead — stable as long as the entry itself does
/// not change, which is the same stability the feed's id would give us.
fn generate_entry_id(
    existing: Option<&str>,
    link: &str,
    title: &str,
    published: Option<i64>,
) -> String {
    if let Some(id) = existing {
        let trimmed = id.trim();
        if !trimmed.is_empty() {
            return trimmed.to_string();
        }
    }

    let input = format!(
        "{}|{}|{}",
        link,
        title,
        published.map(|p| p.to_string()).unwrap_or_default()
    );
    let hash = Sha256::digest(input.as_bytes());
    format!("{:x}", hash)
}

/// First image attached to an entry: an `<img>` inside the summary HTML
/// wins (what readers see inline), then media-RSS content with an image
/// type, then media thumbnails.
fn first_image(summary_html: Option<&str>, media: &[MediaObject]) -> Option<String> {
    if let Some(src) = summary_html.and_then(first_img_src) {
        return Some(src);
    }

    for object in media {
        for content in &object.content {
            let Some(url) = content.url.as_ref().map(|u| u.as_str()) else {
                continue;
            };
            let url = url.trim();
            if url.is_empty() {
                continue;
            }
            let is_image = content
                .content_type
                .as_ref()
                .map(|m| m.to_string().starts_with("image/"))
                .unwrap_or(false);
            if is_image {
                return Some(url.to_string());
            }
        }
        if let Some(thumbnail) = object.thumbnails.first() {
            let uri = thumbnail.image.uri.trim();
            if !uri.is_empty() {
                return Some(uri.to_string());
            }
        }
    }

    None
}

/// Minimal scan for the first `<img ... src="...">` in an HTML fragment.
///
/// Feed summaries are small and frequently malformed; a full DOM parse buys
/// nothing here. Accepts single quotes, double quotes, and bare values, and
/// ignores attributes like `data-src` that merely end in "src".
fn first_img_src(html: &str) -> Option<String> {
    let lower = html.to_ascii_lowercase();
    let mut search_from = 0;

    while let Some(tag_rel) = lower[search_from..].find("<img") {
        let tag_start = search_from + tag_rel;
        let tag_end = lower[tag_start..]
            .find('>')
            .map(|i| tag_start + i)
            .unwrap_or(html.len());
        let tag = &html[tag_start..tag_end];
        let tag_lower = &lower[tag_start..tag_end];

        let mut attr_from = 0;
        while let Some(rel) = tag_lower[attr_from..].find("src=") {
            let pos = attr_from + rel;
            // Require whitespace before "src" so data-src etc. don't match
            if !tag_lower.as_bytes()[..pos]
                .last()
                .is_some_and(|b| b.is_ascii_whitespace())
            {
                attr_from = pos + 4;
                continue;
            }

            let rest = &tag[pos + 4..];
            let mut chars = rest.chars();
            let value = match chars.next() {
                Some(q @ ('"' | '\'')) => chars.take_while(|&c| c != q).collect::<String>(),
                Some(c) => std::iter::once(c)
                    .chain(chars.take_while(|c| !c.is_whitespace()))
                    .collect::<String>(),
                None => String::new(),
            };
            let value = value.trim();
            if !value.is_empty() {
                return Some(value.to_string());
            }
            attr_from = pos + 4;
        }

        search_from = tag_end.max(tag_start + 4);
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const RSS_TWO_ITEMS: &str = r#"<?xml version="1.0"?>
<rss version="2.0"><channel>
    <title>Example</title>
    <item>
        <guid>tag:example.com,2024:1</guid>
        <title>First</title>
        <link>https://example.com/1</link>
        <pubDate>Mon, 01 Jan 2024 00:00:00 GMT</pubDate>
        <description>&lt;p&gt;Hello &lt;img src="https://example.com/a.png"&gt;&lt;/p&gt;</description>
    </item>
    <item>
        <guid>tag:example.com,2024:2</guid>
        <title>Second</title>
        <link>https://example.com/2</link>
        <pubDate>Tue, 02 Jan 2024 00:00:00 GMT</pubDate>
        <description>plain text</description>
    </item>
</channel></rss>"#;

    #[test]
    fn test_parse_preserves_feed_order() {
        let result = parse_feed(RSS_TWO_ITEMS.as_bytes()).unwrap();
        assert_eq!(result.skipped, 0);
        assert_eq!(result.entries.len(), 2);
        assert_eq!(result.entries[0].title, "First");
        assert_eq!(result.entries[1].title, "Second");
    }

    #[test]
    fn test_parse_uses_feed_guid() {
        let result = parse_feed(RSS_TWO_ITEMS.as_bytes()).unwrap();
        assert_eq!(result.entries[0].id, "tag:example.com,2024:1");
    }

    #[test]
    fn test_parse_extracts_summary_image() {
        let result = parse_feed(RSS_TWO_ITEMS.as_bytes()).unwrap();
        assert_eq!(
            result.entries[0].image_url.as_deref(),
            Some("https://example.com/a.png")
        );
        assert_eq!(result.entries[1].image_url, None);
    }

    #[test]
    fn test_parse_published_timestamp() {
        let result = parse_feed(RSS_TWO_ITEMS.as_bytes()).unwrap();
        // Mon, 01 Jan 2024 00:00:00 GMT
        assert_eq!(result.entries[0].published_at, Some(1704067200));
    }

    #[test]
    fn test_missing_guid_gets_stable_derived_id() {
        let rss = r#"<?xml version="1.0"?>
<rss version="2.0"><channel>
    <item>
        <title>No Guid</title>
        <link>https://example.com/no-guid</link>
    </item>
</channel></rss>"#;

        let first = parse_feed(rss.as_bytes()).unwrap();
        let second = parse_feed(rss.as_bytes()).unwrap();

        assert_eq!(first.entries[0].id, second.entries[0].id);
        assert_eq!(first.entries[0].id.len(), 64, "sha256 hex digest");
    }

    #[test]
    fn test_generate_entry_id_prefers_existing() {
        assert_eq!(
            generate_entry_id(Some("  urn:x  "), "https://e/1", "T", Some(1)),
            "urn:x"
        );
        // Whitespace-only ids fall through to derivation
        let derived = generate_entry_id(Some("   "), "https://e/1", "T", Some(1));
        assert_eq!(derived.len(), 64);
    }

    #[test]
    fn test_generate_entry_id_deterministic() {
        let a = generate_entry_id(None, "https://e/1", "Title", Some(100));
        let b = generate_entry_id(None, "https://e/1", "Title", Some(100));
        let c = generate_entry_id(None, "https://e/1", "Title", Some(200));
        assert_eq!(a, b);
        assert_ne!(a, c, "Different publish time is a different identity");
    }

    #[test]
    fn test_entry_without_link_is_skipped() {
        let rss = r#"<?xml version="1.0"?>
<rss version="2.0"><channel>
    <item><guid>1</guid><title>Linkless</title></item>
    <item><guid>2</guid><title>Linked</title><link>https://example.com/2</link></item>
</channel></rss>"#;

        let result = parse_feed(rss.as_bytes()).unwrap();
        assert_eq!(result.skipped, 1);
        assert_eq!(result.entries.len(), 1);
        assert_eq!(result.entries[0].title, "Linked");
    }

    #[test]
    fn test_atom_entry_updated_fallback() {
        let atom = r#"<?xml version="1.0"?>
<feed xmlns="http://www.w3.org/2005/Atom">
    <title>Atom Example</title>
    <id>urn:feed</id>
    <updated>2024-01-05T00:00:00Z</updated>
    <entry>
        <id>urn:entry:1</id>
        <title>Atom Entry</title>
        <link href="https://example.com/atom/1"/>
        <updated>2024-01-05T00:00:00Z</updated>
        <content type="html">&lt;b&gt;body&lt;/b&gt;</content>
    </entry>
</feed>"#;

        let result = parse_feed(atom.as_bytes()).unwrap();
        let entry = &result.entries[0];
        assert_eq!(entry.id, "urn:entry:1");
        assert_eq!(entry.published_at, Some(1704412800));
        assert_eq!(entry.summary_html.as_deref(), Some("<b>body</b>"));
    }

    #[test]
    fn test_malformed_xml_is_error() {
        assert!(parse_feed(b"<not a feed").is_err());
    }

    #[test]
    fn test_first_img_src_quote_styles() {
        assert_eq!(
            first_img_src(r#"<p><img src="https://a.example/x.png"></p>"#),
            Some("https://a.example/x.png".to_string())
        );
        assert_eq!(
            first_img_src(r#"<img alt='d' src='https://a.example/y.png'>"#),
            Some("https://a.example/y.png".to_string())
        );
        assert_eq!(
            first_img_src("<img src=https://a.example/z.png width=10>"),
            Some("https://a.example/z.png".to_string())
        );
    }

    #[test]
    fn test_first_img_src_skips_data_src() {
        assert_eq!(
            first_img_src(r#"<img data-src="https://lazy.example/1.png">"#),
            None
        );
        assert_eq!(
            first_img_src(r#"<img data-src="lazy.png" src="https://real.example/2.png">"#),
            Some("https://real.example/2.png".to_string())
        );
    }

    #[test]
    fn test_first_img_src_takes_first_of_many() {
        let html = r#"<img src="https://a.example/1.png"><img src="https://a.example/2.png">"#;
        assert_eq!(
            first_img_src(html),
            Some("https://a.example/1.png".to_string())
        );
    }

    #[test]
    fn test_first_img_src_none_without_images() {
        assert_eq!(first_img_src("<p>no pictures here</p>"), None);
        assert_eq!(first_img_src(""), None);
    }

    #[test]
    fn test_media_content_image_fallback() {
        let rss = r#"<?xml version="1.0"?>
<rss version="2.0" xmlns:media="http://search.yahoo.com/mrss/"><channel>
    <item>
        <guid>1</guid>
        <title>With Media</title>
        <link>https://example.com/media</link>
        <description>no inline images</description>
        <media:content url="https://img.example.com/photo.jpg" type="image/jpeg"/>
    </item>
</channel></rss>"#;

        let result = parse_feed(rss.as_bytes()).unwrap();
        assert_eq!(
            result.entries[0].image_url.as_deref(),
            Some("https://img.example.com/photo.jpg")
        );
    }
}
