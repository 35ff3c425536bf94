//! Configuration file parser for the bot's config.toml.
//!
//! The config file is required — it carries the feed list and the ledger
//! path, so a missing file is a startup error rather than a silent default.
//! Unknown keys are ignored by serde (with `deny_unknown_fields` off),
//! though we log a warning when the file contains potential typos.
use serde::Deserialize;
use std::path::Path;
use thiserror::Error;
use url::Url;

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Config file not found: {0}")]
    NotFound(String),

    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid TOML in config file: {0}")]
    Parse(#[from] toml::de::Error),

    /// SEC-001: Config file exceeds maximum allowed size.
    #[error("Config file too large: {0}")]
    TooLarge(String),

    #[error("Invalid config: {0}")]
    Invalid(String),
}

// ============================================================================
// Configuration Structs
// ============================================================================

/// One feed-to-channel subscription.
///
/// The same `feed_url` may appear in multiple entries pointing at different
/// channels; dedup history is shared per feed, not per channel.
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct FeedConfig {
    /// RSS/Atom feed URL to poll.
    pub feed_url: String,

    /// Discord channel id to post into. Accepts an integer or a string
    /// (some operators quote snowflakes to be safe).
    #[serde(deserialize_with = "deserialize_channel_id")]
    pub channel_id: u64,

    /// Desired refresh cadence in minutes. Advisory only: the bot polls all
    /// feeds on the global cadence, and logs when this asks for more.
    #[serde(default)]
    pub update_interval: Option<u64>,
}

/// Top-level application configuration.
///
/// Every field falls back to its default when the key is absent, so a
/// config listing only `[[feeds]]` entries is complete. An empty feed list
/// parses too, but is warned about at load time.
///
/// SEC-002: Custom Debug impl masks `discord_token` to prevent secret
/// leakage in logs, error messages, and debug output.
#[derive(Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Path to the SQLite ledger database.
    pub db_path: String,

    /// Seconds between reconciliation passes in daemon mode.
    pub poll_interval_secs: u64,

    /// Maximum summary length in characters before truncation.
    pub max_summary_chars: usize,

    /// Bind address for the health endpoint.
    pub health_addr: String,

    /// Discord bot token (alternative to --token / DISCORD_BOT_TOKEN).
    /// CLI flag and env var both take precedence over the config file.
    pub discord_token: Option<String>,

    /// Feed subscriptions. An empty list is accepted (the bot idles) but
    /// logged loudly since it is almost always a mistake.
    pub feeds: Vec<FeedConfig>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            db_path: "crier.db".to_string(),
            poll_interval_secs: 3600,
            max_summary_chars: 400,
            health_addr: "0.0.0.0:8080".to_string(),
            discord_token: None,
            feeds: Vec::new(),
        }
    }
}

/// SEC-002: Mask discord_token in Debug output to prevent secret leakage.
impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("db_path", &self.db_path)
            .field("poll_interval_secs", &self.poll_interval_secs)
            .field("max_summary_chars", &self.max_summary_chars)
            .field("health_addr", &self.health_addr)
            .field(
                "discord_token",
                &self.discord_token.as_ref().map(|_| "[REDACTED]"),
            )
            .field("feeds", &self.feeds)
            .finish()
    }
}

/// Accept a channel id written as either a TOML integer or a string.
fn deserialize_channel_id<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: serde::Deserializer<'de>,
{
    struct ChannelIdVisitor;

    impl serde::de::Visitor<'_> for ChannelIdVisitor {
        type Value = u64;

        fn expecting(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            f.write_str("a Discord channel id (integer or string)")
        }

        fn visit_u64<E: serde::de::Error>(self, v: u64) -> Result<u64, E> {
            Ok(v)
        }

        fn visit_i64<E: serde::de::Error>(self, v: i64) -> Result<u64, E> {
            u64::try_from(v).map_err(|_| E::custom("channel id cannot be negative"))
        }

        fn visit_str<E: serde::de::Error>(self, v: &str) -> Result<u64, E> {
            v.trim()
                .parse()
                .map_err(|_| E::custom(format!("invalid channel id: {v:?}")))
        }
    }

    deserializer.deserialize_any(ChannelIdVisitor)
}

impl Config {
    /// SEC-001: Maximum config file size (1 MB).
    const MAX_FILE_SIZE: u64 = 1_048_576;

    /// Load configuration from a TOML file.
    ///
    /// - Missing file → `Err(ConfigError::NotFound)` (startup-fatal)
    /// - Invalid TOML → `Err(ConfigError::Parse)` with line number info
    /// - Semantic problems (bad feed URL, zero channel id) → `Err(ConfigError::Invalid)`
    /// - Unknown keys → accepted (serde default behavior), logged as warning
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        // SEC-001: Check file size before reading to prevent memory exhaustion
        // from a maliciously large or corrupted config file.
        match std::fs::metadata(path) {
            Ok(meta) if meta.len() > Self::MAX_FILE_SIZE => {
                return Err(ConfigError::TooLarge(format!(
                    "Config file is {} bytes (max {} bytes)",
                    meta.len(),
                    Self::MAX_FILE_SIZE
                )));
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(ConfigError::NotFound(path.display().to_string()));
            }
            Err(e) => return Err(ConfigError::Io(e)),
            Ok(_) => {} // Size is within limits, proceed
        }

        let content = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                // Race condition: file deleted between metadata and read
                return Err(ConfigError::NotFound(path.display().to_string()));
            }
            Err(e) => return Err(ConfigError::Io(e)),
        };

        // Parse the TOML content first as a raw table to detect unknown keys
        if let Ok(raw) = content.parse::<toml::Table>() {
            let known_keys = [
                "db_path",
                "poll_interval_secs",
                "max_summary_chars",
                "health_addr",
                "discord_token",
                "feeds",
            ];
            for key in raw.keys() {
                if !known_keys.contains(&key.as_str()) {
                    tracing::warn!(key = %key, "Unknown key in config file, ignoring");
                }
            }
            if let Some(feeds) = raw.get("feeds").and_then(|v| v.as_array()) {
                let feed_keys = ["feed_url", "channel_id", "update_interval"];
                for entry in feeds.iter().filter_map(|v| v.as_table()) {
                    for key in entry.keys() {
                        if !feed_keys.contains(&key.as_str()) {
                            tracing::warn!(key = %key, "Unknown key in feed entry, ignoring");
                        }
                    }
                }
            }
        }

        let config: Config = toml::from_str(&content)?;
        config.validate()?;
        tracing::info!(
            path = %path.display(),
            feeds = config.feeds.len(),
            db_path = %config.db_path,
            "Loaded configuration"
        );
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.feeds.is_empty() {
            tracing::warn!("Config contains no feeds; the bot will idle");
        }
        if self.poll_interval_secs == 0 {
            return Err(ConfigError::Invalid(
                "poll_interval_secs must be at least 1".to_string(),
            ));
        }
        if self.max_summary_chars == 0 {
            return Err(ConfigError::Invalid(
                "max_summary_chars must be at least 1".to_string(),
            ));
        }
        for feed in &self.feeds {
            let url = Url::parse(&feed.feed_url).map_err(|e| {
                ConfigError::Invalid(format!("invalid feed_url {:?}: {e}", feed.feed_url))
            })?;
            if url.scheme() != "http" && url.scheme() != "https" {
                return Err(ConfigError::Invalid(format!(
                    "feed_url {:?} must be http or https",
                    feed.feed_url
                )));
            }
            if feed.channel_id == 0 {
                return Err(ConfigError::Invalid(format!(
                    "channel_id is required for feed {:?}",
                    feed.feed_url
                )));
            }
            // update_interval is advisory; we only poll on the global cadence.
            if let Some(minutes) = feed.update_interval {
                if minutes * 60 < self.poll_interval_secs {
                    tracing::warn!(
                        feed_url = %feed.feed_url,
                        update_interval = minutes,
                        poll_interval_secs = self.poll_interval_secs,
                        "update_interval asks for more frequent polling than the global cadence; feeds are polled on the global cadence"
                    );
                }
            }
        }
        Ok(())
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn write_config(dir_name: &str, content: &str) -> std::path::PathBuf {
        let dir = std::env::temp_dir().join(dir_name);
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("config.toml");
        std::fs::write(&path, content).unwrap();
        path
    }

    const MINIMAL: &str = r#"
[[feeds]]
feed_url = "https://example.com/rss.xml"
channel_id = 123456789012345678
"#;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.db_path, "crier.db");
        assert_eq!(config.poll_interval_secs, 3600);
        assert_eq!(config.max_summary_chars, 400);
        assert_eq!(config.health_addr, "0.0.0.0:8080");
        assert!(config.discord_token.is_none());
        assert!(config.feeds.is_empty());
    }

    #[test]
    fn test_missing_file_is_error() {
        let path = Path::new("/tmp/crier_test_nonexistent_config.toml");
        let result = Config::load(path);
        assert!(matches!(result, Err(ConfigError::NotFound(_))));
    }

    #[test]
    fn test_minimal_config() {
        let path = write_config("crier_config_test_minimal", MINIMAL);

        let config = Config::load(&path).unwrap();
        assert_eq!(config.feeds.len(), 1);
        assert_eq!(config.feeds[0].feed_url, "https://example.com/rss.xml");
        assert_eq!(config.feeds[0].channel_id, 123456789012345678);
        assert_eq!(config.feeds[0].update_interval, None);
        assert_eq!(config.db_path, "crier.db"); // default
        assert_eq!(config.poll_interval_secs, 3600); // default

        std::fs::remove_dir_all(path.parent().unwrap()).ok();
    }

    #[test]
    fn test_full_config() {
        let content = r#"
db_path = "/var/lib/crier/ledger.db"
poll_interval_secs = 1800
max_summary_chars = 300
health_addr = "127.0.0.1:9090"
discord_token = "t0ken"

[[feeds]]
feed_url = "https://example.com/rss.xml"
channel_id = 111
update_interval = 60

[[feeds]]
feed_url = "https://other.example.com/atom.xml"
channel_id = 222
"#;
        let path = write_config("crier_config_test_full", content);

        let config = Config::load(&path).unwrap();
        assert_eq!(config.db_path, "/var/lib/crier/ledger.db");
        assert_eq!(config.poll_interval_secs, 1800);
        assert_eq!(config.max_summary_chars, 300);
        assert_eq!(config.health_addr, "127.0.0.1:9090");
        assert_eq!(config.discord_token.as_deref(), Some("t0ken"));
        assert_eq!(config.feeds.len(), 2);
        assert_eq!(config.feeds[0].update_interval, Some(60));
        assert_eq!(config.feeds[1].channel_id, 222);

        std::fs::remove_dir_all(path.parent().unwrap()).ok();
    }

    #[test]
    fn test_channel_id_as_string() {
        let content = r#"
[[feeds]]
feed_url = "https://example.com/rss.xml"
channel_id = "987654321098765432"
"#;
        let path = write_config("crier_config_test_strid", content);

        let config = Config::load(&path).unwrap();
        assert_eq!(config.feeds[0].channel_id, 987654321098765432);

        std::fs::remove_dir_all(path.parent().unwrap()).ok();
    }

    #[test]
    fn test_negative_channel_id_rejected() {
        let content = r#"
[[feeds]]
feed_url = "https://example.com/rss.xml"
channel_id = -5
"#;
        let path = write_config("crier_config_test_negid", content);

        let result = Config::load(&path);
        assert!(matches!(result, Err(ConfigError::Parse(_))));

        std::fs::remove_dir_all(path.parent().unwrap()).ok();
    }

    #[test]
    fn test_zero_channel_id_rejected() {
        let content = r#"
[[feeds]]
feed_url = "https://example.com/rss.xml"
channel_id = 0
"#;
        let path = write_config("crier_config_test_zeroid", content);

        let result = Config::load(&path);
        assert!(matches!(result, Err(ConfigError::Invalid(_))));

        std::fs::remove_dir_all(path.parent().unwrap()).ok();
    }

    #[test]
    fn test_invalid_feed_url_rejected() {
        let content = r#"
[[feeds]]
feed_url = "not a url"
channel_id = 111
"#;
        let path = write_config("crier_config_test_badurl", content);

        let result = Config::load(&path);
        assert!(matches!(result, Err(ConfigError::Invalid(_))));

        std::fs::remove_dir_all(path.parent().unwrap()).ok();
    }

    #[test]
    fn test_non_http_feed_url_rejected() {
        let content = r#"
[[feeds]]
feed_url = "ftp://example.com/rss.xml"
channel_id = 111
"#;
        let path = write_config("crier_config_test_ftpurl", content);

        let result = Config::load(&path);
        assert!(matches!(result, Err(ConfigError::Invalid(_))));

        std::fs::remove_dir_all(path.parent().unwrap()).ok();
    }

    #[test]
    fn test_zero_poll_interval_rejected() {
        let content = r#"
poll_interval_secs = 0

[[feeds]]
feed_url = "https://example.com/rss.xml"
channel_id = 111
"#;
        let path = write_config("crier_config_test_zeropoll", content);

        let result = Config::load(&path);
        assert!(matches!(result, Err(ConfigError::Invalid(_))));

        std::fs::remove_dir_all(path.parent().unwrap()).ok();
    }

    #[test]
    fn test_empty_feed_list_accepted() {
        let path = write_config("crier_config_test_nofeeds", "db_path = \"x.db\"\n");

        let config = Config::load(&path).unwrap();
        assert!(config.feeds.is_empty());
        assert_eq!(config.db_path, "x.db");

        std::fs::remove_dir_all(path.parent().unwrap()).ok();
    }

    #[test]
    fn test_invalid_toml_returns_error() {
        let path = write_config("crier_config_test_invalid", "this is not [valid toml");

        let result = Config::load(&path);
        assert!(result.is_err());
        let err = result.unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
        assert!(err.to_string().contains("Invalid TOML"));

        std::fs::remove_dir_all(path.parent().unwrap()).ok();
    }

    #[test]
    fn test_unknown_keys_accepted() {
        let content = r#"
totally_fake_key = "should not fail"

[[feeds]]
feed_url = "https://example.com/rss.xml"
channel_id = 111
unknown_feed_key = 42
"#;
        let path = write_config("crier_config_test_unknown", content);

        // Should succeed (unknown keys ignored)
        let config = Config::load(&path).unwrap();
        assert_eq!(config.feeds.len(), 1);

        std::fs::remove_dir_all(path.parent().unwrap()).ok();
    }

    #[test]
    fn test_wrong_type_returns_error() {
        // poll_interval_secs should be an integer, not a string
        let path = write_config(
            "crier_config_test_wrongtype",
            "poll_interval_secs = \"soon\"\n",
        );

        let result = Config::load(&path);
        assert!(result.is_err());

        std::fs::remove_dir_all(path.parent().unwrap()).ok();
    }

    // SEC-001: File size limit
    #[test]
    fn test_too_large_file_rejected() {
        let content = "a".repeat(1_048_577);
        let path = write_config("crier_config_test_too_large", &content);

        let result = Config::load(&path);
        assert!(result.is_err());
        let err = result.unwrap_err();
        assert!(matches!(err, ConfigError::TooLarge(_)));
        assert!(err.to_string().contains("too large"));

        std::fs::remove_dir_all(path.parent().unwrap()).ok();
    }

    // SEC-002: Debug output masks the token
    #[test]
    fn test_debug_masks_token() {
        let mut config = Config::default();
        config.discord_token = Some("super-secret-token-12345".to_string());

        let debug_output = format!("{:?}", config);
        assert!(
            !debug_output.contains("super-secret-token-12345"),
            "Debug output should not contain the token"
        );
        assert!(
            debug_output.contains("[REDACTED]"),
            "Debug output should show [REDACTED] for the token"
        );
    }

    #[test]
    fn test_debug_shows_none_when_no_token() {
        let config = Config::default();
        let debug_output = format!("{:?}", config);
        assert!(debug_output.contains("None"));
        assert!(!debug_output.contains("[REDACTED]"));
    }
}
