use secrecy::{ExposeSecret, SecretString};
use std::time::Duration;
use thiserror::Error;

use super::message::ChannelMessage;

const DEFAULT_BASE_URL: &str = "https://discord.com/api/v10";
const MAX_RETRIES: u32 = 3;
const DELIVER_TIMEOUT: Duration = Duration::from_secs(30);

/// A 429 asking us to wait longer than this is not worth stalling the pass
/// for; the entry stays unmarked and goes out on the next scheduled run.
const MAX_RETRY_AFTER: Duration = Duration::from_secs(60);

#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("Request timed out")]
    Timeout,
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),
    #[error("Discord API error: status {0}")]
    HttpStatus(u16),
    #[error("Rate limited (retry after {0:?})")]
    RateLimited(Duration),
    #[error("Insecure base URL: HTTPS required (except localhost for testing)")]
    InsecureBaseUrl,
}

impl DeliveryError {
    /// Returns true if this error is transient and the request should be retried.
    fn is_retryable(&self) -> bool {
        match self {
            DeliveryError::Timeout | DeliveryError::Network(_) => true,
            DeliveryError::HttpStatus(status) => *status >= 500,
            DeliveryError::RateLimited(_) | DeliveryError::InsecureBaseUrl => false,
        }
    }
}

/// Minimal REST client for posting messages into channels.
///
/// The bot never opens a gateway connection; announcing a feed entry is one
/// authenticated POST, so plain REST over the shared HTTP client is enough.
pub struct DiscordClient {
    http: reqwest::Client,
    token: SecretString,
    base_url: String,
}

impl DiscordClient {
    /// Build a client for the given bot token.
    ///
    /// `base_url` overrides the Discord API root (tests point it at a local
    /// mock server); `None` means the real API.
    ///
    /// SEC-003: Enforces HTTPS for the base URL so the token cannot leak
    /// over cleartext. HTTP is allowed only for localhost/127.0.0.1.
    pub fn new(
        http: reqwest::Client,
        token: SecretString,
        base_url: Option<&str>,
    ) -> Result<Self, DeliveryError> {
        let base = base_url.unwrap_or(DEFAULT_BASE_URL);

        if !base.starts_with("https://") {
            let is_localhost =
                base.starts_with("http://127.0.0.1") || base.starts_with("http://localhost");
            if !is_localhost {
                tracing::error!(base_url = %base, "Rejecting non-HTTPS Discord base URL (HTTPS required except for localhost)");
                return Err(DeliveryError::InsecureBaseUrl);
            }
            tracing::warn!(base_url = %base, "Using non-HTTPS Discord base URL (localhost only)");
        }

        Ok(Self {
            http,
            token,
            base_url: base.trim_end_matches('/').to_string(),
        })
    }

    /// Post a message into a channel, retrying transient failures.
    ///
    /// Honors the server's Retry-After on 429 (up to [`MAX_RETRY_AFTER`]);
    /// other transient errors back off exponentially (1s, 2s, 4s). Client
    /// errors (bad channel, missing permissions) fail immediately.
    pub async fn create_message(
        &self,
        channel_id: u64,
        message: &ChannelMessage,
    ) -> Result<(), DeliveryError> {
        let url = format!("{}/channels/{}/messages", self.base_url, channel_id);
        let mut retry_count = 0;

        loop {
            match self.post_message(&url, message).await {
                Ok(()) => return Ok(()),
                Err(DeliveryError::RateLimited(delay)) => {
                    if retry_count >= MAX_RETRIES || delay > MAX_RETRY_AFTER {
                        return Err(DeliveryError::RateLimited(delay));
                    }
                    tracing::warn!(
                        channel_id = channel_id,
                        delay_ms = delay.as_millis() as u64,
                        retry = retry_count,
                        "Discord rate limit, waiting out Retry-After"
                    );
                    tokio::time::sleep(delay).await;
                    retry_count += 1;
                }
                Err(e) if e.is_retryable() && retry_count < MAX_RETRIES => {
                    let delay = 1u64 << retry_count; // 1s, 2s, 4s
                    tracing::debug!(
                        error = %e,
                        retry = retry_count + 1,
                        delay_secs = delay,
                        "Retrying Discord delivery after transient error"
                    );
                    tokio::time::sleep(Duration::from_secs(delay)).await;
                    retry_count += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn post_message(
        &self,
        url: &str,
        message: &ChannelMessage,
    ) -> Result<(), DeliveryError> {
        let request = self
            .http
            .post(url)
            .header(
                "Authorization",
                format!("Bot {}", self.token.expose_secret()),
            )
            .json(message);

        let response = tokio::time::timeout(DELIVER_TIMEOUT, request.send())
            .await
            .map_err(|_| DeliveryError::Timeout)?
            .map_err(DeliveryError::Network)?;

        let status = response.status();

        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            let delay = retry_after(&response).unwrap_or(Duration::from_secs(5));
            return Err(DeliveryError::RateLimited(delay));
        }

        if !status.is_success() {
            // Discord's error body names the exact problem (unknown channel,
            // missing access); the status code alone rarely does.
            let body = response.text().await.unwrap_or_default();
            let snippet: String = body.chars().take(200).collect();
            tracing::warn!(
                status = status.as_u16(),
                body = %snippet,
                "Discord API rejected message"
            );
            return Err(DeliveryError::HttpStatus(status.as_u16()));
        }

        Ok(())
    }
}

/// Parse the Retry-After header (seconds, possibly fractional).
fn retry_after(response: &reqwest::Response) -> Option<Duration> {
    let header = response.headers().get("retry-after")?.to_str().ok()?;
    let secs: f64 = header.trim().parse().ok()?;
    (secs.is_finite() && secs >= 0.0).then(|| Duration::from_secs_f64(secs))
}
