//! Process wiring: token resolution, shared clients, and the poll loop.

use anyhow::{Context, Result};
use reqwest::redirect::Policy;
use secrecy::SecretString;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;

use crate::config::Config;
use crate::discord::DiscordClient;
use crate::health::{self, ReadyFlag};
use crate::reconcile::{run_pass, PassStats};
use crate::storage::Database;

/// Environment variable consulted when no token is given on the CLI.
const TOKEN_ENV_VAR: &str = "DISCORD_BOT_TOKEN";

// ============================================================================
// HTTP Client Configuration
// ============================================================================

/// Redirect policy with a low hop limit and loop detection.
///
/// Feed URLs redirect routinely (feed proxies, http→https upgrades), but a
/// chain longer than three hops is a misconfigured feed, not a feature.
fn create_redirect_policy() -> Policy {
    Policy::custom(|attempt| {
        if attempt.previous().len() >= 3 {
            return attempt.error("Too many redirects (max 3)");
        }

        let url = attempt.url();
        for prev in attempt.previous() {
            if prev.as_str() == url.as_str() {
                return attempt.error("Redirect loop detected");
            }
        }

        tracing::debug!(
            from = %attempt.previous().last().map(|u| u.as_str()).unwrap_or("initial"),
            to = %url,
            hop = attempt.previous().len() + 1,
            "Following redirect"
        );

        attempt.follow()
    })
}

/// Shared HTTP client for feed fetches and Discord calls.
pub fn create_http_client() -> Result<reqwest::Client, reqwest::Error> {
    reqwest::Client::builder()
        .user_agent(concat!("crier/", env!("CARGO_PKG_VERSION")))
        .redirect(create_redirect_policy())
        .pool_max_idle_per_host(4)
        .pool_idle_timeout(Duration::from_secs(30))
        .tcp_keepalive(Duration::from_secs(60))
        .timeout(Duration::from_secs(30))
        .build()
}

// ============================================================================
// Token resolution
// ============================================================================

/// Resolve the bot token: CLI flag, then `DISCORD_BOT_TOKEN`, then the
/// config file. Whitespace-only values are treated as absent.
pub fn resolve_token(cli_token: Option<String>, config: &Config) -> Result<SecretString> {
    fn non_empty(t: String) -> Option<String> {
        if t.trim().is_empty() {
            None
        } else {
            Some(t)
        }
    }

    let token = cli_token
        .and_then(non_empty)
        .or_else(|| std::env::var(TOKEN_ENV_VAR).ok().and_then(non_empty))
        .or_else(|| config.discord_token.clone().and_then(non_empty))
        .with_context(|| {
            format!(
                "No Discord token: pass --token, set {TOKEN_ENV_VAR}, or add discord_token to the config"
            )
        })?;

    Ok(SecretString::from(token))
}

// ============================================================================
// Application
// ============================================================================

/// The assembled bot: config plus the long-lived clients every pass shares.
pub struct App {
    config: Config,
    db: Database,
    discord: DiscordClient,
    http: reqwest::Client,
}

impl App {
    /// Open the ledger and build the shared clients.
    ///
    /// Any failure here is a startup failure; the process should exit
    /// non-zero rather than limp along without a working ledger or client.
    pub async fn bootstrap(config: Config, token: SecretString) -> Result<Self> {
        let db = Database::open(&config.db_path)
            .await
            .with_context(|| format!("Failed to open ledger database at '{}'", config.db_path))?;

        let http = create_http_client().context("Failed to build HTTP client")?;
        let discord = DiscordClient::new(http.clone(), token, None)
            .context("Failed to build Discord client")?;

        Ok(Self {
            config,
            db,
            discord,
            http,
        })
    }

    /// Run a single reconciliation pass over all configured feeds.
    ///
    /// Per-feed failures are contained inside the pass; this never fails.
    pub async fn run_once(&self) -> PassStats {
        run_pass(&self.http, &self.config, &self.db, &self.discord).await
    }

    /// Run as a daemon: serve health probes and reconcile on a fixed
    /// interval (first pass immediately) until Ctrl-C.
    pub async fn run(self) -> Result<()> {
        let ready: ReadyFlag = Arc::new(AtomicBool::new(false));

        let health_addr = self.config.health_addr.clone();
        let health_ready = ready.clone();
        tokio::spawn(async move {
            if let Err(e) = health::serve(&health_addr, health_ready).await {
                tracing::error!(addr = %health_addr, error = %e, "Health endpoint server failed");
            }
        });

        // Startup is complete once the clients exist; readiness does not
        // wait for the first pass, which can legitimately take minutes.
        ready.store(true, Ordering::SeqCst);
        tracing::info!(
            feeds = self.config.feeds.len(),
            interval_secs = self.config.poll_interval_secs,
            "Starting reconciliation schedule"
        );

        let mut ticker =
            tokio::time::interval(Duration::from_secs(self.config.poll_interval_secs));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.run_once().await;
                }
                result = tokio::signal::ctrl_c() => {
                    result.context("Failed to listen for shutdown signal")?;
                    tracing::info!("Shutdown signal received, stopping");
                    return Ok(());
                }
            }
        }
    }
}
