use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;

use crier::app::{self, App};
use crier::config::Config;

#[derive(Parser, Debug)]
#[command(
    name = "crier",
    version,
    about = "Announce new RSS/Atom feed entries in Discord channels"
)]
struct Args {
    /// Discord bot token (falls back to DISCORD_BOT_TOKEN, then the config file)
    #[arg(short = 't', long, value_name = "TOKEN")]
    token: Option<String>,

    /// Path to the TOML config file
    #[arg(short = 'c', long, value_name = "FILE", default_value = "config.toml")]
    config: PathBuf,

    /// Run one reconciliation pass and exit
    #[arg(long)]
    once: bool,

    /// Enable debug logging (RUST_LOG still takes precedence)
    #[arg(long)]
    debug: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let default_filter = if args.debug { "crier=debug,info" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_filter)),
        )
        .init();

    // Startup failures (bad config, missing token, unreachable ledger) exit
    // non-zero; per-feed failures during a pass are logged and absorbed.
    let config = Config::load(&args.config)?;
    let token = app::resolve_token(args.token, &config)?;
    let app = App::bootstrap(config, token).await?;

    if args.once {
        let stats = app.run_once().await;
        tracing::info!(
            delivered = stats.entries_delivered,
            seeded = stats.entries_seeded,
            failed = stats.feeds_failed,
            "Single pass finished"
        );
        Ok(())
    } else {
        app.run().await
    }
}
