//! Liveness and readiness probes for orchestration.
//!
//! `/healthz` answers as soon as the process is serving; `/readyz` stays
//! 503 until startup (config, ledger, Discord client) has completed, then
//! flips permanently to 200.

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::get;
use axum::Router;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::net::TcpListener;

/// Shared readiness flag, flipped once startup completes.
pub type ReadyFlag = Arc<AtomicBool>;

/// Create the probe router.
pub fn health_router(ready: ReadyFlag) -> Router {
    Router::new()
        .route("/healthz", get(liveness))
        .route("/readyz", get(readiness))
        .with_state(ready)
}

async fn liveness() -> &'static str {
    "I'm alive!"
}

async fn readiness(State(ready): State<ReadyFlag>) -> (StatusCode, &'static str) {
    if ready.load(Ordering::SeqCst) {
        (StatusCode::OK, "I'm ready!")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "I'm not ready yet.")
    }
}

/// Bind and serve the probe endpoints until the process exits.
pub async fn serve(addr: &str, ready: ReadyFlag) -> std::io::Result<()> {
    let listener = TcpListener::bind(addr).await?;
    tracing::info!(addr = %listener.local_addr()?, "Health endpoints listening");
    axum::serve(listener, health_router(ready)).await
}
