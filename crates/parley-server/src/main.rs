//! # parley-server
//!
//! Presence and delivery engine for Parley direct messages.
//!
//! This binary provides:
//! - **Presence**: which users are online, across any number of devices
//! - **Delivery**: persists one-to-one messages and pushes the updated
//!   thread and sidebars to every connection of both participants
//! - **WebSocket + REST API** (axum) for clients and health checks
//! - **Rate limiting** per IP for HTTP and per session for inbound events

mod api;
mod config;
mod delivery;
mod engine;
mod error;
mod identity;
mod presence;
mod rate_limit;
mod session;
mod sidebar;
mod store;
mod ws;

#[cfg(test)]
mod testkit;

use std::sync::Arc;
use std::time::Instant;

use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use parley_store::Database;

use crate::api::AppState;
use crate::config::ServerConfig;
use crate::engine::{Engine, SessionSettings};
use crate::identity::TokenResolver;
use crate::rate_limit::RateLimiter;
use crate::store::Store;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // -----------------------------------------------------------------------
    // 1. Initialize tracing (respects RUST_LOG env var)
    // -----------------------------------------------------------------------
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,parley_server=debug")),
        )
        .init();

    info!("Starting Parley server v{}", env!("CARGO_PKG_VERSION"));

    // -----------------------------------------------------------------------
    // 2. Load configuration
    // -----------------------------------------------------------------------
    let config = ServerConfig::from_env();
    info!(?config, "Loaded configuration");
    if config.token_issuer_pubkey == [0u8; 32] {
        warn!("TOKEN_ISSUER_PUBKEY not set, every connection will be rejected");
    }

    // -----------------------------------------------------------------------
    // 3. Initialize subsystems
    // -----------------------------------------------------------------------
    let database = Database::open_at(&config.database_path)?;
    info!(path = %config.database_path.display(), "Database ready");

    let store = Store::new(database, config.store_timeout);
    let resolver = Arc::new(TokenResolver::new(config.token_issuer_pubkey));
    let engine = Arc::new(Engine::new(store, resolver, SessionSettings::from(&config)));

    // Rate limiter: 10 req/s sustained, burst of 30
    let rate_limiter = RateLimiter::default();

    let app_state = AppState {
        engine,
        rate_limiter: rate_limiter.clone(),
        config: Arc::new(config.clone()),
        started_at: Instant::now(),
    };

    // -----------------------------------------------------------------------
    // 4. Spawn background tasks
    // -----------------------------------------------------------------------

    // Periodic rate limiter cleanup (every 5 minutes, evict buckets idle >10 min)
    let rl = rate_limiter.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(std::time::Duration::from_secs(300));
        loop {
            interval.tick().await;
            rl.purge_stale(600.0).await;
        }
    });

    // -----------------------------------------------------------------------
    // 5. Run the HTTP + WebSocket server until shutdown
    // -----------------------------------------------------------------------
    tokio::select! {
        result = api::serve(app_state, config.http_addr) => {
            if let Err(e) = result {
                error!(error = %e, "HTTP server failed");
                return Err(e);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down");
        }
    }

    Ok(())
}
