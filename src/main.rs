use anyhow::{Context, Result};
use dotenv::dotenv;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

mod api;
mod config;
mod error;
mod models;
mod tracker;
mod web;

use crate::api::dexscreener::DexScreenerClient;
use crate::config::Config;
use crate::models::token::load_universe;
use crate::tracker::{LastKnownCache, RefreshScheduler, SchedulerStatus};
use crate::web::AppState;

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables
    dotenv().ok();

    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = Arc::new(Config::load()?);
    info!("Configuration loaded successfully");

    let tokens = Arc::new(
        load_universe(config.tokens_file.as_deref()).context("Failed to load token universe")?,
    );
    info!(
        "Tracking {} tokens: {}",
        tokens.len(),
        tokens.iter().map(|t| t.symbol.as_str()).collect::<Vec<_>>().join(", ")
    );

    let client = Arc::new(DexScreenerClient::new(
        &config.dexscreener_base_url,
        config.request_timeout(),
    )?);
    info!("DEX Screener client initialized ({})", config.dexscreener_base_url);

    let cache = LastKnownCache::new();
    let status = SchedulerStatus::new();
    let state = AppState::new(config.clone(), tokens.clone(), cache.clone(), status.clone());

    let scheduler = Arc::new(RefreshScheduler::new(
        config.scheduler_config(),
        tokens,
        client,
        cache,
        Arc::new(state.clone()),
        status,
    ));

    info!("Initializing price tracker...");
    scheduler.start().context("Failed to start price refresh loop")?;
    info!("Price tracker initialized successfully");

    let served = web::server::start_server(state, shutdown_signal()).await;

    scheduler.stop().await;
    served
}
