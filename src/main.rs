use anyhow::{Context, Result};
use dotenv::dotenv;
use std::sync::Arc;
use tokio::time::Duration;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

mod api;
mod config;
mod error;
mod models;
mod trading;
mod web;

use crate::api::feed::{HttpOpportunitySource, OpportunitySource};
use crate::api::jupiter::JupiterClient;
use crate::config::Config;
use crate::trading::autotrader::AutoTrader;
use crate::trading::executor::PaperExecutor;
use crate::trading::position::PositionStore;
use crate::web::AppState;

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = Arc::new(Config::load()?);
    info!(
        "Configuration loaded: {:.4} SOL start, {} max positions, {:.0}% sizing",
        config.starting_balance_sol,
        config.max_concurrent_positions,
        config.position_size_fraction * 100.0
    );

    let jupiter_client = Arc::new(JupiterClient::new(&config)?);
    info!("Quote oracle client initialized ({})", config.jupiter_api_url);

    let feed_timeout = Duration::from_millis(config.quote_timeout_ms);
    let mut sources: Vec<Arc<dyn OpportunitySource>> = Vec::new();
    for url in &config.opportunity_feed_urls {
        let source = HttpOpportunitySource::new(url, feed_timeout)
            .with_context(|| format!("Failed to create opportunity source for {}", url))?;
        sources.push(Arc::new(source));
    }
    if sources.is_empty() {
        warn!("No OPPORTUNITY_FEED_URLS configured; discovery will find nothing.");
    }

    let store = Arc::new(
        PositionStore::load(
            &config.ledger_path,
            config.starting_balance_sol,
            config.max_concurrent_positions,
            config.take_profit_threshold,
        )
        .await?,
    );

    let auto_trader = Arc::new(AutoTrader::new(
        &config,
        store.clone(),
        jupiter_client,
        sources,
        Arc::new(PaperExecutor::new()),
    ));
    auto_trader.start().await?;

    let state = AppState::new(auto_trader.clone(), config.clone());
    let server = tokio::spawn(web::server::start_server(state, config.clone()));

    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            result.context("Failed to listen for shutdown signal")?;
            info!("Shutdown signal received.");
        }
        result = server => {
            match result {
                Ok(Err(e)) => error!("API server exited: {:?}", e),
                Err(e) => error!("API server task failed: {:?}", e),
                Ok(Ok(())) => warn!("API server exited."),
            }
        }
    }

    auto_trader.stop().await?;
    store.save().await?;

    let account = store.account().await;
    info!(
        "Ledger saved. Balance {:.4} SOL, {} open positions.",
        account.current_balance_sol,
        store.open_count().await
    );
    Ok(())
}
