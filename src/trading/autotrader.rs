use anyhow::{anyhow, Context, Result};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::{watch, Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::Duration;
use tracing::{info, warn};

use crate::api::feed::OpportunitySource;
use crate::api::jupiter::QuoteOracle;
use crate::config::Config;
use crate::error::TraderbotError;
use crate::models::{AccountState, PerformanceStats};
use crate::trading::circuit_breaker::CircuitBreaker;
use crate::trading::discovery::{Discovery, DiscoveryConfig};
use crate::trading::executor::TradeExecutor;
use crate::trading::exit::ExitPolicy;
use crate::trading::monitor::PositionMonitor;
use crate::trading::position::PositionStore;
use crate::trading::validator::RoundTripValidator;

/// Snapshot of the two background loops for the operator API
#[derive(Debug, Clone, Serialize)]
pub struct AutoTraderStatus {
    pub running: bool,
    pub paused: bool,
    pub open_positions: usize,
    pub max_concurrent_positions: usize,
    pub monitor_cycles: u64,
    pub sources: usize,
    pub sources_in_cooldown: usize,
}

/// Owns the discovery and monitor loops and starts/stops them together.
pub struct AutoTrader {
    store: Arc<PositionStore>,
    discovery: Arc<Discovery>,
    monitor: Arc<PositionMonitor>,
    running: Arc<RwLock<bool>>,
    shutdown_tx: Mutex<Option<watch::Sender<bool>>>,
    task_handles: Mutex<Vec<JoinHandle<()>>>,
}

impl AutoTrader {
    pub fn new(
        config: &Config,
        store: Arc<PositionStore>,
        oracle: Arc<dyn QuoteOracle>,
        sources: Vec<Arc<dyn OpportunitySource>>,
        executor: Arc<dyn TradeExecutor>,
    ) -> Self {
        let validator = Arc::new(RoundTripValidator::new(oracle, config.token_decimals));

        let discovery = Arc::new(Discovery::new(
            sources,
            store.clone(),
            validator.clone(),
            executor.clone(),
            DiscoveryConfig::from_config(config),
        ));

        let monitor = Arc::new(PositionMonitor::new(
            store.clone(),
            validator,
            executor,
            ExitPolicy::from_config(config),
            CircuitBreaker::from_config(config),
            Duration::from_secs(config.monitor_interval_secs),
            Duration::from_secs(config.monitor_start_delay_secs),
            config.status_every_cycles,
        ));

        Self {
            store,
            discovery,
            monitor,
            running: Arc::new(RwLock::new(false)),
            shutdown_tx: Mutex::new(None),
            task_handles: Mutex::new(Vec::new()),
        }
    }

    pub fn store(&self) -> Arc<PositionStore> {
        self.store.clone()
    }

    // --- Control Methods ---

    pub async fn start(&self) -> Result<()> {
        let mut running_guard = self.running.write().await;
        if *running_guard {
            warn!("AutoTrader start requested but already running.");
            return Err(anyhow!("AutoTrader is already running"));
        }

        info!("Starting AutoTrader background tasks...");
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let monitor_handle = self.monitor.clone().spawn(shutdown_rx.clone());
        let discovery_handle = self.discovery.clone().spawn(shutdown_rx);

        *self.task_handles.lock().await = vec![monitor_handle, discovery_handle];
        *self.shutdown_tx.lock().await = Some(shutdown_tx);
        *running_guard = true;

        info!("AutoTrader started successfully");
        Ok(())
    }

    /// Signals both loops and waits for them; an in-flight cycle finishes first
    pub async fn stop(&self) -> Result<()> {
        let mut running_guard = self.running.write().await;
        if !*running_guard {
            return Ok(());
        }

        if let Some(tx) = self.shutdown_tx.lock().await.take() {
            // Receivers only vanish once the loops have already exited
            let _ = tx.send(true);
        }

        let handles: Vec<JoinHandle<()>> = self.task_handles.lock().await.drain(..).collect();
        for handle in handles {
            handle.await.context("Failed to wait for AutoTrader task to finish")?;
        }
        *running_guard = false;

        info!("AutoTrader stopped successfully");
        Ok(())
    }

    pub async fn is_running(&self) -> bool {
        *self.running.read().await
    }

    pub async fn status(&self) -> AutoTraderStatus {
        AutoTraderStatus {
            running: self.is_running().await,
            paused: self.store.is_paused().await,
            open_positions: self.store.open_count().await,
            max_concurrent_positions: self.store.max_concurrent_positions(),
            monitor_cycles: self.monitor.cycles(),
            sources: self.discovery.source_count(),
            sources_in_cooldown: self.discovery.cooldown_count().await,
        }
    }

    /// Operator action: clears a circuit-breaker pause and resets the loss streak
    pub async fn resume_trading(&self) -> Result<AccountState, TraderbotError> {
        self.store.resume().await?;
        Ok(self.store.account().await)
    }

    pub async fn get_performance_stats(&self) -> PerformanceStats {
        self.store.stats().await
    }
}
