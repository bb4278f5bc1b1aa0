//! Web API module
//!
//! Operator surface over the running engine: account health, positions,
//! statistics, loop control, resume after a circuit-breaker pause, and a
//! WebSocket stream of lifecycle events.

pub mod server;
pub mod routes;
pub mod handlers;
pub mod websocket;
pub mod models;

use std::sync::Arc;
use tokio::sync::broadcast;

use crate::config::Config;
use crate::models::TradeEvent;
use crate::trading::autotrader::AutoTrader;
use crate::trading::position::PositionStore;

/// Shared application state for all API handlers
#[derive(Clone)]
pub struct AppState {
    pub auto_trader: Arc<AutoTrader>,
    pub store: Arc<PositionStore>,
    pub config: Arc<Config>,
}

impl AppState {
    pub fn new(auto_trader: Arc<AutoTrader>, config: Arc<Config>) -> Self {
        let store = auto_trader.store();
        Self {
            auto_trader,
            store,
            config,
        }
    }

    /// Lifecycle events published by the position store
    pub fn subscribe_ws(&self) -> broadcast::Receiver<TradeEvent> {
        self.store.subscribe()
    }
}
