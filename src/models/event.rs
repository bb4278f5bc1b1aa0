use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::account::PauseReason;

/// Lifecycle events broadcast to operator WebSocket clients
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum TradeEvent {
    PositionOpened {
        id: String,
        token_address: String,
        token_symbol: String,
        amount_in_sol: f64,
        entry_price_sol: f64,
        timestamp: DateTime<Utc>,
    },

    PositionClosed {
        id: String,
        token_address: String,
        token_symbol: String,
        exit_price_sol: f64,
        pnl_sol: f64,
        pnl_percent: f64,
        exit_reason: String,
        timestamp: DateTime<Utc>,
    },

    /// Sell route vanished; capital written off
    PositionWrittenOff {
        id: String,
        token_address: String,
        token_symbol: String,
        lost_sol: f64,
        timestamp: DateTime<Utc>,
    },

    TradingPaused {
        reason: PauseReason,
        timestamp: DateTime<Utc>,
    },

    TradingResumed {
        timestamp: DateTime<Utc>,
    },

    Ping {
        timestamp: DateTime<Utc>,
    },
}
