//! Request and Response DTOs for the Web API

use serde::{Deserialize, Serialize};
use chrono::{DateTime, Utc};

use crate::models::{PauseReason, Position};

// ============================================================================
// Health & Status
// ============================================================================

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub timestamp: DateTime<Utc>,
}

// ============================================================================
// Account
// ============================================================================

#[derive(Debug, Serialize)]
pub struct AccountResponse {
    pub starting_balance_sol: f64,
    /// Free cash, open positions excluded
    pub current_balance_sol: f64,
    pub committed_sol: f64,
    pub realized_pnl_sol: f64,
    /// Fraction below the starting balance on the configured basis
    pub drawdown: f64,
    pub drawdown_basis: String,
    /// "running" or "paused"
    pub trading_state: String,
    pub pause_reason: Option<PauseReason>,
    pub pause_message: Option<String>,
    pub paused_at: Option<DateTime<Utc>>,
    pub last_resumed_at: Option<DateTime<Utc>>,
    pub consecutive_losses: usize,
}

// ============================================================================
// Positions
// ============================================================================

#[derive(Debug, Serialize)]
pub struct PositionResponse {
    pub id: String,
    pub token_address: String,
    pub token_symbol: String,
    pub source: String,
    pub amount_in_sol: f64,
    pub token_amount: u64,
    pub entry_price_sol: f64,
    pub current_price_sol: f64,
    pub peak_price_sol: f64,
    pub current_value_sol: f64,
    pub pnl_percent: f64,
    pub tp1_hit: bool,
    pub status: String,
    pub exit_reason: Option<String>,
    pub exit_price_sol: Option<f64>,
    pub pnl_sol: Option<f64>,
    pub opened_at: DateTime<Utc>,
    pub closed_at: Option<DateTime<Utc>>,
}

impl From<&Position> for PositionResponse {
    fn from(p: &Position) -> Self {
        let (current_value_sol, pnl_percent) = if p.is_open() {
            (p.current_value_sol(), p.pnl_fraction() * 100.0)
        } else {
            let pnl = p.pnl_sol.unwrap_or(0.0);
            let pct = if p.amount_in_sol > 0.0 { pnl / p.amount_in_sol * 100.0 } else { 0.0 };
            (p.amount_in_sol + pnl, pct)
        };

        Self {
            id: p.id.clone(),
            token_address: p.token_address.clone(),
            token_symbol: p.token_symbol.clone(),
            source: p.source.clone(),
            amount_in_sol: p.amount_in_sol,
            token_amount: p.token_amount,
            entry_price_sol: p.entry_price_sol,
            current_price_sol: p.current_price_sol,
            peak_price_sol: p.peak_price_sol,
            current_value_sol,
            pnl_percent,
            tp1_hit: p.tp1_hit,
            status: p.status.to_string(),
            exit_reason: p.exit_reason.map(|r| r.to_string()),
            exit_price_sol: p.exit_price_sol,
            pnl_sol: p.pnl_sol,
            opened_at: p.opened_at,
            closed_at: p.exit_time,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct PositionsListResponse {
    pub positions: Vec<PositionResponse>,
    pub total: usize,
}

#[derive(Debug, Deserialize)]
pub struct PositionsQuery {
    /// "open", "closed" or absent for everything
    pub status: Option<String>,
    pub limit: Option<usize>,
}

// ============================================================================
// Statistics
// ============================================================================

#[derive(Debug, Serialize)]
pub struct StatsResponse {
    pub total_trades: u32,
    pub open_positions: u32,
    pub closed_positions: u32,
    pub winning_trades: u32,
    pub losing_trades: u32,
    pub written_off: u32,
    pub win_rate: f64,
    pub total_pnl_sol: f64,
    pub roi_percent: f64,
    pub committed_sol: f64,
    pub best_trade_pnl: f64,
    pub worst_trade_pnl: f64,
}

// ============================================================================
// Common
// ============================================================================

#[derive(Debug, Serialize)]
pub struct SuccessResponse {
    pub success: bool,
    pub message: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub details: Option<String>,
}
