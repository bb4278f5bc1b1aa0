//! Request handlers for all API endpoints

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use chrono::Utc;
use tracing::{error, info, warn};

use super::models::*;
use super::AppState;
use crate::error::TraderbotError;
use crate::models::TradingState;
use crate::trading::autotrader::AutoTraderStatus;
use crate::trading::circuit_breaker::CircuitBreaker;

type ApiError = (StatusCode, Json<ErrorResponse>);

fn api_error(status: StatusCode, error: &str, details: Option<String>) -> ApiError {
    (
        status,
        Json(ErrorResponse {
            error: error.to_string(),
            details,
        }),
    )
}

// ============================================================================
// Health Check
// ============================================================================

pub async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        timestamp: Utc::now(),
    })
}

// ============================================================================
// Account
// ============================================================================

pub async fn get_account(State(state): State<AppState>) -> Json<AccountResponse> {
    let account = state.store.account().await;
    let committed_sol = state.store.committed_sol().await;
    let stats = state.store.stats().await;
    let consecutive_losses = state.store.consecutive_losses().await;
    let breaker = CircuitBreaker::from_config(&state.config);

    let (trading_state, pause_reason, paused_at) = match &account.trading_state {
        TradingState::Running => ("running", None, None),
        TradingState::Paused { reason, paused_at } => ("paused", Some(reason.clone()), Some(*paused_at)),
    };

    Json(AccountResponse {
        starting_balance_sol: account.starting_balance_sol,
        current_balance_sol: account.current_balance_sol,
        committed_sol,
        realized_pnl_sol: stats.total_realized_pnl_sol,
        drawdown: breaker.drawdown(&account, committed_sol),
        drawdown_basis: breaker.drawdown_basis.to_string(),
        trading_state: trading_state.to_string(),
        pause_message: pause_reason.as_ref().map(|r| r.to_string()),
        pause_reason,
        paused_at,
        last_resumed_at: account.last_resumed_at,
        consecutive_losses,
    })
}

pub async fn resume_trading(
    State(state): State<AppState>,
) -> Result<Json<SuccessResponse>, ApiError> {
    match state.auto_trader.resume_trading().await {
        Ok(account) => {
            info!("Trading resumed via API, balance {:.4} SOL", account.current_balance_sol);
            Ok(Json(SuccessResponse {
                success: true,
                message: "Trading resumed".to_string(),
            }))
        }
        Err(TraderbotError::NotPaused) => Err(api_error(
            StatusCode::CONFLICT,
            "Trading is not paused",
            None,
        )),
        Err(e) => {
            error!("Failed to resume trading: {}", e);
            Err(api_error(
                StatusCode::INTERNAL_SERVER_ERROR,
                "Failed to resume trading",
                Some(e.to_string()),
            ))
        }
    }
}

// ============================================================================
// Positions
// ============================================================================

pub async fn get_positions(
    State(state): State<AppState>,
    Query(query): Query<PositionsQuery>,
) -> Result<Json<PositionsListResponse>, ApiError> {
    let positions = match query.status.as_deref() {
        None | Some("all") => state.store.all_positions().await,
        Some("open") => state.store.open_positions().await,
        Some("closed") => state.store.recent_closed(usize::MAX).await,
        Some(other) => {
            return Err(api_error(
                StatusCode::BAD_REQUEST,
                "Invalid status filter",
                Some(format!("expected open, closed or all, got '{}'", other)),
            ))
        }
    };

    let mut position_responses: Vec<PositionResponse> = positions.iter().map(PositionResponse::from).collect();
    if let Some(limit) = query.limit {
        position_responses.truncate(limit);
    }
    let total = position_responses.len();

    Ok(Json(PositionsListResponse {
        positions: position_responses,
        total,
    }))
}

pub async fn get_open_positions(State(state): State<AppState>) -> Json<PositionsListResponse> {
    let positions = state.store.open_positions().await;
    let position_responses: Vec<PositionResponse> = positions.iter().map(PositionResponse::from).collect();
    let total = position_responses.len();

    Json(PositionsListResponse {
        positions: position_responses,
        total,
    })
}

pub async fn get_position(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<PositionResponse>, ApiError> {
    match state.store.get_position(&id).await {
        Some(position) => Ok(Json(PositionResponse::from(&position))),
        None => Err(api_error(
            StatusCode::NOT_FOUND,
            "Position not found",
            Some(format!("No position with ID: {}", id)),
        )),
    }
}

// ============================================================================
// Statistics
// ============================================================================

pub async fn get_stats(State(state): State<AppState>) -> Json<StatsResponse> {
    let stats = state.auto_trader.get_performance_stats().await;
    let starting = state.store.account().await.starting_balance_sol;
    let roi_percent = if starting > 0.0 {
        stats.total_realized_pnl_sol / starting * 100.0
    } else {
        0.0
    };

    Json(StatsResponse {
        total_trades: stats.total_trades,
        open_positions: stats.open_positions,
        closed_positions: stats.closed_positions,
        winning_trades: stats.winning_trades,
        losing_trades: stats.losing_trades,
        written_off: stats.written_off,
        win_rate: stats.win_rate,
        total_pnl_sol: stats.total_realized_pnl_sol,
        roi_percent,
        committed_sol: stats.committed_sol,
        best_trade_pnl: stats.best_trade_pnl_sol,
        worst_trade_pnl: stats.worst_trade_pnl_sol,
    })
}

// ============================================================================
// AutoTrader Control
// ============================================================================

pub async fn get_autotrader_status(State(state): State<AppState>) -> Json<AutoTraderStatus> {
    Json(state.auto_trader.status().await)
}

pub async fn start_autotrader(
    State(state): State<AppState>,
) -> Result<Json<SuccessResponse>, ApiError> {
    match state.auto_trader.start().await {
        Ok(_) => {
            info!("AutoTrader started via API");
            Ok(Json(SuccessResponse {
                success: true,
                message: "AutoTrader started".to_string(),
            }))
        }
        Err(e) => {
            warn!("Failed to start AutoTrader: {}", e);
            Err(api_error(
                StatusCode::BAD_REQUEST,
                "Failed to start AutoTrader",
                Some(e.to_string()),
            ))
        }
    }
}

pub async fn stop_autotrader(
    State(state): State<AppState>,
) -> Result<Json<SuccessResponse>, ApiError> {
    match state.auto_trader.stop().await {
        Ok(_) => {
            info!("AutoTrader stopped via API");
            Ok(Json(SuccessResponse {
                success: true,
                message: "AutoTrader stopped".to_string(),
            }))
        }
        Err(e) => {
            error!("Failed to stop AutoTrader: {}", e);
            Err(api_error(
                StatusCode::INTERNAL_SERVER_ERROR,
                "Failed to stop AutoTrader",
                Some(e.to_string()),
            ))
        }
    }
}
