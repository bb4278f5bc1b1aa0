//! API route definitions

use axum::{
    routing::{get, post},
    Router,
};

use super::handlers;
use super::websocket::ws_handler;
use super::AppState;

/// Create all API routes
pub fn create_routes(state: AppState) -> Router {
    Router::new()
        // Health check
        .route("/api/health", get(handlers::health_check))

        // Account health and circuit breaker
        .route("/api/account", get(handlers::get_account))
        .route("/api/resume", post(handlers::resume_trading))

        // Positions
        .route("/api/positions", get(handlers::get_positions))
        .route("/api/positions/open", get(handlers::get_open_positions))
        .route("/api/positions/:id", get(handlers::get_position))

        // Statistics
        .route("/api/stats", get(handlers::get_stats))

        // AutoTrader control
        .route("/api/autotrader/status", get(handlers::get_autotrader_status))
        .route("/api/autotrader/start", post(handlers::start_autotrader))
        .route("/api/autotrader/stop", post(handlers::stop_autotrader))

        // WebSocket
        .route("/ws", get(ws_handler))

        .with_state(state)
}
