use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::models::account::PauseReason;

/// Failure taxonomy of the quote oracle. Only `NoRoute` says anything about
/// liquidity; every other kind is about the oracle itself.
#[derive(Debug, Clone, Error, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "detail")]
pub enum QuoteError {
    #[error("Rate limited by quote oracle (retry after {retry_after_ms:?} ms)")]
    RateLimited { retry_after_ms: Option<u64> },

    #[error("No route: {0}")]
    NoRoute(String),

    #[error("Network error: {0}")]
    NetworkError(String),

    #[error("Quote request timed out after {0} ms")]
    Timeout(u64),

    #[error("Invalid quote response: {0}")]
    InvalidResponse(String),

    #[error("Invalid quote request: {0}")]
    InvalidRequest(String),
}

impl QuoteError {
    /// Transient failures are retried inside the client and, once exhausted,
    /// never treated as evidence about the token.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::RateLimited { .. } | Self::NetworkError(_) | Self::Timeout(_)
        )
    }

    pub fn is_no_route(&self) -> bool {
        matches!(self, Self::NoRoute(_))
    }

    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::RateLimited { retry_after_ms: Some(ms) } => Some(Duration::from_millis(*ms)),
            _ => None,
        }
    }
}

#[derive(Debug, Error)]
pub enum TraderbotError {
    #[error("Position already open for token {0}")]
    DuplicatePosition(String),

    #[error("Max concurrent positions reached ({0})")]
    AtCapacity(usize),

    #[error("Insufficient balance: {0}")]
    InsufficientBalance(String),

    #[error("Invalid amount: {0}")]
    InvalidAmount(String),

    #[error("Position not found: {0}")]
    PositionNotFound(String),

    #[error("Position {0} is not open")]
    PositionNotOpen(String),

    #[error("Circuit breaker tripped: {0}")]
    CircuitBreakerTripped(PauseReason),

    #[error("Trading is not paused")]
    NotPaused,

    #[error("Configuration error: {0}")]
    ConfigError(String),
}
