use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Why the circuit breaker latched.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PauseReason {
    BalanceFloor { balance_sol: f64, floor_sol: f64 },
    MaxDrawdown { drawdown: f64, limit: f64 },
    LossStreak { consecutive_losses: usize },
}

impl std::fmt::Display for PauseReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::BalanceFloor { balance_sol, floor_sol } => write!(
                f,
                "balance {:.4} SOL below floor {:.4} SOL",
                balance_sol, floor_sol
            ),
            Self::MaxDrawdown { drawdown, limit } => write!(
                f,
                "drawdown {:.1}% exceeds limit {:.1}%",
                drawdown * 100.0,
                limit * 100.0
            ),
            Self::LossStreak { consecutive_losses } => {
                write!(f, "{} consecutive losing closes", consecutive_losses)
            }
        }
    }
}

/// Sticky latch. Only the circuit breaker sets `Paused`; only an operator
/// resume clears it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum TradingState {
    Running,
    Paused {
        reason: PauseReason,
        paused_at: DateTime<Utc>,
    },
}

impl TradingState {
    pub fn is_paused(&self) -> bool {
        matches!(self, Self::Paused { .. })
    }

    pub fn pause_reason(&self) -> Option<&PauseReason> {
        match self {
            Self::Paused { reason, .. } => Some(reason),
            Self::Running => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountState {
    pub starting_balance_sol: f64,
    /// Free cash. Capital in open positions is already deducted.
    pub current_balance_sol: f64,
    pub trading_state: TradingState,
    /// Loss streaks only count closes after this instant.
    pub last_resumed_at: Option<DateTime<Utc>>,
}

impl AccountState {
    pub fn new(starting_balance_sol: f64) -> Self {
        Self {
            starting_balance_sol,
            current_balance_sol: starting_balance_sol,
            trading_state: TradingState::Running,
            last_resumed_at: None,
        }
    }

    pub fn is_paused(&self) -> bool {
        self.trading_state.is_paused()
    }
}
