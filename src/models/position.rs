use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};

/// Slack for comparing price ratios computed from integer quote amounts
pub const RATIO_EPSILON: f64 = 1e-9;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PositionStatus {
    Open,
    ClosedProfit,
    ClosedLoss,
    /// Written off: no sell route, capital never returned
    Failed,
}

impl std::fmt::Display for PositionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Open => write!(f, "Open"),
            Self::ClosedProfit => write!(f, "Closed (Profit)"),
            Self::ClosedLoss => write!(f, "Closed (Loss)"),
            Self::Failed => write!(f, "Failed"),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ExitReason {
    StopLoss,
    TrailingStop,
    MaxHoldTime,
    NoSellRoute,
}

impl std::fmt::Display for ExitReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::StopLoss => write!(f, "Stop Loss"),
            Self::TrailingStop => write!(f, "Trailing Stop"),
            Self::MaxHoldTime => write!(f, "Max Hold Time"),
            Self::NoSellRoute => write!(f, "No Sell Route"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    pub id: String,
    pub token_address: String,
    pub token_symbol: String,
    pub source: String,

    // Entry details
    pub amount_in_sol: f64,
    /// Raw token units from the validated buy leg; every sell quote is sized at this
    pub token_amount: u64,
    pub token_decimals: u8,
    pub entry_price_sol: f64,
    pub entry_signature: String,
    pub opened_at: DateTime<Utc>,

    // Monitor-owned tracking
    pub current_price_sol: f64,
    pub peak_price_sol: f64,
    pub tp1_hit: bool,
    pub tp1_hit_at: Option<DateTime<Utc>>,
    pub last_priced_at: Option<DateTime<Utc>>,

    // Set once, together with the status transition
    pub status: PositionStatus,
    pub exit_reason: Option<ExitReason>,
    pub exit_price_sol: Option<f64>,
    pub exit_time: Option<DateTime<Utc>>,
    pub exit_signature: Option<String>,
    pub pnl_sol: Option<f64>,
}

impl Position {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        token_address: &str,
        token_symbol: &str,
        source: &str,
        amount_in_sol: f64,
        token_amount: u64,
        token_decimals: u8,
        entry_price_sol: f64,
        entry_signature: &str,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            token_address: token_address.to_string(),
            token_symbol: token_symbol.to_string(),
            source: source.to_string(),
            amount_in_sol,
            token_amount,
            token_decimals,
            entry_price_sol,
            entry_signature: entry_signature.to_string(),
            opened_at: Utc::now(),
            current_price_sol: entry_price_sol,
            peak_price_sol: entry_price_sol,
            tp1_hit: false,
            tp1_hit_at: None,
            last_priced_at: None,
            status: PositionStatus::Open,
            exit_reason: None,
            exit_price_sol: None,
            exit_time: None,
            exit_signature: None,
            pnl_sol: None,
        }
    }

    pub fn is_open(&self) -> bool {
        self.status == PositionStatus::Open
    }

    /// Unrealized gain as a fraction of entry (1.0 = +100%)
    pub fn pnl_fraction(&self) -> f64 {
        fraction_change(self.entry_price_sol, self.current_price_sol)
    }

    /// Fraction the current price sits below the peak
    pub fn drop_from_peak(&self) -> f64 {
        if self.peak_price_sol <= 0.0 {
            return 0.0;
        }
        (self.peak_price_sol - self.current_price_sol) / self.peak_price_sol
    }

    pub fn held_for(&self, now: DateTime<Utc>) -> ChronoDuration {
        now.signed_duration_since(self.opened_at)
    }

    /// Mark-to-market value of the token quantity in SOL
    pub fn current_value_sol(&self) -> f64 {
        self.amount_in_sol * (1.0 + self.pnl_fraction())
    }

    /// Record a validated price. The peak never decreases and TP1 never
    /// un-sets. Returns true when this price is the one that crossed TP1.
    pub fn apply_price(&mut self, price_sol: f64, take_profit_threshold: f64, now: DateTime<Utc>) -> bool {
        self.current_price_sol = price_sol;
        self.last_priced_at = Some(now);

        if price_sol > self.peak_price_sol {
            self.peak_price_sol = price_sol;
        }

        if !self.tp1_hit && self.pnl_fraction() >= take_profit_threshold - RATIO_EPSILON {
            self.tp1_hit = true;
            self.tp1_hit_at = Some(now);
            return true;
        }
        false
    }

    /// Realize the position at `exit_price_sol`. Returns the realized P&L.
    pub fn close(
        &mut self,
        exit_price_sol: f64,
        reason: ExitReason,
        exit_signature: &str,
        now: DateTime<Utc>,
    ) -> f64 {
        let pnl = self.amount_in_sol * fraction_change(self.entry_price_sol, exit_price_sol);

        self.current_price_sol = exit_price_sol;
        self.status = if pnl >= 0.0 {
            PositionStatus::ClosedProfit
        } else {
            PositionStatus::ClosedLoss
        };
        self.exit_reason = Some(reason);
        self.exit_price_sol = Some(exit_price_sol);
        self.exit_time = Some(now);
        self.exit_signature = Some(exit_signature.to_string());
        self.pnl_sol = Some(pnl);
        pnl
    }

    /// Total loss: no sell route exists, nothing comes back
    pub fn write_off(&mut self, now: DateTime<Utc>) -> f64 {
        let pnl = -self.amount_in_sol;
        self.status = PositionStatus::Failed;
        self.exit_reason = Some(ExitReason::NoSellRoute);
        self.exit_price_sol = Some(0.0);
        self.exit_time = Some(now);
        self.pnl_sol = Some(pnl);
        pnl
    }

    pub fn is_loss(&self) -> bool {
        matches!(self.status, PositionStatus::ClosedLoss | PositionStatus::Failed)
    }
}

fn fraction_change(from: f64, to: f64) -> f64 {
    if from <= 0.0 {
        return 0.0;
    }
    (to - from) / from
}

/// Realized performance over closed positions
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PerformanceStats {
    pub total_trades: u32,
    pub open_positions: u32,
    pub closed_positions: u32,
    pub winning_trades: u32,
    pub losing_trades: u32,
    pub written_off: u32,
    pub win_rate: f64,
    pub total_realized_pnl_sol: f64,
    pub committed_sol: f64,
    pub best_trade_pnl_sol: f64,
    pub worst_trade_pnl_sol: f64,
}

impl PerformanceStats {
    pub fn from_positions<'a>(positions: impl IntoIterator<Item = &'a Position>) -> Self {
        let mut stats = Self::default();
        let mut best: Option<f64> = None;
        let mut worst: Option<f64> = None;

        for p in positions {
            stats.total_trades += 1;
            if p.is_open() {
                stats.open_positions += 1;
                stats.committed_sol += p.amount_in_sol;
                continue;
            }

            stats.closed_positions += 1;
            match p.status {
                PositionStatus::ClosedProfit => stats.winning_trades += 1,
                PositionStatus::ClosedLoss => stats.losing_trades += 1,
                PositionStatus::Failed => {
                    stats.losing_trades += 1;
                    stats.written_off += 1;
                }
                PositionStatus::Open => {}
            }

            let pnl = p.pnl_sol.unwrap_or(0.0);
            stats.total_realized_pnl_sol += pnl;
            best = Some(best.map_or(pnl, |b| b.max(pnl)));
            worst = Some(worst.map_or(pnl, |w| w.min(pnl)));
        }

        stats.win_rate = if stats.closed_positions > 0 {
            (stats.winning_trades as f64 / stats.closed_positions as f64) * 100.0
        } else {
            0.0
        };
        stats.best_trade_pnl_sol = best.unwrap_or(0.0);
        stats.worst_trade_pnl_sol = worst.unwrap_or(0.0);
        stats
    }
}
