use chrono::{DateTime, Duration as ChronoDuration, Utc};

use crate::config::Config;
use crate::models::position::RATIO_EPSILON;
use crate::models::{ExitReason, Position};

/// Tiered exit rules. Before TP1 a fixed stop-loss applies; once TP1 is hit
/// the stop-loss is retired and only the trailing stop (and hold ceiling)
/// can close the position.
#[derive(Debug, Clone)]
pub struct ExitPolicy {
    /// Fraction, negative (-0.30 = -30%)
    pub stop_loss_threshold: f64,
    /// Fraction of the peak given back before exiting
    pub trailing_stop_fraction: f64,
    pub max_hold: ChronoDuration,
    pub max_hold_after_tp1: ChronoDuration,
}

impl ExitPolicy {
    pub fn from_config(config: &Config) -> Self {
        Self {
            stop_loss_threshold: config.stop_loss_threshold,
            trailing_stop_fraction: config.trailing_stop_fraction,
            max_hold: ChronoDuration::minutes(config.max_hold_minutes as i64),
            max_hold_after_tp1: ChronoDuration::minutes(config.max_hold_after_tp1_minutes as i64),
        }
    }

    /// Hold ceilings are measured from the open time in both tiers.
    pub fn evaluate(&self, position: &Position, now: DateTime<Utc>) -> Option<ExitReason> {
        if !position.is_open() {
            return None;
        }
        let held = position.held_for(now);

        if position.tp1_hit {
            if position.drop_from_peak() >= self.trailing_stop_fraction - RATIO_EPSILON {
                return Some(ExitReason::TrailingStop);
            }
            if held >= self.max_hold_after_tp1 {
                return Some(ExitReason::MaxHoldTime);
            }
            return None;
        }

        if position.pnl_fraction() <= self.stop_loss_threshold + RATIO_EPSILON {
            return Some(ExitReason::StopLoss);
        }
        if held >= self.max_hold {
            return Some(ExitReason::MaxHoldTime);
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> ExitPolicy {
        ExitPolicy::from_config(&Config::default())
    }

    fn position() -> Position {
        Position::new("MintA", "AAA", "pumpfun", 0.08, 80_000_000, 6, 0.001, "sig")
    }

    #[test]
    fn test_holds_inside_band() {
        let mut p = position();
        let now = Utc::now();
        p.apply_price(0.00075, 1.0, now);
        assert_eq!(policy().evaluate(&p, now), None);
    }

    #[test]
    fn test_stop_loss_before_tp1() {
        let mut p = position();
        let now = Utc::now();
        p.apply_price(0.0007, 1.0, now);
        assert_eq!(policy().evaluate(&p, now), Some(ExitReason::StopLoss));
    }

    #[test]
    fn test_stop_loss_retired_after_tp1() {
        let mut p = position();
        let now = Utc::now();
        p.apply_price(0.002, 1.0, now);
        assert!(p.tp1_hit);
        // Far below the stop-loss level relative to entry, but the trailing
        // stop is what fires, never the stop loss.
        p.apply_price(0.0005, 1.0, now);
        assert_eq!(policy().evaluate(&p, now), Some(ExitReason::TrailingStop));
    }

    #[test]
    fn test_trailing_stop_scenario() {
        let policy = policy();
        let mut p = position();
        let now = Utc::now();

        p.apply_price(0.002, 1.0, now);
        assert!(p.tp1_hit);
        assert_eq!(policy.evaluate(&p, now), None);

        p.apply_price(0.0017, 1.0, now);
        assert_eq!(p.peak_price_sol, 0.002);
        assert_eq!(policy.evaluate(&p, now), None);

        p.apply_price(0.0015, 1.0, now);
        assert_eq!(policy.evaluate(&p, now), Some(ExitReason::TrailingStop));
    }

    #[test]
    fn test_max_hold_both_tiers() {
        let policy = ExitPolicy {
            max_hold: ChronoDuration::minutes(60),
            max_hold_after_tp1: ChronoDuration::minutes(90),
            ..policy()
        };
        let mut p = position();
        let later = p.opened_at + ChronoDuration::minutes(61);
        assert_eq!(policy.evaluate(&p, later), Some(ExitReason::MaxHoldTime));

        p.apply_price(0.0021, 1.0, p.opened_at);
        assert_eq!(policy.evaluate(&p, later), None);
        let much_later = p.opened_at + ChronoDuration::minutes(91);
        assert_eq!(policy.evaluate(&p, much_later), Some(ExitReason::MaxHoldTime));
    }
}
