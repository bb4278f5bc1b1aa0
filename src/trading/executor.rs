use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::{info, warn};
use uuid::Uuid;

/// Fills more than this far from the validated price get flagged
const FILL_DEVIATION_WARN: f64 = 0.05;

#[derive(Debug, Clone)]
pub struct Fill {
    pub signature: String,
    pub price_sol: f64,
    pub filled_at: DateTime<Utc>,
}

/// Places the actual trades. Signing and broadcast live behind this seam.
#[async_trait]
pub trait TradeExecutor: Send + Sync {
    async fn buy(&self, token_address: &str, amount_sol: f64, expected_price_sol: f64) -> Result<Fill>;

    async fn sell(&self, token_address: &str, token_amount: u64, expected_price_sol: f64) -> Result<Fill>;
}

/// Fills every order at the validated quote price
#[derive(Debug, Default, Clone)]
pub struct PaperExecutor;

impl PaperExecutor {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl TradeExecutor for PaperExecutor {
    async fn buy(&self, token_address: &str, amount_sol: f64, expected_price_sol: f64) -> Result<Fill> {
        info!(
            "📝 [PAPER BUY] {:.4} SOL of {} @ {:.10} SOL",
            amount_sol, token_address, expected_price_sol
        );
        Ok(Fill {
            signature: format!("PAPER_BUY_{}", Uuid::new_v4()),
            price_sol: expected_price_sol,
            filled_at: Utc::now(),
        })
    }

    async fn sell(&self, token_address: &str, token_amount: u64, expected_price_sol: f64) -> Result<Fill> {
        info!(
            "📝 [PAPER SELL] {} units of {} @ {:.10} SOL",
            token_amount, token_address, expected_price_sol
        );
        Ok(Fill {
            signature: format!("PAPER_SELL_{}", Uuid::new_v4()),
            price_sol: expected_price_sol,
            filled_at: Utc::now(),
        })
    }
}

/// Logs a warning when a fill drifted from the price we validated against.
/// Returns the relative deviation.
pub fn check_fill_deviation(side: &str, token_address: &str, expected: f64, fill: &Fill) -> f64 {
    if expected <= 0.0 {
        return 0.0;
    }
    let deviation = (fill.price_sol - expected).abs() / expected;
    if deviation > FILL_DEVIATION_WARN {
        warn!(
            "⚠️ {} fill for {} at {} deviated {:.1}% from validated price ({:.10} vs {:.10})",
            side,
            token_address,
            fill.filled_at.format("%H:%M:%S"),
            deviation * 100.0,
            fill.price_sol,
            expected
        );
    }
    deviation
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_paper_fills_at_expected_price() {
        let executor = PaperExecutor::new();
        let fill = tokio_test::assert_ok!(executor.buy("MintA", 0.08, 0.001).await);
        assert_eq!(fill.price_sol, 0.001);
        assert!(fill.signature.starts_with("PAPER_BUY_"));

        let fill = tokio_test::assert_ok!(executor.sell("MintA", 80_000_000, 0.0015).await);
        assert_eq!(fill.price_sol, 0.0015);
        assert!(fill.signature.starts_with("PAPER_SELL_"));
    }

    #[test]
    fn test_fill_deviation() {
        let fill = Fill {
            signature: "x".to_string(),
            price_sol: 0.0011,
            filled_at: Utc::now(),
        };
        let deviation = check_fill_deviation("BUY", "MintA", 0.001, &fill);
        assert!((deviation - 0.1).abs() < 1e-9);
        assert_eq!(check_fill_deviation("BUY", "MintA", 0.0, &fill), 0.0);
    }
}
