use tracing::debug;

use crate::config::{Config, DrawdownBasis};
use crate::models::{AccountState, PauseReason};
use crate::trading::position::PositionStore;

/// Account-level guard. Evaluated once per monitor cycle; when it trips,
/// the store latches `Paused` until an operator resumes.
#[derive(Debug, Clone)]
pub struct CircuitBreaker {
    pub min_balance_sol: f64,
    pub max_drawdown: f64,
    pub drawdown_basis: DrawdownBasis,
    /// Zero disables the loss-streak breaker
    pub loss_streak_limit: usize,
}

impl CircuitBreaker {
    pub fn from_config(config: &Config) -> Self {
        Self {
            min_balance_sol: config.min_balance_sol,
            max_drawdown: config.max_drawdown,
            drawdown_basis: config.drawdown_basis,
            loss_streak_limit: config.loss_streak_limit,
        }
    }

    pub fn drawdown(&self, account: &AccountState, committed_sol: f64) -> f64 {
        if account.starting_balance_sol <= 0.0 {
            return 0.0;
        }
        let basis = match self.drawdown_basis {
            DrawdownBasis::Cash => account.current_balance_sol,
            DrawdownBasis::Equity => account.current_balance_sol + committed_sol,
        };
        (account.starting_balance_sol - basis) / account.starting_balance_sol
    }

    /// First breached threshold, if any
    pub fn evaluate(
        &self,
        account: &AccountState,
        committed_sol: f64,
        consecutive_losses: usize,
    ) -> Option<PauseReason> {
        if account.current_balance_sol < self.min_balance_sol {
            return Some(PauseReason::BalanceFloor {
                balance_sol: account.current_balance_sol,
                floor_sol: self.min_balance_sol,
            });
        }

        let drawdown = self.drawdown(account, committed_sol);
        if drawdown > self.max_drawdown {
            return Some(PauseReason::MaxDrawdown {
                drawdown,
                limit: self.max_drawdown,
            });
        }

        if self.loss_streak_limit > 0 && consecutive_losses >= self.loss_streak_limit {
            return Some(PauseReason::LossStreak { consecutive_losses });
        }
        None
    }

    /// Evaluates against the store and latches the pause when tripped.
    /// Returns the reason only when this call did the tripping.
    pub async fn check(&self, store: &PositionStore) -> Option<PauseReason> {
        let account = store.account().await;
        if account.is_paused() {
            return None;
        }
        let committed = store.committed_sol().await;
        let losses = store.consecutive_losses().await;

        let reason = self.evaluate(&account, committed, losses)?;
        debug!(
            "Circuit breaker check tripped: balance {:.4}, committed {:.4}, losses {}",
            account.current_balance_sol, committed, losses
        );
        if store.pause(reason.clone()).await {
            Some(reason)
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ExitReason;
    use crate::trading::position::OpenRequest;

    fn breaker(basis: DrawdownBasis) -> CircuitBreaker {
        CircuitBreaker {
            min_balance_sol: 0.05,
            max_drawdown: 0.25,
            drawdown_basis: basis,
            loss_streak_limit: 3,
        }
    }

    fn account(balance: f64) -> AccountState {
        let mut account = AccountState::new(0.5);
        account.current_balance_sol = balance;
        account
    }

    #[test]
    fn test_healthy_account_passes() {
        assert_eq!(breaker(DrawdownBasis::Cash).evaluate(&account(0.45), 0.0, 2), None);
    }

    #[test]
    fn test_balance_floor() {
        let reason = breaker(DrawdownBasis::Cash).evaluate(&account(0.04), 0.0, 0);
        assert!(matches!(reason, Some(PauseReason::BalanceFloor { .. })));
    }

    #[test]
    fn test_drawdown_basis() {
        // 0.36 cash + 0.10 committed: 28% down on cash, 8% on equity
        let acct = account(0.36);
        let cash = breaker(DrawdownBasis::Cash).evaluate(&acct, 0.10, 0);
        assert!(matches!(cash, Some(PauseReason::MaxDrawdown { .. })));
        assert_eq!(breaker(DrawdownBasis::Equity).evaluate(&acct, 0.10, 0), None);
    }

    #[test]
    fn test_loss_streak() {
        let reason = breaker(DrawdownBasis::Cash).evaluate(&account(0.45), 0.0, 3);
        assert_eq!(reason, Some(PauseReason::LossStreak { consecutive_losses: 3 }));

        let disabled = CircuitBreaker {
            loss_streak_limit: 0,
            ..breaker(DrawdownBasis::Cash)
        };
        assert_eq!(disabled.evaluate(&account(0.45), 0.0, 50), None);
    }

    #[tokio::test]
    async fn test_check_latches_and_is_sticky() {
        let store = PositionStore::in_memory(0.5, 10, 1.0);
        let breaker = breaker(DrawdownBasis::Cash);
        for token in ["A", "B", "C"] {
            let p = store
                .open_position(OpenRequest {
                    token_address: token.to_string(),
                    token_symbol: token.to_string(),
                    source: "test".to_string(),
                    amount_in_sol: 0.01,
                    token_amount: 10_000_000,
                    token_decimals: 6,
                    entry_price_sol: 0.001,
                    entry_signature: "sig".to_string(),
                })
                .await
                .unwrap();
            store
                .close_position(&p.id, 0.0009, ExitReason::StopLoss, "sig")
                .await
                .unwrap();
        }

        let tripped = breaker.check(&store).await;
        assert_eq!(tripped, Some(PauseReason::LossStreak { consecutive_losses: 3 }));
        assert!(store.is_paused().await);

        // Still paused on later cycles; no second trip is reported
        assert_eq!(breaker.check(&store).await, None);
        assert!(store.is_paused().await);
    }
}
