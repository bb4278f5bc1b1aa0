//! Round-trip validation: before committing capital, prove the token can be
//! bought at the intended size and the resulting quantity sold straight back.

use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info};

use crate::api::jupiter::{lamports_to_sol, sol_to_lamports, to_ui_amount, QuoteOracle, SOL_MINT};
use crate::error::QuoteError;

#[derive(Debug, Clone, Serialize)]
pub struct RoundTripResult {
    pub can_buy: bool,
    pub can_sell: bool,
    /// SOL per whole token paid on the buy leg
    pub buy_price_sol: f64,
    /// SOL per whole token received on the sell leg
    pub sell_price_sol: f64,
    /// Percent lost buying then immediately selling
    pub slippage_percent: f64,
    /// Raw token units the buy leg yields
    pub token_amount: u64,
    pub token_decimals: u8,
    pub error: Option<QuoteError>,
}

impl RoundTripResult {
    fn failed(can_buy: bool, token_decimals: u8, error: QuoteError) -> Self {
        Self {
            can_buy,
            can_sell: false,
            buy_price_sol: 0.0,
            sell_price_sol: 0.0,
            slippage_percent: 0.0,
            token_amount: 0,
            token_decimals,
            error: Some(error),
        }
    }

    pub fn is_tradeable(&self) -> bool {
        self.can_buy && self.can_sell
    }

    /// Only an explicit no-route answer means the liquidity is not there
    pub fn liquidity_insufficient(&self) -> bool {
        self.error.as_ref().map_or(false, QuoteError::is_no_route)
    }
}

/// Sell-direction price for a held quantity
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ExitQuote {
    pub price_sol: f64,
    pub sol_out: f64,
}

pub struct RoundTripValidator {
    oracle: Arc<dyn QuoteOracle>,
    token_decimals: u8,
}

impl RoundTripValidator {
    pub fn new(oracle: Arc<dyn QuoteOracle>, token_decimals: u8) -> Self {
        Self { oracle, token_decimals }
    }

    pub async fn validate(&self, token_address: &str, amount_sol: f64) -> RoundTripResult {
        let decimals = self.token_decimals;
        let lamports_in = sol_to_lamports(amount_sol);

        let buy = match self.oracle.quote(SOL_MINT, token_address, lamports_in).await {
            Ok(q) => q,
            Err(e) => {
                debug!("Buy leg failed for {}: {}", token_address, e);
                return RoundTripResult::failed(false, decimals, e);
            }
        };

        let tokens_out = buy.out_amount;
        let ui_tokens = to_ui_amount(tokens_out, decimals);
        let buy_price_sol = lamports_to_sol(buy.in_amount) / ui_tokens;

        let sell = match self.oracle.quote(token_address, SOL_MINT, tokens_out).await {
            Ok(q) => q,
            Err(e) => {
                debug!("Sell leg failed for {}: {}", token_address, e);
                let mut result = RoundTripResult::failed(true, decimals, e);
                result.buy_price_sol = buy_price_sol;
                result.token_amount = tokens_out;
                return result;
            }
        };

        let sell_price_sol = lamports_to_sol(sell.out_amount) / ui_tokens;
        let slippage_percent = (buy_price_sol - sell_price_sol) / buy_price_sol * 100.0;

        info!(
            "🔁 [ROUND TRIP] {} | buy {:.10} | sell {:.10} | slippage {:.2}%",
            token_address, buy_price_sol, sell_price_sol, slippage_percent
        );

        RoundTripResult {
            can_buy: true,
            can_sell: true,
            buy_price_sol,
            sell_price_sol,
            slippage_percent,
            token_amount: tokens_out,
            token_decimals: decimals,
            error: None,
        }
    }

    /// Prices `token_amount` raw units through the sell direction
    pub async fn quote_exit(
        &self,
        token_address: &str,
        token_amount: u64,
        token_decimals: u8,
    ) -> Result<ExitQuote, QuoteError> {
        let sell = self.oracle.quote(token_address, SOL_MINT, token_amount).await?;
        let sol_out = lamports_to_sol(sell.out_amount);
        Ok(ExitQuote {
            price_sol: sol_out / to_ui_amount(token_amount, token_decimals),
            sol_out,
        })
    }
}
