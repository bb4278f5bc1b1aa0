//! In-memory collaborators for exercising the engine without a network.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};

use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::api::feed::OpportunitySource;
use crate::api::jupiter::{lamports_to_sol, to_ui_amount, Quote, QuoteOracle, SOL_MINT};
use crate::error::QuoteError;
use crate::models::Opportunity;
use crate::trading::executor::{Fill, TradeExecutor};

struct Market {
    decimals: u8,
    buy_price: f64,
    sell_price: f64,
    buy_errors: VecDeque<QuoteError>,
    /// Scripted sell outcomes consumed before the sticky error; `None` passes
    sell_script: VecDeque<Option<QuoteError>>,
    sticky_sell_error: Option<QuoteError>,
}

/// Scripted oracle: each token has a buy and a sell price in SOL per whole
/// token, plus optional queued or sticky failures.
#[derive(Default)]
pub struct MockOracle {
    markets: Mutex<HashMap<String, Market>>,
    calls: AtomicUsize,
}

impl MockOracle {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn set_market(&self, token: &str, buy_price: f64, sell_price: f64) {
        self.markets.lock().await.insert(
            token.to_string(),
            Market {
                decimals: 6,
                buy_price,
                sell_price,
                buy_errors: VecDeque::new(),
                sell_script: VecDeque::new(),
                sticky_sell_error: None,
            },
        );
    }

    /// Moves the sell-side price, which is what open positions are marked at
    pub async fn set_price(&self, token: &str, price: f64) {
        if let Some(m) = self.markets.lock().await.get_mut(token) {
            m.sell_price = price;
        }
    }

    pub async fn set_sell_error(&self, token: &str, error: QuoteError) {
        if let Some(m) = self.markets.lock().await.get_mut(token) {
            m.sticky_sell_error = Some(error);
        }
    }

    pub async fn push_sell_error(&self, token: &str, error: QuoteError) {
        if let Some(m) = self.markets.lock().await.get_mut(token) {
            m.sell_script.push_back(Some(error));
        }
    }

    /// Lets the next scripted sell quote through at the current price
    pub async fn push_sell_ok(&self, token: &str) {
        if let Some(m) = self.markets.lock().await.get_mut(token) {
            m.sell_script.push_back(None);
        }
    }

    pub async fn push_buy_error(&self, token: &str, error: QuoteError) {
        if let Some(m) = self.markets.lock().await.get_mut(token) {
            m.buy_errors.push_back(error);
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl QuoteOracle for MockOracle {
    async fn quote(&self, input_mint: &str, output_mint: &str, amount: u64) -> Result<Quote, QuoteError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let buying = input_mint == SOL_MINT;
        let token = if buying { output_mint } else { input_mint };

        let mut markets = self.markets.lock().await;
        let market = markets
            .get_mut(token)
            .ok_or_else(|| QuoteError::NoRoute(format!("unknown token {}", token)))?;

        let out_amount = if buying {
            if let Some(e) = market.buy_errors.pop_front() {
                return Err(e);
            }
            let ui_tokens = lamports_to_sol(amount) / market.buy_price;
            (ui_tokens * 10f64.powi(market.decimals as i32)).round() as u64
        } else {
            match market.sell_script.pop_front() {
                Some(Some(e)) => return Err(e),
                Some(None) => {}
                None => {
                    if let Some(e) = &market.sticky_sell_error {
                        return Err(e.clone());
                    }
                }
            }
            let sol_out = to_ui_amount(amount, market.decimals) * market.sell_price;
            (sol_out * 1_000_000_000.0).round() as u64
        };

        if out_amount == 0 {
            return Err(QuoteError::NoRoute("zero output".to_string()));
        }

        Ok(Quote {
            input_mint: input_mint.to_string(),
            output_mint: output_mint.to_string(),
            in_amount: amount,
            out_amount,
            price_impact_pct: 0.0,
            route_labels: vec!["Mock".to_string()],
        })
    }
}

pub struct StaticSource {
    name: String,
    opportunities: Vec<Opportunity>,
    fail: bool,
}

impl StaticSource {
    pub fn new(name: &str, opportunities: Vec<Opportunity>) -> Self {
        Self {
            name: name.to_string(),
            opportunities,
            fail: false,
        }
    }

    pub fn failing(name: &str) -> Self {
        Self {
            name: name.to_string(),
            opportunities: Vec::new(),
            fail: true,
        }
    }
}

#[async_trait]
impl OpportunitySource for StaticSource {
    fn name(&self) -> &str {
        &self.name
    }

    async fn fetch_opportunities(&self) -> Result<Vec<Opportunity>> {
        if self.fail {
            anyhow::bail!("source {} unavailable", self.name);
        }
        Ok(self.opportunities.clone())
    }
}

/// Executor whose orders never fill
pub struct RejectingExecutor;

#[async_trait]
impl TradeExecutor for RejectingExecutor {
    async fn buy(&self, _token_address: &str, _amount_sol: f64, _expected_price_sol: f64) -> Result<Fill> {
        anyhow::bail!("buy rejected")
    }

    async fn sell(&self, _token_address: &str, _token_amount: u64, _expected_price_sol: f64) -> Result<Fill> {
        anyhow::bail!("sell rejected")
    }
}
