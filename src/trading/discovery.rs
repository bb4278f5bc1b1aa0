//! Discovery loop: polls opportunity sources, filters and ranks candidates,
//! proves each one round-trips at the intended size, and opens at most one
//! position per cycle.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use futures::future::join_all;
use tokio::sync::{watch, RwLock};
use tokio::task::JoinHandle;
use tokio::time::{interval, Duration, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::api::feed::OpportunitySource;
use crate::config::Config;
use crate::error::{QuoteError, TraderbotError};
use crate::models::{Opportunity, Position};
use crate::trading::executor::{check_fill_deviation, TradeExecutor};
use crate::trading::position::{OpenRequest, PositionStore};
use crate::trading::validator::RoundTripValidator;

#[derive(Debug, Clone)]
pub struct DiscoveryConfig {
    pub min_score: f64,
    pub max_slippage_percent: f64,
    pub position_size_fraction: f64,
    pub min_position_sol: f64,
    /// How long a NoRoute / slippage rejection keeps a token out
    pub reject_cooldown: Duration,
    pub scan_interval: Duration,
}

impl DiscoveryConfig {
    pub fn from_config(config: &Config) -> Self {
        Self {
            min_score: config.min_score,
            max_slippage_percent: config.max_slippage_percent,
            position_size_fraction: config.position_size_fraction,
            min_position_sol: config.min_position_sol,
            reject_cooldown: Duration::from_secs(config.reject_cooldown_secs),
            scan_interval: Duration::from_secs(config.scan_interval_secs),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum RejectReason {
    /// Either leg had no route
    NoRoute,
    SlippageExceeded { actual: f64, limit: f64 },
    ExecutionFailed(String),
    Other(String),
}

#[derive(Debug, Clone)]
pub enum DiscoveryOutcome {
    Paused,
    AtCapacity,
    NoCandidates,
    InsufficientBalance { size_sol: f64 },
    /// Every candidate this cycle was rejected
    Rejected(Vec<(String, RejectReason)>),
    /// The oracle is struggling; try again next cycle
    Deferred(QuoteError),
    Opened(Position),
}

/// Drops low scores, keeps the best score per token, best first
pub fn rank_candidates(opportunities: Vec<Opportunity>, min_score: f64) -> Vec<Opportunity> {
    let mut best: HashMap<String, Opportunity> = HashMap::new();
    for opp in opportunities.into_iter().filter(|o| o.score >= min_score) {
        match best.get(&opp.address) {
            Some(existing) if existing.score >= opp.score => {}
            _ => {
                best.insert(opp.address.clone(), opp);
            }
        }
    }
    let mut ranked: Vec<Opportunity> = best.into_values().collect();
    ranked.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.address.cmp(&b.address))
    });
    ranked
}

pub struct Discovery {
    sources: Vec<Arc<dyn OpportunitySource>>,
    store: Arc<PositionStore>,
    validator: Arc<RoundTripValidator>,
    executor: Arc<dyn TradeExecutor>,
    config: DiscoveryConfig,
    /// Tokens recently rejected for liquidity or slippage
    rejected: RwLock<HashMap<String, Instant>>,
}

impl Discovery {
    pub fn new(
        sources: Vec<Arc<dyn OpportunitySource>>,
        store: Arc<PositionStore>,
        validator: Arc<RoundTripValidator>,
        executor: Arc<dyn TradeExecutor>,
        config: DiscoveryConfig,
    ) -> Self {
        Self {
            sources,
            store,
            validator,
            executor,
            config,
            rejected: RwLock::new(HashMap::new()),
        }
    }

    pub fn source_count(&self) -> usize {
        self.sources.len()
    }

    /// Pulls from every source concurrently; a failing source is skipped
    async fn fetch_all(&self) -> Vec<Opportunity> {
        let results = join_all(self.sources.iter().map(|s| async move {
            (s.name().to_string(), s.fetch_opportunities().await)
        }))
        .await;

        let mut all = Vec::new();
        for (name, result) in results {
            match result {
                Ok(opps) => {
                    debug!("Source {} returned {} opportunities", name, opps.len());
                    all.extend(opps);
                }
                Err(e) => warn!("Opportunity source {} failed: {:?}", name, e),
            }
        }
        all
    }

    async fn in_cooldown(&self, token: &str) -> bool {
        let rejected = self.rejected.read().await;
        rejected
            .get(token)
            .map_or(false, |at| at.elapsed() < self.config.reject_cooldown)
    }

    async fn mark_rejected(&self, token: &str) {
        let mut rejected = self.rejected.write().await;
        let cooldown = self.config.reject_cooldown;
        rejected.retain(|_, at| at.elapsed() < cooldown);
        rejected.insert(token.to_string(), Instant::now());
    }

    pub async fn cooldown_count(&self) -> usize {
        let rejected = self.rejected.read().await;
        rejected
            .values()
            .filter(|at| at.elapsed() < self.config.reject_cooldown)
            .count()
    }

    pub async fn run_cycle(&self) -> DiscoveryOutcome {
        if self.store.is_paused().await {
            debug!("Discovery skipped: trading paused");
            return DiscoveryOutcome::Paused;
        }
        if self.store.open_count().await >= self.store.max_concurrent_positions() {
            debug!("Discovery skipped: at max concurrent positions");
            return DiscoveryOutcome::AtCapacity;
        }

        let fetched = self.fetch_all().await;
        let fetched_count = fetched.len();
        let ranked = rank_candidates(fetched, self.config.min_score);

        let mut candidates = Vec::new();
        for opp in ranked {
            if self.store.has_open_position(&opp.address).await {
                continue;
            }
            if self.in_cooldown(&opp.address).await {
                debug!("Skipping {} ({}): in reject cooldown", opp.symbol, opp.address);
                continue;
            }
            candidates.push(opp);
        }

        if candidates.is_empty() {
            debug!("No candidates from {} opportunities", fetched_count);
            return DiscoveryOutcome::NoCandidates;
        }
        info!(
            "🔍 {} candidates (of {} fetched), best {} score {:.0}",
            candidates.len(),
            fetched_count,
            candidates[0].symbol,
            candidates[0].score
        );

        let mut rejections = Vec::new();
        for opp in candidates {
            match self.try_open(&opp).await {
                Ok(position) => return DiscoveryOutcome::Opened(position),
                Err(CandidateError::Reject(reason)) => {
                    info!("❌ [REJECT] {} ({}): {:?}", opp.symbol, opp.address, reason);
                    rejections.push((opp.address.clone(), reason));
                }
                Err(CandidateError::Stop(outcome)) => return outcome,
            }
        }
        DiscoveryOutcome::Rejected(rejections)
    }

    async fn try_open(&self, opp: &Opportunity) -> Result<Position, CandidateError> {
        let balance = self.store.account().await.current_balance_sol;
        let size_sol = balance * self.config.position_size_fraction;
        if size_sol < self.config.min_position_sol {
            warn!(
                "Position size {:.4} SOL below minimum {:.4} SOL",
                size_sol, self.config.min_position_sol
            );
            return Err(CandidateError::Stop(DiscoveryOutcome::InsufficientBalance { size_sol }));
        }

        let round_trip = self.validator.validate(&opp.address, size_sol).await;
        if round_trip.liquidity_insufficient() {
            self.mark_rejected(&opp.address).await;
            return Err(CandidateError::Reject(RejectReason::NoRoute));
        }
        if let Some(e) = &round_trip.error {
            if e.is_retryable() {
                warn!("⏳ Oracle unavailable while validating {}: {}", opp.symbol, e);
                return Err(CandidateError::Stop(DiscoveryOutcome::Deferred(e.clone())));
            }
            return Err(CandidateError::Reject(RejectReason::Other(e.to_string())));
        }
        if !round_trip.is_tradeable() {
            return Err(CandidateError::Reject(RejectReason::Other(
                "round trip not tradeable".to_string(),
            )));
        }
        if round_trip.slippage_percent > self.config.max_slippage_percent {
            self.mark_rejected(&opp.address).await;
            return Err(CandidateError::Reject(RejectReason::SlippageExceeded {
                actual: round_trip.slippage_percent,
                limit: self.config.max_slippage_percent,
            }));
        }

        // Validation awaited the oracle; the monitor may have tripped the
        // breaker or filled the book in the meantime.
        self.admission_check(&opp.address).await?;

        let fill = self
            .executor
            .buy(&opp.address, size_sol, round_trip.buy_price_sol)
            .await
            .map_err(|e| CandidateError::Reject(RejectReason::ExecutionFailed(e.to_string())))?;
        check_fill_deviation("BUY", &opp.address, round_trip.buy_price_sol, &fill);
        let buy_signature = fill.signature.clone();

        let request = OpenRequest {
            token_address: opp.address.clone(),
            token_symbol: opp.symbol.clone(),
            source: opp.source.clone(),
            amount_in_sol: size_sol,
            token_amount: round_trip.token_amount,
            token_decimals: round_trip.token_decimals,
            entry_price_sol: round_trip.buy_price_sol,
            entry_signature: fill.signature,
        };

        let err = match self.store.open_position(request).await {
            Ok(position) => return Ok(position),
            Err(e) => e,
        };

        // The buy already filled; hand the tokens straight back
        error!(
            "🚨 Filled buy {} for {} could not be recorded: {}",
            buy_signature, opp.symbol, err
        );
        self.unwind_fill(opp, round_trip.token_amount, round_trip.sell_price_sol, &buy_signature)
            .await;

        match err {
            TraderbotError::CircuitBreakerTripped(_) => Err(CandidateError::Stop(DiscoveryOutcome::Paused)),
            TraderbotError::AtCapacity(_) => Err(CandidateError::Stop(DiscoveryOutcome::AtCapacity)),
            TraderbotError::DuplicatePosition(_) => {
                Err(CandidateError::Reject(RejectReason::Other("duplicate".to_string())))
            }
            e => Err(CandidateError::Reject(RejectReason::Other(e.to_string()))),
        }
    }

    /// Same gates `open_position` enforces, checked before any order is sent
    async fn admission_check(&self, token_address: &str) -> Result<(), CandidateError> {
        if self.store.is_paused().await {
            info!("Trading paused before buying {}, not opening", token_address);
            return Err(CandidateError::Stop(DiscoveryOutcome::Paused));
        }
        if self.store.open_count().await >= self.store.max_concurrent_positions() {
            return Err(CandidateError::Stop(DiscoveryOutcome::AtCapacity));
        }
        if self.store.has_open_position(token_address).await {
            return Err(CandidateError::Reject(RejectReason::Other("duplicate".to_string())));
        }
        Ok(())
    }

    async fn unwind_fill(&self, opp: &Opportunity, token_amount: u64, sell_price_sol: f64, buy_signature: &str) {
        match self.executor.sell(&opp.address, token_amount, sell_price_sol).await {
            Ok(fill) => {
                check_fill_deviation("UNWIND", &opp.address, sell_price_sol, &fill);
                warn!(
                    "↩️ [UNWOUND] {} ({}) buy {} sold back in {}",
                    opp.symbol, opp.address, buy_signature, fill.signature
                );
            }
            Err(e) => error!(
                "🚨 Unwind sell failed for {} ({}): {} raw units from buy {} are untracked: {:?}",
                opp.symbol, opp.address, token_amount, buy_signature, e
            ),
        }
    }

    /// Runs cycles on the scan interval until `shutdown` flips to true
    pub fn spawn(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut timer = interval(self.config.scan_interval);
            timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
            info!(
                "Discovery loop started ({} sources, {}s cadence).",
                self.sources.len(),
                self.config.scan_interval.as_secs()
            );

            loop {
                tokio::select! {
                    _ = timer.tick() => {
                        match self.run_cycle().await {
                            DiscoveryOutcome::Opened(p) => debug!("Discovery opened {}", p.id),
                            DiscoveryOutcome::Rejected(r) => debug!("Discovery rejected {} candidates", r.len()),
                            DiscoveryOutcome::Deferred(e) => debug!("Discovery deferred: {}", e),
                            DiscoveryOutcome::InsufficientBalance { size_sol } => {
                                debug!("Discovery idle: position size {:.4} SOL too small", size_sol)
                            }
                            other => debug!("Discovery cycle: {:?}", other),
                        }
                    }
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            info!("Discovery loop stopped.");
                            break;
                        }
                    }
                }
            }
        })
    }
}

enum CandidateError {
    /// Move on to the next candidate
    Reject(RejectReason),
    /// End the cycle with this outcome
    Stop(DiscoveryOutcome),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use chrono::Utc;

    use crate::models::PauseReason;
    use crate::trading::executor::{Fill, PaperExecutor};
    use crate::trading::test_support::{MockOracle, RejectingExecutor, StaticSource};

    fn streak() -> PauseReason {
        PauseReason::LossStreak { consecutive_losses: 5 }
    }

    /// Counts orders; optionally trips the breaker while a buy is in flight
    struct RecordingExecutor {
        pause_on_buy: Option<Arc<PositionStore>>,
        buys: AtomicUsize,
        sells: AtomicUsize,
    }

    impl RecordingExecutor {
        fn new(pause_on_buy: Option<Arc<PositionStore>>) -> Self {
            Self {
                pause_on_buy,
                buys: AtomicUsize::new(0),
                sells: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl TradeExecutor for RecordingExecutor {
        async fn buy(&self, _token_address: &str, _amount_sol: f64, expected_price_sol: f64) -> anyhow::Result<Fill> {
            self.buys.fetch_add(1, Ordering::SeqCst);
            if let Some(store) = &self.pause_on_buy {
                store.pause(streak()).await;
            }
            Ok(Fill {
                signature: "BUY_SIG".to_string(),
                price_sol: expected_price_sol,
                filled_at: Utc::now(),
            })
        }

        async fn sell(&self, _token_address: &str, _token_amount: u64, expected_price_sol: f64) -> anyhow::Result<Fill> {
            self.sells.fetch_add(1, Ordering::SeqCst);
            Ok(Fill {
                signature: "SELL_SIG".to_string(),
                price_sol: expected_price_sol,
                filled_at: Utc::now(),
            })
        }
    }

    /// Source that trips the breaker while discovery is fetching
    struct PausingSource {
        store: Arc<PositionStore>,
        opportunities: Vec<Opportunity>,
    }

    #[async_trait]
    impl OpportunitySource for PausingSource {
        fn name(&self) -> &str {
            "pausing"
        }

        async fn fetch_opportunities(&self) -> anyhow::Result<Vec<Opportunity>> {
            self.store.pause(streak()).await;
            Ok(self.opportunities.clone())
        }
    }

    fn discovery_config() -> DiscoveryConfig {
        DiscoveryConfig::from_config(&Config::default())
    }

    struct Harness {
        oracle: Arc<MockOracle>,
        store: Arc<PositionStore>,
        discovery: Discovery,
    }

    fn harness(sources: Vec<Arc<dyn OpportunitySource>>, executor: Arc<dyn TradeExecutor>) -> Harness {
        let oracle = Arc::new(MockOracle::new());
        let store = Arc::new(PositionStore::in_memory(0.5, 10, 1.0));
        let validator = Arc::new(RoundTripValidator::new(oracle.clone(), 6));
        let discovery = Discovery::new(sources, store.clone(), validator, executor, discovery_config());
        Harness { oracle, store, discovery }
    }

    fn source(opps: Vec<Opportunity>) -> Arc<dyn OpportunitySource> {
        Arc::new(StaticSource::new("static", opps))
    }

    #[test]
    fn test_rank_filters_dedupes_and_sorts() {
        let ranked = rank_candidates(
            vec![
                Opportunity::new("A", "AAA", 50.0, "pumpfun"),
                Opportunity::new("B", "BBB", 30.0, "pumpfun"),
                Opportunity::new("C", "CCC", 90.0, "dexscreener"),
                Opportunity::new("A", "AAA", 70.0, "dexscreener"),
            ],
            40.0,
        );
        let order: Vec<(&str, f64)> = ranked.iter().map(|o| (o.address.as_str(), o.score)).collect();
        assert_eq!(order, vec![("C", 90.0), ("A", 70.0)]);
    }

    #[tokio::test]
    async fn test_opens_best_candidate_at_validated_price() {
        let h = harness(
            vec![source(vec![
                Opportunity::new("A", "AAA", 60.0, "pumpfun"),
                Opportunity::new("B", "BBB", 80.0, "pumpfun"),
            ])],
            Arc::new(PaperExecutor::new()),
        );
        h.oracle.set_market("A", 0.001, 0.00095).await;
        h.oracle.set_market("B", 0.002, 0.0019).await;

        let outcome = h.discovery.run_cycle().await;

        let DiscoveryOutcome::Opened(position) = outcome else {
            panic!("expected a position, got {:?}", outcome);
        };
        assert_eq!(position.token_address, "B");
        assert!((position.amount_in_sol - 0.04).abs() < 1e-12);
        assert!((position.entry_price_sol - 0.002).abs() < 1e-12);
        assert_eq!(position.token_amount, 20_000_000);
        assert_eq!(h.store.open_count().await, 1);
    }

    #[tokio::test]
    async fn test_duplicate_opportunities_open_one_position() {
        let h = harness(
            vec![
                source(vec![
                    Opportunity::new("A", "AAA", 60.0, "pumpfun"),
                    Opportunity::new("A", "AAA", 65.0, "pumpfun"),
                ]),
                source(vec![Opportunity::new("A", "AAA", 70.0, "dexscreener")]),
            ],
            Arc::new(PaperExecutor::new()),
        );
        h.oracle.set_market("A", 0.001, 0.001).await;

        assert!(matches!(h.discovery.run_cycle().await, DiscoveryOutcome::Opened(_)));
        assert!(matches!(h.discovery.run_cycle().await, DiscoveryOutcome::NoCandidates));
        assert_eq!(h.store.open_count().await, 1);
    }

    #[tokio::test]
    async fn test_slippage_rejected_and_cooled_down() {
        let h = harness(
            vec![source(vec![Opportunity::new("A", "AAA", 60.0, "pumpfun")])],
            Arc::new(PaperExecutor::new()),
        );
        // 20% round-trip loss against a 15% ceiling
        h.oracle.set_market("A", 0.001, 0.0008).await;

        let outcome = h.discovery.run_cycle().await;
        let DiscoveryOutcome::Rejected(rejections) = outcome else {
            panic!("expected rejection, got {:?}", outcome);
        };
        assert!(matches!(rejections[0].1, RejectReason::SlippageExceeded { .. }));
        assert_eq!(h.store.open_count().await, 0);
        assert_eq!(h.discovery.cooldown_count().await, 1);

        let calls = h.oracle.calls();
        assert!(matches!(h.discovery.run_cycle().await, DiscoveryOutcome::NoCandidates));
        assert_eq!(h.oracle.calls(), calls);
    }

    #[tokio::test]
    async fn test_no_route_rejects_and_moves_to_next_candidate() {
        let h = harness(
            vec![source(vec![
                Opportunity::new("DEAD", "RUG", 95.0, "pumpfun"),
                Opportunity::new("A", "AAA", 60.0, "pumpfun"),
            ])],
            Arc::new(PaperExecutor::new()),
        );
        h.oracle.set_market("DEAD", 0.001, 0.001).await;
        h.oracle.set_sell_error("DEAD", QuoteError::NoRoute("no pool".into())).await;
        h.oracle.set_market("A", 0.001, 0.001).await;

        let DiscoveryOutcome::Opened(position) = h.discovery.run_cycle().await else {
            panic!("expected the second candidate to open");
        };
        assert_eq!(position.token_address, "A");
        assert_eq!(h.discovery.cooldown_count().await, 1);
    }

    #[tokio::test]
    async fn test_rate_limit_defers_without_cooldown() {
        let h = harness(
            vec![source(vec![Opportunity::new("A", "AAA", 60.0, "pumpfun")])],
            Arc::new(PaperExecutor::new()),
        );
        h.oracle.set_market("A", 0.001, 0.001).await;
        h.oracle
            .push_buy_error("A", QuoteError::RateLimited { retry_after_ms: Some(1000) })
            .await;

        assert!(matches!(h.discovery.run_cycle().await, DiscoveryOutcome::Deferred(_)));
        assert_eq!(h.discovery.cooldown_count().await, 0);

        // Nothing was cached, so the next cycle succeeds
        assert!(matches!(h.discovery.run_cycle().await, DiscoveryOutcome::Opened(_)));
    }

    #[tokio::test]
    async fn test_pause_during_cycle_blocks_buy() {
        let oracle = Arc::new(MockOracle::new());
        oracle.set_market("A", 0.001, 0.001).await;
        let store = Arc::new(PositionStore::in_memory(0.5, 10, 1.0));
        let executor = Arc::new(RecordingExecutor::new(None));
        let source: Arc<dyn OpportunitySource> = Arc::new(PausingSource {
            store: store.clone(),
            opportunities: vec![Opportunity::new("A", "AAA", 60.0, "pumpfun")],
        });
        let discovery = Discovery::new(
            vec![source],
            store.clone(),
            Arc::new(RoundTripValidator::new(oracle, 6)),
            executor.clone(),
            discovery_config(),
        );

        assert!(matches!(discovery.run_cycle().await, DiscoveryOutcome::Paused));
        assert_eq!(executor.buys.load(Ordering::SeqCst), 0);
        assert_eq!(store.open_count().await, 0);
    }

    #[tokio::test]
    async fn test_fill_rejected_by_store_is_unwound() {
        let oracle = Arc::new(MockOracle::new());
        oracle.set_market("A", 0.001, 0.001).await;
        let store = Arc::new(PositionStore::in_memory(0.5, 10, 1.0));
        let executor = Arc::new(RecordingExecutor::new(Some(store.clone())));
        let discovery = Discovery::new(
            vec![source(vec![Opportunity::new("A", "AAA", 60.0, "pumpfun")])],
            store.clone(),
            Arc::new(RoundTripValidator::new(oracle, 6)),
            executor.clone(),
            discovery_config(),
        );

        let outcome = discovery.run_cycle().await;

        assert!(matches!(outcome, DiscoveryOutcome::Paused));
        assert_eq!(executor.buys.load(Ordering::SeqCst), 1);
        assert_eq!(executor.sells.load(Ordering::SeqCst), 1);
        assert_eq!(store.open_count().await, 0);
        assert!((store.account().await.current_balance_sol - 0.5).abs() < 1e-12);
    }

    #[tokio::test]
    async fn test_paused_store_opens_nothing() {
        let h = harness(
            vec![source(vec![Opportunity::new("A", "AAA", 60.0, "pumpfun")])],
            Arc::new(PaperExecutor::new()),
        );
        h.oracle.set_market("A", 0.001, 0.001).await;
        h.store
            .pause(PauseReason::BalanceFloor { balance_sol: 0.01, floor_sol: 0.05 })
            .await;

        assert!(matches!(h.discovery.run_cycle().await, DiscoveryOutcome::Paused));
        assert_eq!(h.oracle.calls(), 0);
    }

    #[tokio::test]
    async fn test_failing_source_is_skipped() {
        let h = harness(
            vec![
                Arc::new(StaticSource::failing("down")),
                source(vec![Opportunity::new("A", "AAA", 60.0, "pumpfun")]),
            ],
            Arc::new(PaperExecutor::new()),
        );
        h.oracle.set_market("A", 0.001, 0.001).await;

        assert!(matches!(h.discovery.run_cycle().await, DiscoveryOutcome::Opened(_)));
    }

    #[tokio::test]
    async fn test_failed_buy_opens_nothing() {
        let h = harness(
            vec![source(vec![Opportunity::new("A", "AAA", 60.0, "pumpfun")])],
            Arc::new(RejectingExecutor),
        );
        h.oracle.set_market("A", 0.001, 0.001).await;

        let outcome = h.discovery.run_cycle().await;
        assert!(matches!(outcome, DiscoveryOutcome::Rejected(_)));
        assert_eq!(h.store.open_count().await, 0);
        assert!((h.store.account().await.current_balance_sol - 0.5).abs() < 1e-12);
    }
}
