//! Position monitor: re-prices every open position on a fixed cadence,
//! drives the tiered exit state machine, and evaluates the circuit breaker
//! once per cycle.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval, Duration, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::error::TraderbotError;
use crate::models::{ExitReason, PauseReason, Position};
use crate::trading::circuit_breaker::CircuitBreaker;
use crate::trading::executor::{check_fill_deviation, TradeExecutor};
use crate::trading::exit::ExitPolicy;
use crate::trading::position::PositionStore;
use crate::trading::validator::RoundTripValidator;

/// What happened to one position in one cycle
#[derive(Debug, Clone, PartialEq)]
pub enum PositionOutcome {
    Held,
    /// Transient oracle failure; untouched until next cycle
    Skipped,
    Closed(ExitReason),
    WrittenOff,
    /// Exit wanted but the final check or the execution did not go through
    Deferred(ExitReason),
}

#[derive(Debug, Default, Clone)]
pub struct MonitorReport {
    pub checked: usize,
    pub held: usize,
    pub skipped: usize,
    pub closed: usize,
    pub written_off: usize,
    pub deferred: usize,
    pub tp1_hits: usize,
    pub tripped: Option<PauseReason>,
}

pub struct PositionMonitor {
    store: Arc<PositionStore>,
    validator: Arc<RoundTripValidator>,
    executor: Arc<dyn TradeExecutor>,
    exit_policy: ExitPolicy,
    breaker: CircuitBreaker,
    interval: Duration,
    start_delay: Duration,
    status_every_cycles: u64,
    cycles: AtomicU64,
}

impl PositionMonitor {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: Arc<PositionStore>,
        validator: Arc<RoundTripValidator>,
        executor: Arc<dyn TradeExecutor>,
        exit_policy: ExitPolicy,
        breaker: CircuitBreaker,
        interval: Duration,
        start_delay: Duration,
        status_every_cycles: u64,
    ) -> Self {
        Self {
            store,
            validator,
            executor,
            exit_policy,
            breaker,
            interval,
            start_delay,
            status_every_cycles,
            cycles: AtomicU64::new(0),
        }
    }

    pub fn cycles(&self) -> u64 {
        self.cycles.load(Ordering::Relaxed)
    }

    /// One full pass over the open positions, then the breaker.
    pub async fn run_cycle(&self) -> MonitorReport {
        let mut report = MonitorReport::default();
        let positions = self.store.open_positions().await;

        for position in positions {
            report.checked += 1;
            let (outcome, tp1_crossed) = self.check_position(&position).await;
            if tp1_crossed {
                report.tp1_hits += 1;
            }
            match outcome {
                PositionOutcome::Held => report.held += 1,
                PositionOutcome::Skipped => report.skipped += 1,
                PositionOutcome::Closed(_) => report.closed += 1,
                PositionOutcome::WrittenOff => report.written_off += 1,
                PositionOutcome::Deferred(_) => report.deferred += 1,
            }
        }

        report.tripped = self.breaker.check(&self.store).await;

        let cycle = self.cycles.fetch_add(1, Ordering::Relaxed) + 1;
        if self.status_every_cycles > 0 && cycle % self.status_every_cycles == 0 {
            self.log_status().await;
        }
        report
    }

    /// Returns the outcome and whether this cycle crossed TP1
    async fn check_position(&self, position: &Position) -> (PositionOutcome, bool) {
        let quote = self
            .validator
            .quote_exit(&position.token_address, position.token_amount, position.token_decimals)
            .await;

        let exit_quote = match quote {
            Ok(q) => q,
            Err(e) if e.is_no_route() => {
                return (self.write_off(position).await, false);
            }
            Err(e) => {
                warn!(
                    "⏭️ Skipping {} this cycle, price unavailable: {}",
                    position.token_symbol, e
                );
                return (PositionOutcome::Skipped, false);
            }
        };

        let update = match self.store.update_price(&position.id, exit_quote.price_sol).await {
            Ok(u) => u,
            Err(TraderbotError::PositionNotOpen(_)) | Err(TraderbotError::PositionNotFound(_)) => {
                debug!("Position {} closed elsewhere, skipping", position.id);
                return (PositionOutcome::Skipped, false);
            }
            Err(e) => {
                error!("Failed to update price for {}: {}", position.token_symbol, e);
                return (PositionOutcome::Skipped, false);
            }
        };

        let updated = update.position;
        debug!(
            "{} | price {:.10} | pnl {:+.1}% | peak {:.10} | tp1 {}",
            updated.token_symbol,
            updated.current_price_sol,
            updated.pnl_fraction() * 100.0,
            updated.peak_price_sol,
            updated.tp1_hit
        );

        match self.exit_policy.evaluate(&updated, Utc::now()) {
            Some(reason) => (self.execute_exit(&updated, reason).await, update.tp1_crossed),
            None => (PositionOutcome::Held, update.tp1_crossed),
        }
    }

    /// Re-validates the sell route one last time before realizing.
    async fn execute_exit(&self, position: &Position, reason: ExitReason) -> PositionOutcome {
        info!(
            "🔔 Exit signal for {}: {} (pnl {:+.1}%)",
            position.token_symbol,
            reason,
            position.pnl_fraction() * 100.0
        );

        let final_quote = match self
            .validator
            .quote_exit(&position.token_address, position.token_amount, position.token_decimals)
            .await
        {
            Ok(q) => q,
            Err(e) if e.is_no_route() => return self.write_off(position).await,
            Err(e) => {
                warn!(
                    "⏳ Deferring {} exit for {}: final check failed ({})",
                    reason, position.token_symbol, e
                );
                return PositionOutcome::Deferred(reason);
            }
        };

        let fill = match self
            .executor
            .sell(&position.token_address, position.token_amount, final_quote.price_sol)
            .await
        {
            Ok(fill) => fill,
            Err(e) => {
                warn!(
                    "⏳ Deferring {} exit for {}: sell not executed ({:?})",
                    reason, position.token_symbol, e
                );
                return PositionOutcome::Deferred(reason);
            }
        };
        check_fill_deviation("SELL", &position.token_address, final_quote.price_sol, &fill);

        match self
            .store
            .close_position(&position.id, fill.price_sol, reason, &fill.signature)
            .await
        {
            Ok(_) => PositionOutcome::Closed(reason),
            Err(e) => {
                error!("Failed to record close for {}: {}", position.token_symbol, e);
                PositionOutcome::Deferred(reason)
            }
        }
    }

    async fn write_off(&self, position: &Position) -> PositionOutcome {
        match self.store.write_off(&position.id).await {
            Ok(_) => PositionOutcome::WrittenOff,
            Err(e) => {
                warn!("Could not write off {}: {}", position.token_symbol, e);
                PositionOutcome::Skipped
            }
        }
    }

    async fn log_status(&self) {
        let account = self.store.account().await;
        let stats = self.store.stats().await;
        let state = match account.trading_state.pause_reason() {
            Some(reason) => format!("PAUSED ({})", reason),
            None => "RUNNING".to_string(),
        };
        info!(
            "📊 [STATUS] {} | balance {:.4} SOL (start {:.4}) | realized {:+.4} SOL | open {} ({:.4} SOL) | closed {} | win rate {:.1}%",
            state,
            account.current_balance_sol,
            account.starting_balance_sol,
            stats.total_realized_pnl_sol,
            stats.open_positions,
            stats.committed_sol,
            stats.closed_positions,
            stats.win_rate
        );
    }

    /// Runs cycles until `shutdown` flips to true. Each cycle finishes before
    /// the next tick; late ticks are delayed rather than bunched.
    pub fn spawn(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep(self.start_delay) => {}
                _ = shutdown.changed() => {
                    info!("Position monitor stopped before first cycle.");
                    return;
                }
            }

            let mut timer = interval(self.interval);
            timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
            info!("Position monitor started ({}s cadence).", self.interval.as_secs());

            loop {
                tokio::select! {
                    _ = timer.tick() => {
                        let report = self.run_cycle().await;
                        if report.checked > 0 {
                            debug!("Monitor cycle: {:?}", report);
                        }
                    }
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            info!("Position monitor stopped.");
                            break;
                        }
                    }
                }
            }
        })
    }
}
