use anyhow::{Context, Result};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::{collections::HashMap, path::PathBuf};
use tokio::{
    fs,
    sync::{broadcast, Mutex, RwLock},
};
use tracing::{debug, error, info, warn};

use crate::error::TraderbotError;
use crate::models::{
    AccountState, ExitReason, PauseReason, PerformanceStats, Position, TradeEvent, TradingState,
};

/// Tolerance for the balance reconciliation check
const BALANCE_EPSILON: f64 = 1e-9;

/// Persisted snapshot: account plus every position keyed by id
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Ledger {
    pub account: AccountState,
    pub positions: HashMap<String, Position>,
}

impl Ledger {
    fn new(starting_balance_sol: f64) -> Self {
        Self {
            account: AccountState::new(starting_balance_sol),
            positions: HashMap::new(),
        }
    }

    fn open_count(&self) -> usize {
        self.positions.values().filter(|p| p.is_open()).count()
    }

    fn has_open_position(&self, token_address: &str) -> bool {
        self.positions
            .values()
            .any(|p| p.is_open() && p.token_address == token_address)
    }

    fn committed_sol(&self) -> f64 {
        self.positions
            .values()
            .filter(|p| p.is_open())
            .map(|p| p.amount_in_sol)
            .sum()
    }

    /// starting + realized - committed
    fn expected_balance(&self) -> f64 {
        let realized: f64 = self
            .positions
            .values()
            .filter(|p| !p.is_open())
            .filter_map(|p| p.pnl_sol)
            .sum();
        self.account.starting_balance_sol + realized - self.committed_sol()
    }

    /// Returns the discrepancy; anything above epsilon is logged as an error.
    fn verify_balance(&self) -> f64 {
        let expected = self.expected_balance();
        let diff = self.account.current_balance_sol - expected;
        if diff.abs() > BALANCE_EPSILON {
            error!(
                "❌ Balance reconciliation failed: ledger {:.9} SOL vs expected {:.9} SOL (diff {:.9})",
                self.account.current_balance_sol, expected, diff
            );
        }
        diff
    }

    /// Latest run of consecutive losing closes since the last resume
    fn consecutive_losses(&self) -> usize {
        let since = self.account.last_resumed_at;
        let mut closed: Vec<&Position> = self
            .positions
            .values()
            .filter(|p| !p.is_open())
            .filter(|p| match (since, p.exit_time) {
                (Some(resumed), Some(exit)) => exit >= resumed,
                _ => true,
            })
            .collect();
        closed.sort_by(|a, b| b.exit_time.cmp(&a.exit_time));
        closed.iter().take_while(|p| p.is_loss()).count()
    }
}

/// Everything needed to record a freshly executed entry
#[derive(Debug, Clone)]
pub struct OpenRequest {
    pub token_address: String,
    pub token_symbol: String,
    pub source: String,
    pub amount_in_sol: f64,
    pub token_amount: u64,
    pub token_decimals: u8,
    pub entry_price_sol: f64,
    pub entry_signature: String,
}

#[derive(Debug, Clone)]
pub struct PriceUpdate {
    pub position: Position,
    /// True only on the update that first crossed the take-profit threshold
    pub tp1_crossed: bool,
}

/// Authoritative table of positions and account balance. Both loops go
/// through here; every check-then-mutate happens under one write guard.
pub struct PositionStore {
    ledger: RwLock<Ledger>,
    persist_lock: Mutex<()>,
    persistence_path: Option<PathBuf>,
    max_concurrent_positions: usize,
    take_profit_threshold: f64,
    events: broadcast::Sender<TradeEvent>,
}

impl PositionStore {
    /// Store that never touches disk
    pub fn in_memory(starting_balance_sol: f64, max_concurrent_positions: usize, take_profit_threshold: f64) -> Self {
        let (events, _) = broadcast::channel(100);
        Self {
            ledger: RwLock::new(Ledger::new(starting_balance_sol)),
            persist_lock: Mutex::new(()),
            persistence_path: None,
            max_concurrent_positions,
            take_profit_threshold,
            events,
        }
    }

    /// Loads the ledger at `path`, or starts a fresh one when the file is
    /// missing or empty.
    pub async fn load(
        path: impl Into<PathBuf>,
        starting_balance_sol: f64,
        max_concurrent_positions: usize,
        take_profit_threshold: f64,
    ) -> Result<Self> {
        let path = path.into();
        let mut store = Self::in_memory(starting_balance_sol, max_concurrent_positions, take_profit_threshold);

        if fs::try_exists(&path).await.unwrap_or(false) {
            let data = fs::read_to_string(&path)
                .await
                .with_context(|| format!("Failed to read ledger file: {:?}", path))?;
            if data.trim().is_empty() {
                info!("Ledger file {:?} is empty, starting fresh.", path);
            } else {
                let ledger: Ledger =
                    serde_json::from_str(&data).context("Failed to deserialize ledger data")?;
                info!(
                    "Loaded ledger from {:?}: balance {:.4} SOL, {} positions ({} open)",
                    path,
                    ledger.account.current_balance_sol,
                    ledger.positions.len(),
                    ledger.open_count()
                );
                if let TradingState::Paused { reason, .. } = &ledger.account.trading_state {
                    warn!("🚨 Ledger was saved while paused: {}", reason);
                }
                ledger.verify_balance();
                store.ledger = RwLock::new(ledger);
            }
        } else {
            info!("Ledger file not found at {:?}, starting fresh.", path);
        }

        store.persistence_path = Some(path);
        Ok(store)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TradeEvent> {
        self.events.subscribe()
    }

    fn emit(&self, event: TradeEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }

    // --- Persistence ---

    /// Write-through snapshot. The persist lock is held from snapshot to
    /// rename so writes land in mutation order.
    async fn persist(&self) {
        if let Err(e) = self.save().await {
            error!("Failed to persist ledger: {:?}", e);
        }
    }

    pub async fn save(&self) -> Result<()> {
        let Some(path) = &self.persistence_path else {
            return Ok(());
        };
        let _guard = self.persist_lock.lock().await;

        let data = {
            let ledger = self.ledger.read().await;
            serde_json::to_string_pretty(&*ledger).context("Failed to serialize ledger")?
        };

        if let Some(dir) = path.parent() {
            if !dir.as_os_str().is_empty() {
                fs::create_dir_all(dir).await.context("Failed to create data directory")?;
            }
        }

        let tmp_path = path.with_extension("json.tmp");
        fs::write(&tmp_path, data)
            .await
            .with_context(|| format!("Failed to write temp ledger file: {:?}", tmp_path))?;
        fs::rename(&tmp_path, path)
            .await
            .with_context(|| format!("Failed to move ledger into place: {:?}", path))?;
        debug!("Saved ledger to {:?}", path);
        Ok(())
    }

    // --- Mutations ---

    /// Records a new open position and deducts its capital. Pause, duplicate
    /// and capacity checks happen under the same guard as the insert.
    pub async fn open_position(&self, request: OpenRequest) -> Result<Position, TraderbotError> {
        let position = {
            let mut ledger = self.ledger.write().await;

            if let TradingState::Paused { reason, .. } = &ledger.account.trading_state {
                return Err(TraderbotError::CircuitBreakerTripped(reason.clone()));
            }
            if ledger.has_open_position(&request.token_address) {
                return Err(TraderbotError::DuplicatePosition(request.token_address));
            }
            if ledger.open_count() >= self.max_concurrent_positions {
                return Err(TraderbotError::AtCapacity(self.max_concurrent_positions));
            }
            if !(request.amount_in_sol > 0.0) || !(request.entry_price_sol > 0.0) || request.token_amount == 0 {
                return Err(TraderbotError::InvalidAmount(format!(
                    "amount {} SOL, entry price {}, tokens {}",
                    request.amount_in_sol, request.entry_price_sol, request.token_amount
                )));
            }
            if request.amount_in_sol > ledger.account.current_balance_sol + BALANCE_EPSILON {
                return Err(TraderbotError::InsufficientBalance(format!(
                    "need {:.4} SOL, have {:.4} SOL",
                    request.amount_in_sol, ledger.account.current_balance_sol
                )));
            }

            let position = Position::new(
                &request.token_address,
                &request.token_symbol,
                &request.source,
                request.amount_in_sol,
                request.token_amount,
                request.token_decimals,
                request.entry_price_sol,
                &request.entry_signature,
            );
            ledger.account.current_balance_sol -= position.amount_in_sol;
            ledger.positions.insert(position.id.clone(), position.clone());
            ledger.verify_balance();
            position
        };

        info!(
            "✅ [OPENED] {} ({}) | {:.4} SOL @ {:.10} SOL | sig {}",
            position.token_symbol,
            position.token_address,
            position.amount_in_sol,
            position.entry_price_sol,
            position.entry_signature
        );
        self.persist().await;
        self.emit(TradeEvent::PositionOpened {
            id: position.id.clone(),
            token_address: position.token_address.clone(),
            token_symbol: position.token_symbol.clone(),
            amount_in_sol: position.amount_in_sol,
            entry_price_sol: position.entry_price_sol,
            timestamp: position.opened_at,
        });
        Ok(position)
    }

    /// Records a validated price: current, then peak, then TP1.
    pub async fn update_price(&self, position_id: &str, price_sol: f64) -> Result<PriceUpdate, TraderbotError> {
        if !(price_sol > 0.0) {
            return Err(TraderbotError::InvalidAmount(format!("price {}", price_sol)));
        }
        let update = {
            let mut ledger = self.ledger.write().await;
            let position = ledger
                .positions
                .get_mut(position_id)
                .ok_or_else(|| TraderbotError::PositionNotFound(position_id.to_string()))?;
            if !position.is_open() {
                return Err(TraderbotError::PositionNotOpen(position_id.to_string()));
            }
            let tp1_crossed = position.apply_price(price_sol, self.take_profit_threshold, Utc::now());
            PriceUpdate {
                position: position.clone(),
                tp1_crossed,
            }
        };

        if update.tp1_crossed {
            info!(
                "🎯 [TP1] {} reached +{:.1}% | trailing stop armed at peak {:.10}",
                update.position.token_symbol,
                update.position.pnl_fraction() * 100.0,
                update.position.peak_price_sol
            );
        }
        self.persist().await;
        Ok(update)
    }

    /// Realizes an open position and releases `amount_in + pnl` to the balance.
    /// A position that is no longer open is rejected and never credited twice.
    pub async fn close_position(
        &self,
        position_id: &str,
        exit_price_sol: f64,
        reason: ExitReason,
        exit_signature: &str,
    ) -> Result<Position, TraderbotError> {
        if reason == ExitReason::NoSellRoute {
            return self.write_off(position_id).await;
        }
        if !(exit_price_sol > 0.0) {
            return Err(TraderbotError::InvalidAmount(format!("exit price {}", exit_price_sol)));
        }

        let closed = {
            let mut ledger = self.ledger.write().await;
            let position = ledger
                .positions
                .get_mut(position_id)
                .ok_or_else(|| TraderbotError::PositionNotFound(position_id.to_string()))?;
            if !position.is_open() {
                warn!(
                    "Attempted to close position {} which is already {}",
                    position_id, position.status
                );
                return Err(TraderbotError::PositionNotOpen(position_id.to_string()));
            }

            let pnl = position.close(exit_price_sol, reason, exit_signature, Utc::now());
            let released = position.amount_in_sol + pnl;
            let closed = position.clone();
            ledger.account.current_balance_sol += released;
            ledger.verify_balance();
            closed
        };

        let pnl = closed.pnl_sol.unwrap_or(0.0);
        let pnl_percent = pnl / closed.amount_in_sol * 100.0;
        info!(
            "🚪 [EXIT] {} | {} | {} | PnL {:+.4} SOL ({:+.1}%)",
            closed.token_symbol, reason, closed.status, pnl, pnl_percent
        );
        self.persist().await;
        self.emit(TradeEvent::PositionClosed {
            id: closed.id.clone(),
            token_address: closed.token_address.clone(),
            token_symbol: closed.token_symbol.clone(),
            exit_price_sol,
            pnl_sol: pnl,
            pnl_percent,
            exit_reason: reason.to_string(),
            timestamp: closed.exit_time.unwrap_or_else(Utc::now),
        });
        Ok(closed)
    }

    /// Total loss: the sell route is gone, nothing is returned to the balance.
    pub async fn write_off(&self, position_id: &str) -> Result<Position, TraderbotError> {
        let written_off = {
            let mut ledger = self.ledger.write().await;
            let position = ledger
                .positions
                .get_mut(position_id)
                .ok_or_else(|| TraderbotError::PositionNotFound(position_id.to_string()))?;
            if !position.is_open() {
                warn!(
                    "Attempted to write off position {} which is already {}",
                    position_id, position.status
                );
                return Err(TraderbotError::PositionNotOpen(position_id.to_string()));
            }
            position.write_off(Utc::now());
            let written_off = position.clone();
            ledger.verify_balance();
            written_off
        };

        warn!(
            "💀 [RUGGED] {} ({}) | no sell route | lost {:.4} SOL",
            written_off.token_symbol, written_off.token_address, written_off.amount_in_sol
        );
        self.persist().await;
        self.emit(TradeEvent::PositionWrittenOff {
            id: written_off.id.clone(),
            token_address: written_off.token_address.clone(),
            token_symbol: written_off.token_symbol.clone(),
            lost_sol: written_off.amount_in_sol,
            timestamp: written_off.exit_time.unwrap_or_else(Utc::now),
        });
        Ok(written_off)
    }

    /// Latches the pause. Returns false when already paused; the first
    /// reason is kept.
    pub async fn pause(&self, reason: PauseReason) -> bool {
        {
            let mut ledger = self.ledger.write().await;
            if ledger.account.is_paused() {
                return false;
            }
            ledger.account.trading_state = TradingState::Paused {
                reason: reason.clone(),
                paused_at: Utc::now(),
            };
        }

        error!("🚨 CIRCUIT BREAKER: trading paused ({})", reason);
        self.persist().await;
        self.emit(TradeEvent::TradingPaused {
            reason,
            timestamp: Utc::now(),
        });
        true
    }

    /// Operator action. Clears the latch and restarts the loss-streak window.
    pub async fn resume(&self) -> Result<(), TraderbotError> {
        let now = Utc::now();
        {
            let mut ledger = self.ledger.write().await;
            if !ledger.account.is_paused() {
                return Err(TraderbotError::NotPaused);
            }
            ledger.account.trading_state = TradingState::Running;
            ledger.account.last_resumed_at = Some(now);
        }

        info!("▶️ Trading resumed by operator");
        self.persist().await;
        self.emit(TradeEvent::TradingResumed { timestamp: now });
        Ok(())
    }

    // --- Getters ---

    pub async fn get_position(&self, position_id: &str) -> Option<Position> {
        self.ledger.read().await.positions.get(position_id).cloned()
    }

    pub async fn open_positions(&self) -> Vec<Position> {
        let ledger = self.ledger.read().await;
        let mut open: Vec<Position> = ledger.positions.values().filter(|p| p.is_open()).cloned().collect();
        open.sort_by(|a, b| a.opened_at.cmp(&b.opened_at));
        open
    }

    pub async fn all_positions(&self) -> Vec<Position> {
        let ledger = self.ledger.read().await;
        let mut all: Vec<Position> = ledger.positions.values().cloned().collect();
        all.sort_by(|a, b| b.opened_at.cmp(&a.opened_at));
        all
    }

    /// Most recently closed first
    pub async fn recent_closed(&self, limit: usize) -> Vec<Position> {
        let ledger = self.ledger.read().await;
        let mut closed: Vec<Position> = ledger.positions.values().filter(|p| !p.is_open()).cloned().collect();
        closed.sort_by(|a, b| b.exit_time.cmp(&a.exit_time));
        closed.truncate(limit);
        closed
    }

    pub async fn has_open_position(&self, token_address: &str) -> bool {
        self.ledger.read().await.has_open_position(token_address)
    }

    pub async fn open_count(&self) -> usize {
        self.ledger.read().await.open_count()
    }

    pub fn max_concurrent_positions(&self) -> usize {
        self.max_concurrent_positions
    }

    pub async fn account(&self) -> AccountState {
        self.ledger.read().await.account.clone()
    }

    pub async fn is_paused(&self) -> bool {
        self.ledger.read().await.account.is_paused()
    }

    pub async fn committed_sol(&self) -> f64 {
        self.ledger.read().await.committed_sol()
    }

    pub async fn consecutive_losses(&self) -> usize {
        self.ledger.read().await.consecutive_losses()
    }

    pub async fn stats(&self) -> PerformanceStats {
        let ledger = self.ledger.read().await;
        PerformanceStats::from_positions(ledger.positions.values())
    }

    /// Ledger balance minus the balance implied by the positions
    pub async fn reconcile(&self) -> f64 {
        self.ledger.read().await.verify_balance()
    }
}
