use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::fmt::Display;
use std::str::FromStr;

use crate::error::TraderbotError;

pub const DEFAULT_JUPITER_API_URL: &str = "https://quote-api.jup.ag/v6";
pub const DEFAULT_LEDGER_PATH: &str = "data/ledger.json";
/// One year; hold ceilings beyond this are treated as misconfiguration
pub const MAX_HOLD_CEILING_MINUTES: u64 = 365 * 24 * 60;

/// What the drawdown breaker measures against the starting balance.
#[derive(Clone, Copy, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DrawdownBasis {
    /// Free cash only. Capital sitting in open positions counts as drawn down.
    Cash,
    /// Free cash plus capital committed to open positions.
    Equity,
}

impl FromStr for DrawdownBasis {
    type Err = TraderbotError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "cash" => Ok(Self::Cash),
            "equity" => Ok(Self::Equity),
            other => Err(TraderbotError::ConfigError(format!(
                "DRAWDOWN_BASIS must be 'cash' or 'equity', got '{}'",
                other
            ))),
        }
    }
}

impl std::fmt::Display for DrawdownBasis {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Cash => write!(f, "cash"),
            Self::Equity => write!(f, "equity"),
        }
    }
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct Config {
    // Account
    pub starting_balance_sol: f64,
    pub max_concurrent_positions: usize,
    pub position_size_fraction: f64,
    pub min_position_sol: f64,

    // Entry filters
    pub min_score: f64,
    pub max_slippage_percent: f64,
    pub reject_cooldown_secs: u64,

    // Exit rules (fractions, 1.0 = 100%)
    pub take_profit_threshold: f64,
    pub stop_loss_threshold: f64,
    pub trailing_stop_fraction: f64,
    pub max_hold_minutes: u64,
    pub max_hold_after_tp1_minutes: u64,

    // Circuit breakers
    pub min_balance_sol: f64,
    pub max_drawdown: f64,
    pub drawdown_basis: DrawdownBasis,
    pub loss_streak_limit: usize,

    // Loop cadence
    pub scan_interval_secs: u64,
    pub monitor_interval_secs: u64,
    pub monitor_start_delay_secs: u64,
    pub status_every_cycles: u64,

    // Quote oracle
    pub jupiter_api_url: String,
    pub jupiter_api_key: Option<String>,
    pub token_decimals: u8,
    pub quote_slippage_bps: u32,
    pub quote_max_attempts: u32,
    pub quote_timeout_ms: u64,
    pub quote_backoff_base_ms: u64,
    pub quote_backoff_max_ms: u64,

    // Discovery
    pub opportunity_feed_urls: Vec<String>,

    // Persistence & operator API
    pub ledger_path: String,
    pub api_host: Option<String>,
    pub api_port: Option<u16>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            starting_balance_sol: 0.5,
            max_concurrent_positions: 10,
            position_size_fraction: 0.08,
            min_position_sol: 0.001,

            min_score: 40.0,
            max_slippage_percent: 15.0,
            reject_cooldown_secs: 300,

            take_profit_threshold: 1.0,
            stop_loss_threshold: -0.30,
            trailing_stop_fraction: 0.20,
            max_hold_minutes: 60,
            max_hold_after_tp1_minutes: 60,

            min_balance_sol: 0.05,
            max_drawdown: 0.25,
            drawdown_basis: DrawdownBasis::Cash,
            loss_streak_limit: 5,

            scan_interval_secs: 15,
            monitor_interval_secs: 5,
            monitor_start_delay_secs: 2,
            status_every_cycles: 10,

            jupiter_api_url: DEFAULT_JUPITER_API_URL.to_string(),
            jupiter_api_key: None,
            token_decimals: 6,
            quote_slippage_bps: 300,
            quote_max_attempts: 3,
            quote_timeout_ms: 8_000,
            quote_backoff_base_ms: 1_000,
            quote_backoff_max_ms: 5_000,

            opportunity_feed_urls: Vec::new(),

            ledger_path: DEFAULT_LEDGER_PATH.to_string(),
            api_host: None,
            api_port: None,
        }
    }
}

/// Reads `key`, falling back to `default` when unset. A value that is set but
/// does not parse is an error rather than a silent fallback.
fn env_or<T>(key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: Display,
{
    match env::var(key) {
        Ok(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse::<T>()
            .map_err(|e| anyhow::anyhow!("{}", e))
            .with_context(|| format!("Failed to parse {}", key)),
        _ => Ok(default),
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        let d = Self::default();

        let opportunity_feed_urls = env::var("OPPORTUNITY_FEED_URLS")
            .map(|raw| {
                raw.split(',')
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect()
            })
            .unwrap_or_default();

        let config = Self {
            starting_balance_sol: env_or("STARTING_BALANCE_SOL", d.starting_balance_sol)?,
            max_concurrent_positions: env_or("MAX_CONCURRENT_POSITIONS", d.max_concurrent_positions)?,
            position_size_fraction: env_or("POSITION_SIZE_FRACTION", d.position_size_fraction)?,
            min_position_sol: env_or("MIN_POSITION_SOL", d.min_position_sol)?,

            min_score: env_or("MIN_SCORE", d.min_score)?,
            max_slippage_percent: env_or("MAX_SLIPPAGE_PERCENT", d.max_slippage_percent)?,
            reject_cooldown_secs: env_or("REJECT_COOLDOWN_SECS", d.reject_cooldown_secs)?,

            take_profit_threshold: env_or("TAKE_PROFIT_THRESHOLD", d.take_profit_threshold)?,
            stop_loss_threshold: env_or("STOP_LOSS_THRESHOLD", d.stop_loss_threshold)?,
            trailing_stop_fraction: env_or("TRAILING_STOP_FRACTION", d.trailing_stop_fraction)?,
            max_hold_minutes: env_or("MAX_HOLD_MINUTES", d.max_hold_minutes)?,
            max_hold_after_tp1_minutes: env_or(
                "MAX_HOLD_AFTER_TP1_MINUTES",
                d.max_hold_after_tp1_minutes,
            )?,

            min_balance_sol: env_or("MIN_BALANCE_SOL", d.min_balance_sol)?,
            max_drawdown: env_or("MAX_DRAWDOWN", d.max_drawdown)?,
            drawdown_basis: env_or("DRAWDOWN_BASIS", d.drawdown_basis)?,
            loss_streak_limit: env_or("LOSS_STREAK_LIMIT", d.loss_streak_limit)?,

            scan_interval_secs: env_or("SCAN_INTERVAL_SECS", d.scan_interval_secs)?,
            monitor_interval_secs: env_or("MONITOR_INTERVAL_SECS", d.monitor_interval_secs)?,
            monitor_start_delay_secs: env_or("MONITOR_START_DELAY_SECS", d.monitor_start_delay_secs)?,
            status_every_cycles: env_or("STATUS_EVERY_CYCLES", d.status_every_cycles)?,

            jupiter_api_url: env::var("JUPITER_API_URL").unwrap_or(d.jupiter_api_url),
            jupiter_api_key: env::var("JUPITER_API_KEY").ok().filter(|k| !k.is_empty()),
            token_decimals: env_or("TOKEN_DECIMALS", d.token_decimals)?,
            quote_slippage_bps: env_or("QUOTE_SLIPPAGE_BPS", d.quote_slippage_bps)?,
            quote_max_attempts: env_or("QUOTE_MAX_ATTEMPTS", d.quote_max_attempts)?,
            quote_timeout_ms: env_or("QUOTE_TIMEOUT_MS", d.quote_timeout_ms)?,
            quote_backoff_base_ms: env_or("QUOTE_BACKOFF_BASE_MS", d.quote_backoff_base_ms)?,
            quote_backoff_max_ms: env_or("QUOTE_BACKOFF_MAX_MS", d.quote_backoff_max_ms)?,

            opportunity_feed_urls,

            ledger_path: env::var("LEDGER_PATH").unwrap_or(d.ledger_path),
            api_host: env::var("API_HOST").ok(),
            api_port: env::var("API_PORT")
                .ok()
                .map(|p| p.parse::<u16>())
                .transpose()
                .context("Failed to parse API_PORT")?,
        };

        config.validate()?;
        Ok(config)
    }

    /// Rejects settings that would make the exit or breaker rules incoherent.
    pub fn validate(&self) -> Result<(), TraderbotError> {
        let fail = |msg: String| Err(TraderbotError::ConfigError(msg));

        if self.starting_balance_sol <= 0.0 {
            return fail(format!("STARTING_BALANCE_SOL must be positive, got {}", self.starting_balance_sol));
        }
        if self.max_concurrent_positions == 0 {
            return fail("MAX_CONCURRENT_POSITIONS must be at least 1".to_string());
        }
        if !(self.position_size_fraction > 0.0 && self.position_size_fraction <= 1.0) {
            return fail(format!("POSITION_SIZE_FRACTION must be in (0, 1], got {}", self.position_size_fraction));
        }
        if self.take_profit_threshold <= 0.0 {
            return fail(format!("TAKE_PROFIT_THRESHOLD must be positive, got {}", self.take_profit_threshold));
        }
        if !(self.stop_loss_threshold < 0.0 && self.stop_loss_threshold > -1.0) {
            return fail(format!("STOP_LOSS_THRESHOLD must be in (-1, 0), got {}", self.stop_loss_threshold));
        }
        if !(self.trailing_stop_fraction > 0.0 && self.trailing_stop_fraction < 1.0) {
            return fail(format!("TRAILING_STOP_FRACTION must be in (0, 1), got {}", self.trailing_stop_fraction));
        }
        for (key, minutes) in [
            ("MAX_HOLD_MINUTES", self.max_hold_minutes),
            ("MAX_HOLD_AFTER_TP1_MINUTES", self.max_hold_after_tp1_minutes),
        ] {
            if minutes == 0 || minutes > MAX_HOLD_CEILING_MINUTES {
                return fail(format!(
                    "{} must be in [1, {}], got {}",
                    key, MAX_HOLD_CEILING_MINUTES, minutes
                ));
            }
        }
        if !(self.max_drawdown > 0.0 && self.max_drawdown <= 1.0) {
            return fail(format!("MAX_DRAWDOWN must be in (0, 1], got {}", self.max_drawdown));
        }
        if self.max_slippage_percent < 0.0 {
            return fail(format!("MAX_SLIPPAGE_PERCENT must not be negative, got {}", self.max_slippage_percent));
        }
        if self.quote_max_attempts == 0 {
            return fail("QUOTE_MAX_ATTEMPTS must be at least 1".to_string());
        }
        if self.scan_interval_secs == 0 || self.monitor_interval_secs == 0 {
            return fail("SCAN_INTERVAL_SECS and MONITOR_INTERVAL_SECS must be non-zero".to_string());
        }
        Ok(())
    }
}
