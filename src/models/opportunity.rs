use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A scored candidate handed to us by a discovery source. Never persisted.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Opportunity {
    /// Token mint address
    pub address: String,
    pub symbol: String,
    /// 0-100, higher is better
    pub score: f64,
    /// Which source produced it, e.g. "pumpfun", "dexscreener", "both"
    #[serde(default = "default_source")]
    pub source: String,
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
}

fn default_source() -> String {
    "unknown".to_string()
}

#[cfg(test)]
impl Opportunity {
    pub fn new(address: &str, symbol: &str, score: f64, source: &str) -> Self {
        Self {
            address: address.to_string(),
            symbol: symbol.to_string(),
            score,
            source: source.to_string(),
            timestamp: Utc::now(),
        }
    }
}
