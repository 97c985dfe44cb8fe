use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Point-in-time market reading for one token, taken from its most liquid
/// trading pair. Superseded by later snapshots, never mutated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarketSnapshot {
    pub price: f64,              // USD
    pub price_change_24h: f64,   // Percent
    pub volume_24h: f64,         // USD
    pub liquidity: f64,          // USD
    pub fdv: f64,                // Fully diluted valuation, USD
    #[serde(rename = "dexId")]
    pub source_id: String,       // Liquidity venue, e.g. "raydium"
    pub pair_address: String,
    pub observed_at: DateTime<Utc>,
}

impl MarketSnapshot {
    /// Age of the reading relative to `now`.
    pub fn age(&self, now: DateTime<Utc>) -> chrono::Duration {
        now - self.observed_at
    }
}
