use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::snapshot::MarketSnapshot;

/// Value of one holding in a given cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenValuation {
    pub symbol: String,
    pub holdings: f64,
    pub value: f64,       // price * holdings
    pub degraded: bool,   // Price came from the last-known cache, not this cycle's fetch
    #[serde(flatten)]
    pub snapshot: MarketSnapshot,
}

/// Self-consistent result of one refresh cycle. This is the unit delivered to
/// subscribers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PortfolioSnapshot {
    /// Only tokens with a usable snapshot this cycle.
    #[serde(rename = "prices")]
    pub valuations: BTreeMap<String, TokenValuation>,
    pub total_value: f64,
    pub generated_at: DateTime<Utc>,
}

impl PortfolioSnapshot {
    pub fn is_empty(&self) -> bool {
        self.valuations.is_empty()
    }

    pub fn get(&self, symbol: &str) -> Option<&TokenValuation> {
        self.valuations.get(symbol)
    }

    pub fn degraded_count(&self) -> usize {
        self.valuations.values().filter(|v| v.degraded).count()
    }
}
