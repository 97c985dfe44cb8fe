//! DEX Screener API Client
//!
//! Fetches the trading pairs of a token from
//! `/latest/dex/tokens/{address}` and reduces them to a single
//! [`MarketSnapshot`] taken from the most liquid valid pair.
//!
//! The provider is loose with types (`priceUsd` is a string, other numbers may
//! be missing or null), so every numeric field is parsed leniently and
//! defaults to zero instead of failing the whole response.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::error::PriceTrackerError;
use crate::models::MarketSnapshot;

pub const DEXSCREENER_BASE_URL: &str = "https://api.dexscreener.com";
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

/// Source of per-token market snapshots.
///
/// A single call is a single attempt: implementations must not retry
/// internally, the caller owns the retry budget.
#[async_trait]
pub trait MarketDataSource: Send + Sync {
    async fn fetch(&self, address: &str) -> Result<MarketSnapshot, PriceTrackerError>;
}

// ============================================================================
// Response Structures
// ============================================================================

/// Pairs stay raw until [`TokenPairsResponse::usable_pairs`] so that one
/// entry that is not an object does not sink the whole response.
#[derive(Debug, Deserialize)]
pub struct TokenPairsResponse {
    #[serde(default)]
    pub pairs: Option<Vec<Value>>,
}

impl TokenPairsResponse {
    pub fn usable_pairs(self) -> Vec<DexPair> {
        self.pairs
            .unwrap_or_default()
            .into_iter()
            .filter_map(|raw| serde_json::from_value::<DexPair>(raw).ok())
            .collect()
    }
}

/// One trading pair as reported by DEX Screener. Fields are kept as raw JSON
/// so that a malformed value degrades to zero/empty.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DexPair {
    #[serde(default)]
    pub price_usd: Value,
    #[serde(default)]
    pub price_change: Value, // { "h24": ... }
    #[serde(default)]
    pub volume: Value,       // { "h24": ... }
    #[serde(default)]
    pub liquidity: Value,    // { "usd": ... }
    #[serde(default)]
    pub fdv: Value,
    #[serde(default)]
    pub dex_id: Value,
    #[serde(default)]
    pub pair_address: Value,
}

fn lenient_f64(value: &Value) -> f64 {
    let parsed = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    parsed.filter(|v| v.is_finite()).unwrap_or(0.0)
}

/// For quantities that cannot be negative; a negative reading is malformed.
fn lenient_non_negative_f64(value: &Value) -> f64 {
    lenient_f64(value).max(0.0)
}

fn lenient_string(value: &Value) -> String {
    value.as_str().unwrap_or_default().to_string()
}

impl DexPair {
    pub fn price(&self) -> f64 {
        lenient_f64(&self.price_usd)
    }

    pub fn liquidity_usd(&self) -> f64 {
        lenient_f64(&self.liquidity["usd"])
    }

    pub fn price_change_h24(&self) -> f64 {
        lenient_f64(&self.price_change["h24"])
    }

    pub fn volume_h24(&self) -> f64 {
        lenient_non_negative_f64(&self.volume["h24"])
    }

    pub fn fdv(&self) -> f64 {
        lenient_non_negative_f64(&self.fdv)
    }

    /// A pair is only usable if it has a positive price and positive liquidity.
    pub fn is_valid(&self) -> bool {
        self.price() > 0.0 && self.liquidity_usd() > 0.0
    }

    pub fn to_snapshot(&self, observed_at: DateTime<Utc>) -> MarketSnapshot {
        MarketSnapshot {
            price: self.price(),
            price_change_24h: self.price_change_h24(),
            volume_24h: self.volume_h24(),
            liquidity: self.liquidity_usd(),
            fdv: self.fdv(),
            source_id: lenient_string(&self.dex_id),
            pair_address: lenient_string(&self.pair_address),
            observed_at,
        }
    }
}

/// Pick the valid pair with the highest USD liquidity. On a tie the pair
/// listed first by the provider wins.
pub fn select_best_pair(pairs: &[DexPair]) -> Option<&DexPair> {
    pairs
        .iter()
        .filter(|p| p.is_valid())
        .fold(None, |best: Option<&DexPair>, pair| match best {
            Some(current) if current.liquidity_usd() >= pair.liquidity_usd() => Some(current),
            _ => Some(pair),
        })
}

// ============================================================================
// DEX Screener Client
// ============================================================================

#[derive(Debug, Clone)]
pub struct DexScreenerClient {
    base_url: String,
    client: Client,
}

impl DexScreenerClient {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, PriceTrackerError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| PriceTrackerError::Config(format!("Failed to create HTTP client for DEX Screener: {}", e)))?;

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
        })
    }

    /// Fetch all pairs the provider lists for a token.
    pub async fn get_token_pairs(&self, address: &str) -> Result<Vec<DexPair>, PriceTrackerError> {
        let url = format!("{}/latest/dex/tokens/{}", self.base_url, address);
        debug!("Fetching pairs from DEX Screener for {}: {}", address, url);

        let response = self.client.get(&url).send().await?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            warn!("DEX Screener API error for token {}: {} - {}", address, status, error_text);
            return Err(PriceTrackerError::HttpStatus {
                status: status.as_u16(),
                address: address.to_string(),
            });
        }

        let body = response.text().await?;
        let parsed: TokenPairsResponse = serde_json::from_str(&body).map_err(|e| {
            PriceTrackerError::InvalidResponse(format!("DEX Screener response for {}: {}", address, e))
        })?;

        Ok(parsed.usable_pairs())
    }

    /// Fetch the token's pairs and reduce them to a snapshot of the most
    /// liquid one.
    pub async fn get_market_snapshot(&self, address: &str) -> Result<MarketSnapshot, PriceTrackerError> {
        let pairs = self.get_token_pairs(address).await?;

        let pair = select_best_pair(&pairs).ok_or_else(|| {
            warn!("No valid pair found for {} ({} listed)", address, pairs.len());
            PriceTrackerError::NoPairs(address.to_string())
        })?;

        let snapshot = pair.to_snapshot(Utc::now());
        info!(
            "Price found for {}: ${:.8} on {} (liquidity ${:.2})",
            address, snapshot.price, snapshot.source_id, snapshot.liquidity
        );
        Ok(snapshot)
    }
}

#[async_trait]
impl MarketDataSource for DexScreenerClient {
    async fn fetch(&self, address: &str) -> Result<MarketSnapshot, PriceTrackerError> {
        self.get_market_snapshot(address).await
    }
}
