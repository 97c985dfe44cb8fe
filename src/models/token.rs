use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::error::PriceTrackerError;

/// A tracked token and how much of it the portfolio holds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenConfig {
    pub symbol: String,   // Unique key across the universe
    pub address: String,  // Token contract (mint) address
    pub holdings: f64,    // Units held, never negative
}

impl TokenConfig {
    pub fn new(symbol: &str, address: &str, holdings: f64) -> Self {
        Self {
            symbol: symbol.to_string(),
            address: address.to_string(),
            holdings,
        }
    }
}

#[derive(Debug, Deserialize)]
struct TokenUniverseFile {
    tokens: Vec<TokenConfig>,
}

/// Built-in universe used when no `TOKENS_FILE` is configured.
pub fn default_universe() -> Vec<TokenConfig> {
    vec![
        TokenConfig::new("PONKE", "5z3EqYQo9HiCEs3R84RCDMu2n7anpDMxRhdK8PSWmrRC", 166_344.74),
        TokenConfig::new("GME", "8wXtPeU6557ETkp9WHFY1n1EcU6NxDvbAggHGsMYiHsB", 14_353_435.79),
        TokenConfig::new("USA", "69kdRLyP5DTRkpHraaSZAQbWmAwzF9guKjZfzMXzcbAs", 119_945_783_775.24),
    ]
}

/// Load the token universe from `path` (any format the `config` crate
/// understands), or fall back to the built-in universe.
pub fn load_universe(path: Option<&str>) -> Result<Vec<TokenConfig>, PriceTrackerError> {
    match path {
        Some(path) => parse_universe(config::File::with_name(path)),
        None => validate_universe(default_universe()),
    }
}

fn parse_universe<S>(source: S) -> Result<Vec<TokenConfig>, PriceTrackerError>
where
    S: config::Source + Send + Sync + 'static,
{
    let file: TokenUniverseFile = config::Config::builder()
        .add_source(source)
        .build()
        .and_then(|c| c.try_deserialize())
        .map_err(|e| PriceTrackerError::Config(format!("Failed to read token universe: {}", e)))?;

    validate_universe(file.tokens)
}

/// Reject universes that would break valuation invariants. Order is kept as
/// given since it is the per-cycle processing order.
pub fn validate_universe(tokens: Vec<TokenConfig>) -> Result<Vec<TokenConfig>, PriceTrackerError> {
    if tokens.is_empty() {
        return Err(PriceTrackerError::Config("Token universe is empty".to_string()));
    }

    let mut seen = HashSet::new();
    for token in &tokens {
        if token.symbol.trim().is_empty() {
            return Err(PriceTrackerError::Config("Token with empty symbol".to_string()));
        }
        if token.address.trim().is_empty() {
            return Err(PriceTrackerError::Config(format!("Token {} has no address", token.symbol)));
        }
        if !token.holdings.is_finite() || token.holdings < 0.0 {
            return Err(PriceTrackerError::Config(format!(
                "Token {} has invalid holdings {}",
                token.symbol, token.holdings
            )));
        }
        if !seen.insert(token.symbol.as_str()) {
            return Err(PriceTrackerError::Config(format!("Duplicate token symbol {}", token.symbol)));
        }
    }

    Ok(tokens)
}
