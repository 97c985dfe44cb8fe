use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Utc};
use tracing::warn;

use crate::models::{MarketSnapshot, PortfolioSnapshot, TokenConfig, TokenValuation};

/// Where a token's snapshot for the current cycle came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SnapshotSource {
    Fresh,
    Cached,
}

#[derive(Debug, Clone)]
pub struct ResolvedSnapshot {
    pub snapshot: MarketSnapshot,
    pub source: SnapshotSource,
}

impl ResolvedSnapshot {
    pub fn fresh(snapshot: MarketSnapshot) -> Self {
        Self { snapshot, source: SnapshotSource::Fresh }
    }

    pub fn cached(snapshot: MarketSnapshot) -> Self {
        Self { snapshot, source: SnapshotSource::Cached }
    }
}

/// Combines static holdings with this cycle's snapshots.
pub struct PortfolioAggregator;

impl PortfolioAggregator {
    /// Value every configured token that has a snapshot. Tokens without one
    /// are left out of the result entirely, as are symbols in `snapshots` that
    /// are not part of the configured universe. A token whose value is not a
    /// finite number is dropped for this cycle.
    ///
    /// The total is always the sum over exactly the included valuations.
    pub fn aggregate(
        tokens: &[TokenConfig],
        snapshots: &HashMap<String, ResolvedSnapshot>,
        generated_at: DateTime<Utc>,
    ) -> PortfolioSnapshot {
        let mut valuations = BTreeMap::new();

        for token in tokens {
            let Some(resolved) = snapshots.get(&token.symbol) else {
                continue;
            };

            let value = resolved.snapshot.price * token.holdings;
            if !value.is_finite() {
                warn!(
                    "Excluding {} from valuation: non-finite value (price {}, holdings {})",
                    token.symbol, resolved.snapshot.price, token.holdings
                );
                continue;
            }

            valuations.insert(
                token.symbol.clone(),
                TokenValuation {
                    symbol: token.symbol.clone(),
                    holdings: token.holdings,
                    value,
                    degraded: resolved.source == SnapshotSource::Cached,
                    snapshot: resolved.snapshot.clone(),
                },
            );
        }

        let total_value = valuations.values().map(|v: &TokenValuation| v.value).sum();

        PortfolioSnapshot {
            valuations,
            total_value,
            generated_at,
        }
    }
}
