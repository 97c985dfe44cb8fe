use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;

use crate::models::MarketSnapshot;

/// Last known-good snapshot per token symbol.
///
/// Written by the refresh scheduler after each successful fetch, read as a
/// fallback when a token's refresh fails and by the web layer. Entries are
/// never evicted; the universe is small and fixed. Cloning shares the
/// underlying map.
#[derive(Debug, Clone, Default)]
pub struct LastKnownCache {
    entries: Arc<RwLock<HashMap<String, MarketSnapshot>>>,
}

impl LastKnownCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get(&self, symbol: &str) -> Option<MarketSnapshot> {
        self.entries.read().await.get(symbol).cloned()
    }

    /// Store `snapshot` as the newest value for `symbol`, replacing any
    /// previous entry.
    pub async fn put(&self, symbol: &str, snapshot: MarketSnapshot) {
        self.entries.write().await.insert(symbol.to_string(), snapshot);
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn snapshot(price: f64) -> MarketSnapshot {
        MarketSnapshot {
            price,
            price_change_24h: 0.0,
            volume_24h: 0.0,
            liquidity: 1000.0,
            fdv: 0.0,
            source_id: "raydium".to_string(),
            pair_address: "pair".to_string(),
            observed_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_get_missing_is_none() {
        let cache = LastKnownCache::new();
        assert!(cache.get("X").await.is_none());
        assert_eq!(cache.len().await, 0);
    }

    #[tokio::test]
    async fn test_put_overwrites() {
        let cache = LastKnownCache::new();
        cache.put("X", snapshot(2.5)).await;
        cache.put("X", snapshot(3.0)).await;

        assert_eq!(cache.get("X").await.unwrap().price, 3.0);
        assert_eq!(cache.len().await, 1);
    }

    #[tokio::test]
    async fn test_clones_share_entries() {
        let cache = LastKnownCache::new();
        let reader = cache.clone();
        cache.put("Y", snapshot(1.0)).await;

        assert_eq!(reader.get("Y").await.unwrap().price, 1.0);
    }
}
