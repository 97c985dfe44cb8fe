use async_trait::async_trait;

use crate::models::PortfolioSnapshot;

/// Delivers a completed cycle's snapshot to every connected subscriber as a
/// `price_update` event.
///
/// Implementations must not block on slow subscribers.
#[async_trait]
pub trait Publisher: Send + Sync {
    async fn broadcast(&self, snapshot: PortfolioSnapshot);
}
