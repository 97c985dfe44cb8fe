//! Web layer: REST read endpoints and the WebSocket fan-out that delivers
//! portfolio updates to subscribers.

pub mod server;
pub mod routes;
pub mod handlers;
pub mod websocket;
pub mod models;

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{broadcast, RwLock};

use crate::config::Config;
use crate::models::{PortfolioSnapshot, TokenConfig};
use crate::tracker::{LastKnownCache, Publisher, SchedulerStatus};

use self::websocket::WsMessage;

/// Shared application state for all API handlers
#[derive(Clone)]
pub struct AppState {
    /// Application configuration
    pub config: Arc<Config>,
    /// Configured token universe, in processing order
    pub tokens: Arc<Vec<TokenConfig>>,
    /// Last known-good snapshot per token (written by the scheduler)
    pub cache: LastKnownCache,
    /// Read-only view of the refresh scheduler
    pub scheduler_status: SchedulerStatus,
    /// Most recently published snapshot, replayed to late joiners
    latest: Arc<RwLock<Option<PortfolioSnapshot>>>,
    /// Broadcast channel for WebSocket messages
    ws_tx: broadcast::Sender<WsMessage>,
}

impl AppState {
    /// Create a new AppState instance
    pub fn new(
        config: Arc<Config>,
        tokens: Arc<Vec<TokenConfig>>,
        cache: LastKnownCache,
        scheduler_status: SchedulerStatus,
    ) -> Self {
        // Lagging subscribers drop old updates instead of holding up the sender
        let (ws_tx, _) = broadcast::channel(100);

        Self {
            config,
            tokens,
            cache,
            scheduler_status,
            latest: Arc::new(RwLock::new(None)),
            ws_tx,
        }
    }

    /// Get a new receiver for WebSocket messages
    pub fn subscribe_ws(&self) -> broadcast::Receiver<WsMessage> {
        self.ws_tx.subscribe()
    }

    /// Send a message to all WebSocket clients
    pub fn send_ws(&self, msg: WsMessage) {
        // Ignore errors (no subscribers)
        let _ = self.ws_tx.send(msg);
    }

    pub async fn latest_snapshot(&self) -> Option<PortfolioSnapshot> {
        self.latest.read().await.clone()
    }
}

#[async_trait]
impl Publisher for AppState {
    async fn broadcast(&self, snapshot: PortfolioSnapshot) {
        *self.latest.write().await = Some(snapshot.clone());
        self.send_ws(WsMessage::PriceUpdate(snapshot));
    }
}
