//! Request and Response DTOs for the Web API

use serde::Serialize;
use chrono::{DateTime, Utc};

use crate::models::MarketSnapshot;
use crate::tracker::SchedulerState;

// ============================================================================
// Health & Status
// ============================================================================

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub timestamp: DateTime<Utc>,
    pub scheduler_state: SchedulerState,
    pub cycles_completed: u64,
    pub cached_tokens: usize,
    pub last_update: Option<DateTime<Utc>>,
}

// ============================================================================
// Tokens
// ============================================================================

#[derive(Debug, Serialize)]
pub struct TokenResponse {
    pub symbol: String,
    pub address: String,
    pub holdings: f64,
    pub last_snapshot: Option<MarketSnapshot>,
    pub age_secs: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct TokensListResponse {
    pub tokens: Vec<TokenResponse>,
    pub total: usize,
}

// ============================================================================
// Generic Responses
// ============================================================================

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub details: Option<String>,
}
