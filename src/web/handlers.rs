//! Request handlers for all API endpoints

use axum::{extract::State, http::StatusCode, Json};
use chrono::Utc;

use super::models::*;
use super::AppState;
use crate::models::PortfolioSnapshot;

// ============================================================================
// Health Check
// ============================================================================

pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let last_update = state.latest_snapshot().await.map(|s| s.generated_at);

    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        timestamp: Utc::now(),
        scheduler_state: state.scheduler_status.state().await,
        cycles_completed: state.scheduler_status.cycles_completed(),
        cached_tokens: state.cache.len().await,
        last_update,
    })
}

// ============================================================================
// Portfolio
// ============================================================================

pub async fn get_portfolio(
    State(state): State<AppState>,
) -> Result<Json<PortfolioSnapshot>, (StatusCode, Json<ErrorResponse>)> {
    match state.latest_snapshot().await {
        Some(snapshot) => Ok(Json(snapshot)),
        None => Err((
            StatusCode::SERVICE_UNAVAILABLE,
            Json(ErrorResponse {
                error: "No price data yet".to_string(),
                details: Some("The first refresh cycle has not produced a snapshot".to_string()),
            }),
        )),
    }
}

// ============================================================================
// Tokens
// ============================================================================

pub async fn get_tokens(State(state): State<AppState>) -> Json<TokensListResponse> {
    let now = Utc::now();
    let mut tokens = Vec::with_capacity(state.tokens.len());

    for token in state.tokens.iter() {
        let last_snapshot = state.cache.get(&token.symbol).await;
        tokens.push(TokenResponse {
            symbol: token.symbol.clone(),
            address: token.address.clone(),
            holdings: token.holdings,
            age_secs: last_snapshot.as_ref().map(|s| s.age(now).num_seconds()),
            last_snapshot,
        });
    }

    let total = tokens.len();
    Json(TokensListResponse { tokens, total })
}
