//! API route definitions

use axum::{routing::get, Router};
use tower_http::services::ServeDir;

use super::handlers;
use super::websocket::ws_handler;
use super::AppState;

/// Create all API routes
pub fn create_routes(state: AppState) -> Router {
    let static_files = ServeDir::new(&state.config.static_dir);

    Router::new()
        // Health check
        .route("/api/health", get(handlers::health_check))

        // Portfolio
        .route("/api/portfolio", get(handlers::get_portfolio))

        // Tokens
        .route("/api/tokens", get(handlers::get_tokens))

        // WebSocket
        .route("/ws", get(ws_handler))

        // Page and assets
        .fallback_service(static_files)

        // Add state to all routes
        .with_state(state)
}
