//! API Routes
//!
//! Router configuration for the HTTP API.

use axum::{
    Router,
    routing::{get, post},
};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use super::handlers::{self, ApiState};

/// Create the API router with all routes
pub fn create_router(state: ApiState) -> Router {
    Router::new()
        // Health
        .route("/health", get(handlers::health))
        // Session custody
        .route("/session", post(handlers::init_session))
        .route(
            "/session/{wallet}",
            get(handlers::get_session).delete(handlers::destroy_session),
        )
        // Pool
        .route("/pool", get(handlers::get_pool))
        .route("/balance/{wallet}", get(handlers::get_balance))
        .route("/deposit", post(handlers::deposit))
        .route("/withdraw", post(handlers::withdraw))
        // Scheduled transfers
        .route("/transfers", post(handlers::setup_transfer))
        .route("/transfers/{wallet}", get(handlers::list_transfers))
        .route("/transfers/{wallet}/due", get(handlers::due_transfers))
        .route("/transfers/{wallet}/cached", get(handlers::cached_transfers))
        .route("/transfers/execute", post(handlers::execute_transfer))
        .route("/transfers/cancel", post(handlers::cancel_transfer))
        .fallback(handlers::not_found)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
