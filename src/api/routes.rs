use super::{handlers, ApiState};
use axum::{
    routing::{get, post},
    Router,
};
use tower_http::cors::CorsLayer;

pub fn create_router(state: ApiState) -> Router {
    Router::new()
        .route("/health", get(handlers::health))
        // Backfill routes
        .route(
            "/api/chains/:chain_id/backfill",
            get(handlers::get_backfill_status).post(handlers::start_backfill),
        )
        .route("/api/chains/:chain_id/backfill/cancel", post(handlers::cancel_backfill))
        // Chain status routes
        .route("/api/chains/:chain_id/price", get(handlers::get_price_status))
        .route("/api/chains/:chain_id/pools", get(handlers::get_pool_states))
        // Wallet routes
        .route("/api/wallets/top", get(handlers::get_top_wallets))
        .route("/api/wallets/tracked", get(handlers::get_tracked_wallets))
        .route("/api/wallets/:address", get(handlers::get_wallet))
        .route("/api/wallets/:address/track", post(handlers::track_wallet))
        .route("/api/wallets/:address/mute", post(handlers::mute_wallet))
        // Dashboard & settings routes
        .route("/api/stats", get(handlers::get_stats_dashboard))
        .route(
            "/api/settings",
            get(handlers::get_alert_settings).put(handlers::update_alert_settings),
        )
        .layer(CorsLayer::permissive())
        .with_state(state)
}
