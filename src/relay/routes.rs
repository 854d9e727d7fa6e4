//! Route-grouping functions, one per resource, merged into a single router.

use super::{handlers, websocket, RelayState};
use axum::routing::get;
use axum::Router;

fn pool_routes() -> Router<RelayState> {
    Router::new()
        .route("/api/pools", get(handlers::list_pools))
        .route("/api/pools/:pool", get(handlers::get_pool))
}

fn position_routes() -> Router<RelayState> {
    Router::new()
        .route("/api/positions", get(handlers::list_positions))
        .route("/api/positions/pending", get(handlers::list_pending_harvests))
        .route("/api/user-bins", get(handlers::user_bins))
}

fn stats_routes() -> Router<RelayState> {
    Router::new().route("/api/stats", get(handlers::stats))
}

fn health_routes() -> Router<RelayState> {
    Router::new().route("/health", get(handlers::health))
}

pub fn build_routes(_state: RelayState) -> Router<RelayState> {
    Router::new()
        .merge(pool_routes())
        .merge(position_routes())
        .merge(stats_routes())
        .merge(health_routes())
        .route("/ws", get(websocket::websocket_handler))
}
