pub mod health;
pub mod tools;

use axum::routing::get;
use axum::Router;

use crate::state::AppState;
use crate::ws::ws_handler;

/// Tool-call surfaces: WebSocket upgrade on `/ws` (and `/`, for clients
/// that connect to the bare address) plus `POST /tools/call`.
pub fn tool_routes() -> Router<AppState> {
    Router::new()
        .route("/", get(ws_handler))
        .route("/ws", get(ws_handler))
        .merge(tools::router())
}
