use axum::extract::State;
use axum::{routing::get, Json, Router};
use serde::Serialize;

use crate::state::AppState;

/// Health check response payload.
#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    /// Crate version from Cargo.toml.
    pub version: &'static str,
    /// ComfyUI instance this server submits to.
    pub comfyui_url: String,
    /// Currently open WebSocket connections.
    pub ws_connections: usize,
}

/// GET /health -- liveness plus a little runtime detail.
async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let status = if state.shutdown.is_cancelled() {
        "shutting_down"
    } else {
        "ok"
    };

    Json(HealthResponse {
        status,
        version: env!("CARGO_PKG_VERSION"),
        comfyui_url: state.config.comfyui_url.clone(),
        ws_connections: state.ws_manager.connection_count().await,
    })
}

pub fn router() -> Router<AppState> {
    Router::new().route("/health", get(health_check))
}
