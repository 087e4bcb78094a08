use axum::extract::State;
use axum::{routing::post, Json, Router};
use serde_json::Value;

use crate::state::AppState;

/// POST /tools/call -- one envelope in, one response out.
///
/// Always answers 200: tool failures are reported in the `error` field
/// of the body, exactly as on the WebSocket transport. Dropping the
/// request (client disconnect or timeout) drops the poll loop with it.
async fn call_tool(State(state): State<AppState>, body: String) -> Json<Value> {
    let cancel = state.shutdown.child_token();
    Json(state.dispatcher.dispatch_str(&body, &cancel).await)
}

pub fn router() -> Router<AppState> {
    Router::new().route("/tools/call", post(call_tool))
}
