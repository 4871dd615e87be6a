//! `GET /status`: the gateway link's current state, attempt counter and
//! pending telemetry slots.

use axum::{extract::State, routing::get, Json, Router};
use tracing::debug;

use super::AppState;
use crate::gateway::LinkStatus;

// ---

pub fn router() -> Router<AppState> {
    Router::new().route("/status", get(handler))
}

async fn handler(State((link, _)): State<AppState>) -> Json<LinkStatus> {
    // ---
    let status = link.status();
    debug!(state = ?status.state, attempt = status.reconnect_attempt, "GET /status");
    Json(status)
}
