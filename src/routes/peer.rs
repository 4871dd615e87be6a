//! Peer ingress: `POST /peer/{*path}` carries one envelope from the wearable.
//!
//! The path selects the peer channel (`fallwatch/fall_event`,
//! `fallwatch/location`, `fallwatch/sensors`); the body is the envelope JSON.

use axum::{
    body::Bytes, extract::Path, extract::State, http::StatusCode, response::IntoResponse,
    routing::post, Json, Router,
};
use serde_json::json;
use tracing::{debug, warn};

use super::AppState;
use crate::error::RelayError;
use crate::peer::PeerPath;

// ---

pub fn router() -> Router<AppState> {
    // ---
    Router::new().route("/peer/{*path}", post(handler))
}

async fn handler(
    Path(path): Path<String>,
    State((_, companion)): State<AppState>,
    body: Bytes,
) -> impl IntoResponse {
    // ---
    let peer_path = match format!("/{}", path.trim_start_matches('/')).parse::<PeerPath>() {
        Ok(p) => p,
        Err(_) => {
            warn!(%path, "POST /peer - unknown peer path");
            return (
                StatusCode::NOT_FOUND,
                Json(json!({ "error": format!("unknown peer path '{path}'") })),
            )
                .into_response();
        }
    };

    debug!(path = %peer_path, bytes = body.len(), "POST /peer");

    match companion.on_peer_message(peer_path, &body).await {
        Ok(()) => StatusCode::ACCEPTED.into_response(),
        Err(e @ RelayError::Validation(_)) => (
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": e.to_string() })),
        )
            .into_response(),
        Err(e) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({ "error": e.to_string() })),
        )
            .into_response(),
    }
}
