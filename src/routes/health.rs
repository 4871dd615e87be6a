// src/routes/health.rs
//! Liveness endpoint for the companion daemon.
//!
//! Reports that the process is up and answering HTTP. It does not reflect
//! gateway readiness; that is what `/status` is for.

use axum::{routing::get, Json, Router};
use serde::Serialize;

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse { status: "ok" })
}

/// Subrouter with `GET /health`, generic over the gateway router's state.
pub fn router<S>() -> Router<S>
where
    S: Clone + Send + Sync + 'static,
{
    Router::new().route("/health", get(health))
}
