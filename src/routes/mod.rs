//! HTTP gateway for the companion daemon (EMBP).
//!
//! Each sibling module exports a subrouter; this module merges them and binds
//! the shared state so `main.rs` never sees individual endpoints.

use std::sync::Arc;

use axum::Router;

use crate::companion::CompanionRelay;
use crate::gateway::GatewayLink;

mod health;
mod peer;
mod status;

/// State shared by every route.
pub type AppState = (GatewayLink, Arc<CompanionRelay>);

// ---

pub fn router(link: GatewayLink, companion: Arc<CompanionRelay>) -> Router {
    // ---
    Router::new()
        .merge(peer::router())
        .merge(status::router())
        .merge(health::router())
        .with_state((link, companion))
}
