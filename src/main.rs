//! Application entry point for the `fallwatch-relay` companion daemon.
//!
//! This binary orchestrates the full startup sequence for the relay,
//! including:
//! - Loading configuration from environment variables or `.env`
//! - Initializing structured logging/tracing
//! - Spawning the gateway link actor and starting the connection
//! - Mounting the peer-ingress and status routes via the `routes` gateway (EMBP)
//! - Binding the Axum HTTP server and serving until Ctrl-C
//!
//! # Environment Variables
//! - `GATEWAY_HOST` (**required**) – event-ingestion gateway host
//! - `RELAY_LOG_LEVEL` (optional) – log verbosity (default: `debug`)
//! - `RELAY_SPAN_EVENTS` (optional) – span event mode for tracing
//!
//! See [`fallwatch_relay::config`] for the rest.
use std::{env, io::IsTerminal, net::SocketAddr, sync::Arc};

use anyhow::Result;
use axum::Router;
use dotenvy::dotenv;
use tracing_subscriber::filter::EnvFilter;
use tracing_subscriber::fmt::format::FmtSpan;

use fallwatch_relay::gateway::HttpGatewayTransport;
use fallwatch_relay::{config, routes, CompanionRelay, GatewayLink};

// ---

#[tokio::main]
async fn main() -> Result<()> {
    // ---
    dotenv().ok();
    init_tracing();

    let cfg = config::load_from_env()?;
    cfg.log_config();

    let transport = Arc::new(HttpGatewayTransport::new(cfg.gateway_timeout())?);
    let link = GatewayLink::spawn(cfg.link_config(), transport, cfg.envelope_builder());
    link.start();

    let companion = Arc::new(CompanionRelay::new(cfg.envelope_builder(), link.clone()));

    // Build app from routes gateway (EMBP)
    let app: Router = routes::router(link.clone(), companion);

    let addr = SocketAddr::from(([0, 0, 0, 0], cfg.listen_port));
    tracing::info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Shutting down gateway link");
    link.shutdown().await;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for Ctrl-C: {}", e);
    }
}

// ---

/// Initialize the global tracing subscriber for structured logging.
///
/// - Color output: `FORCE_COLOR=1|true|yes` forces on, `0|false|no` forces
///   off, anything else auto-detects a TTY.
/// - Span events from `RELAY_SPAN_EVENTS`: `"full"`, `"enter_exit"`, or
///   CLOSE only by default.
/// - Log level from `RUST_LOG` if set, else `RELAY_LOG_LEVEL` (default `debug`).
fn init_tracing() {
    // ---
    let span_events = match env::var("RELAY_SPAN_EVENTS").as_deref() {
        Ok("full") => FmtSpan::FULL,
        Ok("enter_exit") => FmtSpan::ENTER | FmtSpan::EXIT,
        _ => FmtSpan::CLOSE,
    };

    let use_color = match env::var("FORCE_COLOR").as_deref() {
        Ok("1") | Ok("true") | Ok("yes") => true,
        Ok("0") | Ok("false") | Ok("no") => false,
        _ => std::io::stdout().is_terminal(),
    };

    let env_filter = if env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else {
        let level = match env::var("RELAY_LOG_LEVEL").ok().as_deref() {
            Some("trace") => "trace",
            Some("debug") => "debug",
            Some("info") => "info",
            Some("warn") => "warn",
            Some("error") => "error",
            _ => "debug",
        };
        EnvFilter::new(format!("{level},hyper=info,reqwest=info"))
    };

    tracing_subscriber::fmt()
        .with_target(true)
        .with_file(true)
        .with_line_number(true)
        .with_span_events(span_events)
        .with_env_filter(env_filter)
        .with_ansi(use_color)
        .compact()
        .init();
}
