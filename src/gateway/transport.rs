//! Underlying connection to the event-ingestion gateway.
//!
//! The link never assumes `start` means connected: readiness is only ever
//! learned through [`GatewayTransport::is_ready`], which the link polls.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{anyhow, bail, Context};
use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use reqwest::Client;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

// ---

/// Where the gateway lives and how the transport should reach it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GatewayTarget {
    // ---
    pub host: String,
    pub port: u16,
    /// Keep retrying the connection in the background after `start`.
    pub auto_connect: bool,
}

impl GatewayTarget {
    pub fn base_url(&self) -> String {
        format!("http://{}:{}", self.host, self.port)
    }
}

#[async_trait]
pub trait GatewayTransport: Send + Sync {
    /// Configure the connection and kick it off. Must not wait for readiness.
    async fn start(&self, target: &GatewayTarget) -> anyhow::Result<()>;

    /// Whether the connection is currently usable.
    async fn is_ready(&self) -> bool;

    async fn publish(&self, body: &[u8]) -> anyhow::Result<()>;

    /// Tear down the current connection. Safe to call when not started.
    async fn stop(&self);
}

// ---

/// HTTP gateway: readiness is a successful `GET /health`, events are
/// `POST /events` with the envelope JSON as body.
pub struct HttpGatewayTransport {
    // ---
    client: Client,
    probe_interval: Duration,
    ready: Arc<AtomicBool>,
    base_url: Mutex<Option<String>>,
    probe: Mutex<Option<JoinHandle<()>>>,
}

impl HttpGatewayTransport {
    // ---
    pub fn new(request_timeout: Duration) -> anyhow::Result<Self> {
        let client = Client::builder()
            .timeout(request_timeout)
            .build()
            .context("Failed to build gateway HTTP client")?;

        Ok(Self {
            client,
            probe_interval: Duration::from_secs(1),
            ready: Arc::new(AtomicBool::new(false)),
            base_url: Mutex::new(None),
            probe: Mutex::new(None),
        })
    }

    /// How often the background probe checks `GET /health`.
    pub fn with_probe_interval(mut self, interval: Duration) -> Self {
        self.probe_interval = interval;
        self
    }

    fn abort_probe(&self) {
        if let Some(handle) = self.probe.lock().ok().and_then(|mut p| p.take()) {
            handle.abort();
        }
    }

    fn current_base_url(&self) -> anyhow::Result<String> {
        self.base_url
            .lock()
            .map_err(|_| anyhow!("gateway transport state poisoned"))?
            .clone()
            .ok_or_else(|| anyhow!("gateway transport not started"))
    }
}

#[async_trait]
impl GatewayTransport for HttpGatewayTransport {
    async fn start(&self, target: &GatewayTarget) -> anyhow::Result<()> {
        // ---
        let base_url = target.base_url();
        reqwest::Url::parse(&base_url)
            .with_context(|| format!("Invalid gateway address {base_url}"))?;

        self.abort_probe();
        self.ready.store(false, Ordering::Release);
        *self
            .base_url
            .lock()
            .map_err(|_| anyhow!("gateway transport state poisoned"))? = Some(base_url.clone());

        let client = self.client.clone();
        let ready = Arc::clone(&self.ready);
        let health_url = format!("{base_url}/health");
        let retry = target.auto_connect;
        let interval = self.probe_interval;

        // Probes until first reachable (once only without auto-connect), then
        // keeps re-checking so `is_ready` follows the gateway.
        let handle = tokio::spawn(async move {
            let mut reachable = false;
            let mut monitoring = false;
            loop {
                let healthy = match client.get(&health_url).send().await {
                    Ok(resp) if resp.status().is_success() => true,
                    Ok(resp) => {
                        debug!(url = %health_url, status = %resp.status(), "Gateway not healthy");
                        false
                    }
                    Err(e) => {
                        debug!(url = %health_url, error = %e, "Gateway probe failed");
                        false
                    }
                };
                ready.store(healthy, Ordering::Release);

                match (reachable, healthy) {
                    (false, true) => info!(url = %health_url, "Gateway reachable"),
                    (true, false) => warn!(url = %health_url, "Gateway no longer reachable"),
                    _ => {}
                }
                reachable = healthy;

                if !healthy && !retry && !monitoring {
                    return;
                }
                monitoring |= healthy;
                tokio::time::sleep(interval).await;
            }
        });

        if let Ok(mut probe) = self.probe.lock() {
            *probe = Some(handle);
        }
        Ok(())
    }

    async fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }

    async fn publish(&self, body: &[u8]) -> anyhow::Result<()> {
        // ---
        let url = format!("{}/events", self.current_base_url()?);

        let result = self
            .client
            .post(&url)
            .header(CONTENT_TYPE, "application/json")
            .body(body.to_vec())
            .send()
            .await
            .and_then(|resp| resp.error_for_status());

        match result {
            Ok(_) => Ok(()),
            Err(e) => {
                self.ready.store(false, Ordering::Release);
                warn!(%url, error = %e, "Gateway rejected publish");
                bail!("POST {url} failed: {e}")
            }
        }
    }

    async fn stop(&self) {
        self.abort_probe();
        self.ready.store(false, Ordering::Release);
    }
}
