//! Configuration loader for the `fallwatch-relay` companion daemon.
//!
//! This module centralizes all runtime configuration values and their defaults,
//! loading from environment variables (with optional `.env` file support
//! provided by the caller). Nothing else in the crate reads the environment.
//!
use std::env;
use std::time::Duration;

use anyhow::{anyhow, bail, Result};
use chrono::TimeDelta;

use crate::classifier::ClassifierConfig;
use crate::envelope::{DeviceType, EnvelopeBuilder, Source};
use crate::gateway::{GatewayTarget, LinkConfig};
use crate::monitor::MonitorConfig;

/// Parse an optional variable with a default value.
macro_rules! parse_var {
    ($lookup:expr, $var_name:expr, $ty:ty, $default:expr) => {
        $lookup($var_name)
            .map(|v| v.trim().parse::<$ty>())
            .transpose()
            .map_err(|e| anyhow!("Invalid {}: {}", $var_name, e))?
            .unwrap_or($default)
    };
}

/// Parse a required string variable.
macro_rules! require_var {
    ($lookup:expr, $var_name:expr) => {
        $lookup($var_name)
            .filter(|v| !v.trim().is_empty())
            .ok_or_else(|| anyhow!("{} must be set in .env or environment", $var_name))?
    };
}

/// Strongly typed application configuration.
///
/// All fields are immutable after loading, ensuring a consistent configuration
/// snapshot for the lifetime of the application.
#[derive(Debug, Clone)]
pub struct Config {
    // ---
    /// Gateway host name or address.
    pub gateway_host: String,
    pub gateway_port: u16,

    /// Keep retrying the gateway connection in the background.
    pub gateway_auto_connect: bool,

    /// Per-request timeout for gateway HTTP calls, in milliseconds.
    pub gateway_timeout_ms: u64,

    /// Port the peer-ingress HTTP server binds to.
    pub listen_port: u16,

    pub flush_interval_ms: u64,
    pub ready_poll_interval_ms: u64,
    pub ready_poll_attempts: u32,

    /// Identity stamped on envelopes built by this process.
    pub device_id: String,
    /// `app` on every envelope; also the prefix of its `appTopic`.
    pub app_name: String,
    pub source_platform: String,
    pub source_device_type: DeviceType,

    pub fall_threshold_g: f64,
    pub near_fall_threshold_g: f64,
    pub cooldown_ms: i64,
    pub location_interval_ms: i64,
    pub snapshot_interval_ms: i64,
}

/// Load configuration from environment variables with defaults.
///
/// Required:
/// - `GATEWAY_HOST` – gateway host name or address
///
/// Optional:
/// - `GATEWAY_PORT` (6200), `GATEWAY_AUTO_CONNECT` (true), `GATEWAY_TIMEOUT_MS` (5000)
/// - `LISTEN_PORT` (8080)
/// - `FLUSH_INTERVAL_MS` (5000), `READY_POLL_INTERVAL_MS` (500), `READY_POLL_ATTEMPTS` (20)
/// - `DEVICE_ID` (watch-local), `SOURCE_PLATFORM` (wearos), `SOURCE_DEVICE_TYPE` (watch)
/// - `APP_NAME` (fallwatch)
/// - `FALL_THRESHOLD_G` (2.5), `NEAR_FALL_THRESHOLD_G` (1.8), `COOLDOWN_MS` (5000)
/// - `LOCATION_INTERVAL_MS` (10000), `SNAPSHOT_INTERVAL_MS` (500)
///
/// Returns an error if any required variable is missing or invalid.
pub fn load_from_env() -> Result<Config> {
    load_with(|name| env::var(name).ok())
}

/// Load configuration through an arbitrary variable lookup.
pub fn load_with<F>(lookup: F) -> Result<Config>
where
    F: Fn(&str) -> Option<String>,
{
    // ---
    let gateway_host = require_var!(lookup, "GATEWAY_HOST");

    let config = Config {
        gateway_host,
        gateway_port: parse_var!(lookup, "GATEWAY_PORT", u16, 6200),
        gateway_auto_connect: parse_var!(lookup, "GATEWAY_AUTO_CONNECT", bool, true),
        gateway_timeout_ms: parse_var!(lookup, "GATEWAY_TIMEOUT_MS", u64, 5000),
        listen_port: parse_var!(lookup, "LISTEN_PORT", u16, 8080),
        flush_interval_ms: parse_var!(lookup, "FLUSH_INTERVAL_MS", u64, 5000),
        ready_poll_interval_ms: parse_var!(lookup, "READY_POLL_INTERVAL_MS", u64, 500),
        ready_poll_attempts: parse_var!(lookup, "READY_POLL_ATTEMPTS", u32, 20),
        device_id: lookup("DEVICE_ID").unwrap_or_else(|| "watch-local".to_string()),
        app_name: lookup("APP_NAME").unwrap_or_else(|| "fallwatch".to_string()),
        source_platform: lookup("SOURCE_PLATFORM").unwrap_or_else(|| "wearos".to_string()),
        source_device_type: parse_var!(lookup, "SOURCE_DEVICE_TYPE", DeviceType, DeviceType::Watch),
        fall_threshold_g: parse_var!(lookup, "FALL_THRESHOLD_G", f64, 2.5),
        near_fall_threshold_g: parse_var!(lookup, "NEAR_FALL_THRESHOLD_G", f64, 1.8),
        cooldown_ms: parse_var!(lookup, "COOLDOWN_MS", i64, 5000),
        location_interval_ms: parse_var!(lookup, "LOCATION_INTERVAL_MS", i64, 10_000),
        snapshot_interval_ms: parse_var!(lookup, "SNAPSHOT_INTERVAL_MS", i64, 500),
    };

    config.validate()?;
    Ok(config)
}

impl Config {
    // ---
    fn validate(&self) -> Result<()> {
        // ---
        if !(self.near_fall_threshold_g > 0.0 && self.near_fall_threshold_g < self.fall_threshold_g)
        {
            bail!(
                "NEAR_FALL_THRESHOLD_G ({}) must be positive and below FALL_THRESHOLD_G ({})",
                self.near_fall_threshold_g,
                self.fall_threshold_g
            );
        }
        if self.ready_poll_attempts == 0 {
            bail!("READY_POLL_ATTEMPTS must be at least 1");
        }
        if self.flush_interval_ms == 0 || self.ready_poll_interval_ms == 0 {
            bail!("FLUSH_INTERVAL_MS and READY_POLL_INTERVAL_MS must be non-zero");
        }
        if self.cooldown_ms < 0 || self.location_interval_ms < 0 || self.snapshot_interval_ms < 0 {
            bail!("COOLDOWN_MS and the stream intervals must not be negative");
        }
        Ok(())
    }

    pub fn link_config(&self) -> LinkConfig {
        // ---
        let target = GatewayTarget {
            host: self.gateway_host.clone(),
            port: self.gateway_port,
            auto_connect: self.gateway_auto_connect,
        };
        LinkConfig {
            target,
            flush_interval: Duration::from_millis(self.flush_interval_ms),
            ready_poll_interval: Duration::from_millis(self.ready_poll_interval_ms),
            ready_poll_attempts: self.ready_poll_attempts,
        }
    }

    pub fn envelope_builder(&self) -> EnvelopeBuilder {
        let source = Source {
            platform: self.source_platform.clone(),
            device_type: self.source_device_type,
        };
        EnvelopeBuilder::new(source, self.device_id.clone()).with_app(self.app_name.clone())
    }

    pub fn monitor_config(&self) -> MonitorConfig {
        MonitorConfig {
            classifier: ClassifierConfig {
                fall_threshold_g: self.fall_threshold_g,
                near_fall_threshold_g: self.near_fall_threshold_g,
                cooldown: TimeDelta::milliseconds(self.cooldown_ms),
            },
            location_interval: TimeDelta::milliseconds(self.location_interval_ms),
            snapshot_interval: TimeDelta::milliseconds(self.snapshot_interval_ms),
        }
    }

    pub fn gateway_timeout(&self) -> Duration {
        Duration::from_millis(self.gateway_timeout_ms)
    }

    /// Log the loaded configuration for debugging purposes.
    pub fn log_config(&self) {
        // ---
        tracing::info!("Configuration loaded:");
        tracing::info!("  GATEWAY_HOST          : {}", self.gateway_host);
        tracing::info!("  GATEWAY_PORT          : {}", self.gateway_port);
        tracing::info!("  GATEWAY_AUTO_CONNECT  : {}", self.gateway_auto_connect);
        tracing::info!("  GATEWAY_TIMEOUT_MS    : {}", self.gateway_timeout_ms);
        tracing::info!("  LISTEN_PORT           : {}", self.listen_port);
        tracing::info!("  FLUSH_INTERVAL_MS     : {}", self.flush_interval_ms);
        tracing::info!("  READY_POLL_INTERVAL_MS: {}", self.ready_poll_interval_ms);
        tracing::info!("  READY_POLL_ATTEMPTS   : {}", self.ready_poll_attempts);
        tracing::info!("  DEVICE_ID             : {}", self.device_id);
        tracing::info!("  APP_NAME              : {}", self.app_name);
        tracing::info!("  SOURCE                : {}/{:?}", self.source_platform, self.source_device_type);
        tracing::info!("  FALL_THRESHOLD_G      : {}", self.fall_threshold_g);
        tracing::info!("  NEAR_FALL_THRESHOLD_G : {}", self.near_fall_threshold_g);
        tracing::info!("  COOLDOWN_MS           : {}", self.cooldown_ms);
        tracing::info!("  LOCATION_INTERVAL_MS  : {}", self.location_interval_ms);
        tracing::info!("  SNAPSHOT_INTERVAL_MS  : {}", self.snapshot_interval_ms);
    }
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;
    use std::collections::HashMap;

    fn load(vars: &[(&str, &str)]) -> Result<Config> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        load_with(|name| map.get(name).cloned())
    }

    #[test]
    fn test_defaults() {
        // ---
        let cfg = load(&[("GATEWAY_HOST", "10.0.2.2")]).unwrap();

        let link = cfg.link_config();
        assert_eq!(link.target.base_url(), "http://10.0.2.2:6200");
        assert!(link.target.auto_connect);
        assert_eq!(link.flush_interval, Duration::from_secs(5));
        assert_eq!(link.ready_poll_interval, Duration::from_millis(500));
        assert_eq!(link.ready_poll_attempts, 20);
        assert_eq!(cfg.listen_port, 8080);
        assert_eq!(cfg.gateway_timeout(), Duration::from_secs(5));

        let builder = cfg.envelope_builder();
        assert_eq!(builder.device_id(), "watch-local");
        assert_eq!(builder.source().platform, "wearos");
        assert_eq!(builder.source().device_type, DeviceType::Watch);
        assert_eq!(builder.app(), Some("fallwatch"));

        assert_eq!(cfg.monitor_config(), MonitorConfig::default());
    }

    #[test]
    fn test_overrides() {
        // ---
        let cfg = load(&[
            ("GATEWAY_HOST", "gw.local"),
            ("GATEWAY_PORT", "7000"),
            ("GATEWAY_AUTO_CONNECT", "false"),
            ("SOURCE_DEVICE_TYPE", "phone"),
            ("DEVICE_ID", "pixel-7"),
            ("FALL_THRESHOLD_G", "3.0"),
            ("NEAR_FALL_THRESHOLD_G", "2.0"),
            ("COOLDOWN_MS", "1000"),
        ])
        .unwrap();

        assert_eq!(cfg.link_config().target.base_url(), "http://gw.local:7000");
        assert!(!cfg.link_config().target.auto_connect);
        assert_eq!(cfg.envelope_builder().source().device_type, DeviceType::Phone);
        assert_eq!(cfg.envelope_builder().device_id(), "pixel-7");

        let monitor = cfg.monitor_config();
        assert_eq!(monitor.classifier.fall_threshold_g, 3.0);
        assert_eq!(monitor.classifier.cooldown, TimeDelta::seconds(1));
    }

    #[test]
    fn test_missing_host_rejected() {
        // ---
        let err = load(&[]).unwrap_err();
        assert!(err.to_string().contains("GATEWAY_HOST"));
        assert!(load(&[("GATEWAY_HOST", "  ")]).is_err());
    }

    #[test]
    fn test_invalid_values_rejected() {
        // ---
        let err = load(&[("GATEWAY_HOST", "gw"), ("GATEWAY_PORT", "http")]).unwrap_err();
        assert!(err.to_string().contains("GATEWAY_PORT"));

        assert!(load(&[("GATEWAY_HOST", "gw"), ("SOURCE_DEVICE_TYPE", "tablet")]).is_err());
        assert!(load(&[("GATEWAY_HOST", "gw"), ("NEAR_FALL_THRESHOLD_G", "2.5")]).is_err());
        assert!(load(&[("GATEWAY_HOST", "gw"), ("READY_POLL_ATTEMPTS", "0")]).is_err());
    }
}
