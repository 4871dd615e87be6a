//! Fall classification and a resilient telemetry relay.
//!
//! The wearable side runs a [`MotionMonitor`]: sensor samples are classified
//! against fall thresholds, and fall events plus rate-limited location and
//! sensor telemetry are sent to every connected peer as [`EventEnvelope`]s.
//!
//! The companion side runs a [`CompanionRelay`] in front of a [`GatewayLink`]:
//! fall events go to the gateway at once, telemetry is buffered
//! latest-value-wins and flushed on a timer. The link owns the connection
//! lifecycle, readiness polling and exponential reconnect backoff.

pub mod classifier;
pub mod companion;
pub mod config;
pub mod envelope;
pub mod error;
pub mod gateway;
pub mod models;
pub mod monitor;
pub mod peer;
pub mod rate_limit;
pub mod routes;

pub use classifier::{Classifier, ClassifierConfig};
pub use companion::CompanionRelay;
pub use config::Config;
pub use envelope::{EnvelopeBuilder, EventEnvelope, EventType, Payload, Severity, Source};
pub use error::{RelayError, Result};
pub use gateway::{GatewayLink, GatewayTarget, GatewayTransport, LinkConfig, LinkState, LinkStatus};
pub use models::{Classification, ClassificationKind, LocationFix, Sample, SensorKind, SensorSnapshot};
pub use monitor::{MonitorConfig, MotionMonitor};
pub use peer::{PeerPath, PeerRelay, PeerTransport};
pub use rate_limit::{RateLimiter, StreamKey};
