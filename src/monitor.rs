//! Wearable-side pipeline: samples and fixes in, envelopes out to peers.
//!
//! The host sensor and location APIs call [`MotionMonitor::on_sample`] and
//! [`MotionMonitor::on_location`]. Nothing on this path ever returns a relay
//! error to the caller; sampling keeps running regardless of peer health.

use std::collections::HashMap;

use chrono::TimeDelta;
use tracing::{debug, info, warn};

use crate::classifier::{Classifier, ClassifierConfig};
use crate::envelope::{validate_fix, EnvelopeBuilder, EventEnvelope, Payload};
use crate::models::{Classification, LocationFix, Sample, SensorKind, SensorSnapshot, Vec3};
use crate::peer::{PeerPath, PeerRelay};
use crate::rate_limit::{RateLimiter, StreamKey};

/// Log a debug line every this many samples of one kind.
const SAMPLE_LOG_EVERY: u64 = 20;

pub type ClassificationCallback = Box<dyn Fn(&Classification) + Send + Sync>;
pub type EnvelopeCallback = Box<dyn Fn(&EventEnvelope) + Send + Sync>;

// ---

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MonitorConfig {
    // ---
    pub classifier: ClassifierConfig,
    pub location_interval: TimeDelta,
    pub snapshot_interval: TimeDelta,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            classifier: ClassifierConfig::default(),
            location_interval: TimeDelta::seconds(10),
            snapshot_interval: TimeDelta::milliseconds(500),
        }
    }
}

pub struct MotionMonitor {
    // ---
    classifier: Classifier,
    limiter: RateLimiter,
    builder: EnvelopeBuilder,
    peers: PeerRelay,
    latest_accel: Vec3,
    latest_gyro: Vec3,
    last_location: Option<LocationFix>,
    sample_counts: HashMap<SensorKind, u64>,
    classification_subscribers: Vec<ClassificationCallback>,
    envelope_subscribers: Vec<EnvelopeCallback>,
}

impl MotionMonitor {
    // ---
    pub fn new(config: MonitorConfig, builder: EnvelopeBuilder, peers: PeerRelay) -> Self {
        let limiter = RateLimiter::new()
            .with_interval(StreamKey::Location, config.location_interval)
            .with_interval(StreamKey::SensorSnapshot, config.snapshot_interval);

        Self {
            classifier: Classifier::new(config.classifier),
            limiter,
            builder,
            peers,
            latest_accel: Vec3::default(),
            latest_gyro: Vec3::default(),
            last_location: None,
            sample_counts: HashMap::new(),
            classification_subscribers: Vec::new(),
            envelope_subscribers: Vec::new(),
        }
    }

    /// Called with every NearFall / Fall, before it is relayed.
    pub fn on_classification<F>(&mut self, callback: F)
    where
        F: Fn(&Classification) + Send + Sync + 'static,
    {
        self.classification_subscribers.push(Box::new(callback));
    }

    /// Called with every envelope this monitor builds, before it is sent.
    pub fn on_envelope_ready<F>(&mut self, callback: F)
    where
        F: Fn(&EventEnvelope) + Send + Sync + 'static,
    {
        self.envelope_subscribers.push(Box::new(callback));
    }

    pub fn last_location(&self) -> Option<&LocationFix> {
        self.last_location.as_ref()
    }

    /// Consume one sensor sample. Returns the classification it produced, if any.
    pub async fn on_sample(&mut self, sample: Sample) -> Option<Classification> {
        // ---
        self.count(&sample);

        match sample.kind {
            SensorKind::Accelerometer => self.latest_accel = sample.values,
            SensorKind::Gyroscope => {
                self.latest_gyro = sample.values;
                return None;
            }
            SensorKind::LinearAcceleration | SensorKind::Gravity => return None,
        }

        // Snapshots ride on the accelerometer cadence, independent of cooldown.
        if self
            .limiter
            .try_admit(StreamKey::SensorSnapshot, sample.timestamp)
        {
            let snapshot =
                SensorSnapshot::from_readings(self.latest_accel, self.latest_gyro, sample.timestamp);
            self.relay(PeerPath::Sensors, Payload::Sensors(snapshot))
                .await;
        }

        let classification = self.classifier.observe(&sample)?;
        for callback in &self.classification_subscribers {
            callback(&classification);
        }

        match Payload::from_classification(&classification, self.last_location.as_ref()) {
            Ok(payload) => self.relay(PeerPath::FallEvent, payload).await,
            Err(e) => warn!(error = %e, "Classification not relayed"),
        }

        Some(classification)
    }

    /// Consume one location fix. It becomes the location attached to fall
    /// events, and is forwarded to peers at most once per location interval.
    /// Invalid fixes are ignored and the previous fix is kept.
    pub async fn on_location(&mut self, fix: LocationFix) {
        // ---
        debug!(lat = fix.latitude, lng = fix.longitude, provider = %fix.provider, "Location fix");
        if let Err(e) = validate_fix(&fix) {
            warn!(error = %e, "Ignoring location fix");
            return;
        }
        self.last_location = Some(fix.clone());

        if self.limiter.try_admit(StreamKey::Location, fix.timestamp) {
            self.relay(PeerPath::Location, Payload::Location(fix)).await;
        }
    }

    async fn relay(&self, path: PeerPath, payload: Payload) {
        // ---
        let envelope = match self.builder.build(&payload) {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!(%path, error = %e, "Dropping payload");
                return;
            }
        };

        for callback in &self.envelope_subscribers {
            callback(&envelope);
        }

        let bytes = match envelope.to_bytes() {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(%path, error = %e, "Dropping envelope");
                return;
            }
        };

        let deliveries = self.peers.send_to_all_peers(path, &bytes).await;
        let delivered = deliveries.iter().filter(|d| d.result.is_ok()).count();
        if path == PeerPath::FallEvent {
            info!(event_id = %envelope.event_id, delivered, peers = deliveries.len(),
                "Fall event relayed");
        } else {
            debug!(%path, delivered, peers = deliveries.len(), "Telemetry relayed");
        }
    }

    fn count(&mut self, sample: &Sample) {
        let n = self.sample_counts.entry(sample.kind).or_insert(0);
        *n += 1;
        if *n % SAMPLE_LOG_EVERY == 0 {
            debug!(kind = ?sample.kind, n = *n, values = ?sample.values, "Sensor samples");
        }
    }
}
