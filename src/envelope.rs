//! Versioned event envelope and its builder.
//!
//! Every piece of telemetry leaves the device as an [`EventEnvelope`]: a
//! self-describing JSON document carrying a schema version, a fresh event id,
//! a fixed severity for its event type, and a type-specific `data` object.
//!
//! ```text
//! {
//!   "schemaVersion": 1,
//!   "eventId": "<uuid>",
//!   "eventType": "FALL_DETECTED" | "LOCATION_UPDATE" | "SENSOR_SNAPSHOT",
//!   "severity": "LOW" | "MODERATE" | "HIGH" | "INFO",
//!   "timestamp": "<ISO-8601>",
//!   "source": { "platform": "...", "deviceType": "watch" | "phone" },
//!   "deviceId": "...",
//!   "data": { ... },
//!   "app": "...", "appTopic": "<app>.fall_event", "origin": "watch"   (optional)
//! }
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;
use uuid::Uuid;

use crate::error::{RelayError, Result};
use crate::models::{
    Classification, ClassificationKind, FallLocation, FallReport, LocationFix, SensorSnapshot,
    Vec3,
};

/// Wire schema version stamped on every envelope.
pub const SCHEMA_VERSION: u32 = 1;

// ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventType {
    FallDetected,
    LocationUpdate,
    SensorSnapshot,
}

impl EventType {
    /// Suffix of the per-type application topic, e.g. `<app>.fall_event`.
    pub const fn topic_suffix(&self) -> &'static str {
        match self {
            Self::FallDetected => "fall_event",
            Self::LocationUpdate => "location_update",
            Self::SensorSnapshot => "sensor_snapshot",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Severity {
    Low,
    Moderate,
    High,
    Info,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceType {
    Watch,
    Phone,
}

impl DeviceType {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Watch => "watch",
            Self::Phone => "phone",
        }
    }
}

impl std::str::FromStr for DeviceType {
    type Err = RelayError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "watch" => Ok(Self::Watch),
            "phone" => Ok(Self::Phone),
            other => Err(RelayError::validation(format!("unknown device type '{other}'"))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Source {
    // ---
    pub platform: String,
    pub device_type: DeviceType,
}

// ---

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FallData {
    // ---
    pub fall_detected: bool,
    pub near_fall: bool,
    pub confidence: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<FallLocation>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocationPoint {
    // ---
    pub lat: f64,
    pub lng: f64,
    pub accuracy: f64,
    pub provider: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocationData {
    pub location: LocationPoint,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SensorReadings {
    // ---
    pub accel_x: f64,
    pub accel_y: f64,
    pub accel_z: f64,
    pub magnitude_g: f64,
    pub gyro_x: f64,
    pub gyro_y: f64,
    pub gyro_z: f64,
    pub gyro_total: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensorData {
    pub sensors: SensorReadings,
}

/// Type-specific body of an envelope. Variants have disjoint required keys,
/// so the untagged representation decodes unambiguously.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EnvelopeData {
    Fall(FallData),
    Location(LocationData),
    Sensors(SensorData),
}

impl EnvelopeData {
    // ---
    fn event_type(&self) -> EventType {
        match self {
            Self::Fall(_) => EventType::FallDetected,
            Self::Location(_) => EventType::LocationUpdate,
            Self::Sensors(_) => EventType::SensorSnapshot,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventEnvelope {
    // ---
    pub schema_version: u32,
    pub event_id: Uuid,
    pub event_type: EventType,
    pub severity: Severity,
    pub timestamp: DateTime<Utc>,
    pub source: Source,
    pub device_id: String,
    pub data: EnvelopeData,

    /// Application name and routing topic, for gateways that filter on them.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub app: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub app_topic: Option<String>,

    /// Kind of device that first produced the event, kept across re-stamping.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub origin: Option<String>,
}

impl EventEnvelope {
    // ---
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(self)
            .map_err(|e| RelayError::validation(format!("envelope not serializable: {e}")))
    }

    /// Decode an envelope received off the wire.
    ///
    /// Rejects unknown schema versions and envelopes whose `eventType` does
    /// not match the shape of `data`.
    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        // ---
        let envelope: Self = serde_json::from_slice(bytes)
            .map_err(|e| RelayError::validation(format!("malformed envelope: {e}")))?;

        if envelope.schema_version != SCHEMA_VERSION {
            return Err(RelayError::validation(format!(
                "unsupported schema version {}",
                envelope.schema_version
            )));
        }

        if envelope.data.event_type() != envelope.event_type {
            return Err(RelayError::validation(format!(
                "eventType {:?} does not match data shape {:?}",
                envelope.event_type,
                envelope.data.event_type()
            )));
        }

        Ok(envelope)
    }

    /// Recover the typed payload, e.g. to re-normalize it on another device.
    /// Location and sensor payloads take the envelope timestamp.
    pub fn payload(&self) -> Payload {
        // ---
        match &self.data {
            EnvelopeData::Fall(fall) => Payload::Fall(FallReport {
                near_fall: fall.near_fall,
                location: fall.location,
            }),
            EnvelopeData::Location(LocationData { location }) => Payload::Location(LocationFix {
                latitude: location.lat,
                longitude: location.lng,
                accuracy: location.accuracy,
                provider: location.provider.clone(),
                timestamp: self.timestamp,
            }),
            EnvelopeData::Sensors(SensorData { sensors: s }) => {
                Payload::Sensors(SensorSnapshot {
                    accel: Vec3::new(s.accel_x, s.accel_y, s.accel_z),
                    gyro: Vec3::new(s.gyro_x, s.gyro_y, s.gyro_z),
                    magnitude_g: s.magnitude_g,
                    gyro_magnitude: s.gyro_total,
                    timestamp: self.timestamp,
                })
            }
        }
    }
}

// ---

/// Input to [`EnvelopeBuilder::build`]. The variant decides the event type.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    Fall(FallReport),
    Location(LocationFix),
    Sensors(SensorSnapshot),
}

impl Payload {
    // ---
    /// Fall payload for a classification, tagged with the last known location.
    ///
    /// A location that would not pass validation is left out; the fall itself
    /// is always reported.
    pub fn from_classification(
        classification: &Classification,
        last_location: Option<&LocationFix>,
    ) -> Result<Self> {
        let near_fall = match classification.kind {
            ClassificationKind::Fall => false,
            ClassificationKind::NearFall => true,
            ClassificationKind::None => {
                return Err(RelayError::validation("no fall event for a NONE classification"))
            }
        };

        let location = last_location.and_then(|fix| match validate_fix(fix) {
            Ok(()) => Some(FallLocation::from(fix)),
            Err(e) => {
                warn!(error = %e, "Fall reported without location");
                None
            }
        });

        Ok(Self::Fall(FallReport {
            near_fall,
            location,
        }))
    }

    pub fn event_type(&self) -> EventType {
        match self {
            Self::Fall(_) => EventType::FallDetected,
            Self::Location(_) => EventType::LocationUpdate,
            Self::Sensors(_) => EventType::SensorSnapshot,
        }
    }

    /// Fixed severity table.
    pub fn severity(&self) -> Severity {
        match self {
            Self::Fall(report) if report.near_fall => Severity::Moderate,
            Self::Fall(_) => Severity::High,
            Self::Location(_) => Severity::Low,
            Self::Sensors(_) => Severity::Info,
        }
    }

    /// Reject payloads that would produce a partial or nonsensical envelope.
    pub fn validate(&self) -> Result<()> {
        // ---
        match self {
            Self::Fall(report) => match &report.location {
                Some(loc) => validate_position(loc.lat, loc.lng, loc.accuracy),
                None => Ok(()),
            },
            Self::Location(fix) => validate_fix(fix),
            Self::Sensors(snap) => {
                let finite = snap.accel.is_finite()
                    && snap.gyro.is_finite()
                    && snap.magnitude_g.is_finite()
                    && snap.gyro_magnitude.is_finite();
                if !finite {
                    return Err(RelayError::validation("sensor snapshot has non-finite values"));
                }
                Ok(())
            }
        }
    }

    fn to_data(&self) -> EnvelopeData {
        // ---
        match self {
            Self::Fall(report) => EnvelopeData::Fall(FallData {
                fall_detected: !report.near_fall,
                near_fall: report.near_fall,
                confidence: report.confidence(),
                location: report.location,
            }),
            Self::Location(fix) => EnvelopeData::Location(LocationData {
                location: LocationPoint {
                    lat: fix.latitude,
                    lng: fix.longitude,
                    accuracy: fix.accuracy,
                    provider: fix.provider.clone(),
                },
            }),
            Self::Sensors(snap) => EnvelopeData::Sensors(SensorData {
                sensors: SensorReadings {
                    accel_x: snap.accel.x,
                    accel_y: snap.accel.y,
                    accel_z: snap.accel.z,
                    magnitude_g: snap.magnitude_g,
                    gyro_x: snap.gyro.x,
                    gyro_y: snap.gyro.y,
                    gyro_z: snap.gyro.z,
                    gyro_total: snap.gyro_magnitude,
                },
            }),
        }
    }
}

/// Check a location fix before it is stored or sent.
pub fn validate_fix(fix: &LocationFix) -> Result<()> {
    // ---
    validate_position(fix.latitude, fix.longitude, fix.accuracy)?;
    if fix.provider.trim().is_empty() {
        return Err(RelayError::validation("location provider is missing"));
    }
    Ok(())
}

fn validate_position(lat: f64, lng: f64, accuracy: f64) -> Result<()> {
    // ---
    if !lat.is_finite() || !(-90.0..=90.0).contains(&lat) {
        return Err(RelayError::validation(format!("latitude out of range: {lat}")));
    }
    if !lng.is_finite() || !(-180.0..=180.0).contains(&lng) {
        return Err(RelayError::validation(format!("longitude out of range: {lng}")));
    }
    if !accuracy.is_finite() || accuracy < 0.0 {
        return Err(RelayError::validation(format!("invalid accuracy: {accuracy}")));
    }
    Ok(())
}

// ---

/// Stamps payloads into envelopes on behalf of one device.
#[derive(Debug, Clone)]
pub struct EnvelopeBuilder {
    // ---
    source: Source,
    device_id: String,
    app: Option<String>,
}

impl EnvelopeBuilder {
    // ---
    pub fn new(source: Source, device_id: impl Into<String>) -> Self {
        Self {
            source,
            device_id: device_id.into(),
            app: None,
        }
    }

    /// Stamp `app` and a per-type `appTopic` on every envelope built.
    pub fn with_app(mut self, app: impl Into<String>) -> Self {
        self.app = Some(app.into());
        self
    }

    pub fn source(&self) -> &Source {
        &self.source
    }

    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    pub fn app(&self) -> Option<&str> {
        self.app.as_deref()
    }

    /// Build a fresh envelope. Each call gets a new event id and timestamp;
    /// type, severity and data are a pure function of the payload.
    pub fn build(&self, payload: &Payload) -> Result<EventEnvelope> {
        // ---
        payload.validate()?;

        Ok(EventEnvelope {
            schema_version: SCHEMA_VERSION,
            event_id: Uuid::new_v4(),
            event_type: payload.event_type(),
            severity: payload.severity(),
            timestamp: Utc::now(),
            source: self.source.clone(),
            device_id: self.device_id.clone(),
            data: payload.to_data(),
            app: self.app.clone(),
            app_topic: self
                .app
                .as_ref()
                .map(|app| format!("{app}.{}", payload.event_type().topic_suffix())),
            origin: None,
        })
    }
}
