//! Data models shared by the wearable and companion sides of the relay.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Standard gravity in m/s², used to express acceleration in g.
pub const STANDARD_GRAVITY: f64 = 9.81;

// ---

/// Hardware sensor that produced a [`Sample`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SensorKind {
    Accelerometer,
    LinearAcceleration,
    Gyroscope,
    Gravity,
}

/// Plain 3-axis vector.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Vec3 {
    // ---
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Vec3 {
    // ---
    pub const fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    /// Euclidean norm of the vector.
    pub fn norm(&self) -> f64 {
        (self.x * self.x + self.y * self.y + self.z * self.z).sqrt()
    }

    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite() && self.z.is_finite()
    }
}

/// One reading delivered by the host sensor API. Never persisted.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sample {
    // ---
    pub kind: SensorKind,
    pub timestamp: DateTime<Utc>,
    /// Axis values in m/s² (rad/s for the gyroscope).
    pub values: Vec3,
}

impl Sample {
    // ---
    pub fn new(kind: SensorKind, timestamp: DateTime<Utc>, values: Vec3) -> Self {
        Self {
            kind,
            timestamp,
            values,
        }
    }

    /// Vector norm divided by standard gravity.
    pub fn magnitude_g(&self) -> f64 {
        self.values.norm() / STANDARD_GRAVITY
    }
}

// ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ClassificationKind {
    None,
    NearFall,
    Fall,
}

/// Decision emitted by the classifier. Immutable once emitted.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Classification {
    // ---
    pub kind: ClassificationKind,
    pub magnitude_g: f64,
    pub timestamp: DateTime<Utc>,
}

/// A position fix from the host location API. Latest value wins.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocationFix {
    // ---
    pub latitude: f64,
    pub longitude: f64,
    /// Horizontal accuracy in meters.
    pub accuracy: f64,
    pub provider: String,
    pub timestamp: DateTime<Utc>,
}

/// Latest known accelerometer and gyroscope readings, combined.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SensorSnapshot {
    // ---
    pub accel: Vec3,
    pub gyro: Vec3,
    pub magnitude_g: f64,
    pub gyro_magnitude: f64,
    pub timestamp: DateTime<Utc>,
}

impl SensorSnapshot {
    // ---
    /// Derives both magnitudes from the raw triples.
    pub fn from_readings(accel: Vec3, gyro: Vec3, timestamp: DateTime<Utc>) -> Self {
        Self {
            accel,
            gyro,
            magnitude_g: accel.norm() / STANDARD_GRAVITY,
            gyro_magnitude: gyro.norm(),
            timestamp,
        }
    }
}

/// Where a fall happened, as far as the wearable knew at the time.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FallLocation {
    // ---
    pub lat: f64,
    pub lng: f64,
    pub accuracy: f64,
}

impl From<&LocationFix> for FallLocation {
    fn from(fix: &LocationFix) -> Self {
        Self {
            lat: fix.latitude,
            lng: fix.longitude,
            accuracy: fix.accuracy,
        }
    }
}

/// Payload of a fall event: which kind of fall, and where.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FallReport {
    // ---
    pub near_fall: bool,
    pub location: Option<FallLocation>,
}

impl FallReport {
    // ---
    /// Confidence attached to the event downstream.
    pub fn confidence(&self) -> f64 {
        if self.near_fall {
            0.6
        } else {
            0.9
        }
    }
}
