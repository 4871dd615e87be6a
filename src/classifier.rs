//! Threshold classifier with a cooldown gate.
//!
//! Each accelerometer sample is reduced to its magnitude in g and compared
//! against two thresholds. After any emission the classifier stays silent for
//! the cooldown window, even if the condition persists.

use chrono::{DateTime, TimeDelta, Utc};
use tracing::{debug, info};

use crate::models::{Classification, ClassificationKind, Sample, SensorKind};

// ---

/// Thresholds and cooldown, injectable for testing.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClassifierConfig {
    // ---
    pub fall_threshold_g: f64,
    pub near_fall_threshold_g: f64,
    pub cooldown: TimeDelta,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            fall_threshold_g: 2.5,
            near_fall_threshold_g: 1.8,
            cooldown: TimeDelta::seconds(5),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Classifier {
    // ---
    config: ClassifierConfig,
    last_trigger: Option<DateTime<Utc>>,
}

impl Classifier {
    // ---
    pub fn new(config: ClassifierConfig) -> Self {
        Self {
            config,
            last_trigger: None,
        }
    }

    pub fn config(&self) -> &ClassifierConfig {
        &self.config
    }

    /// Feed one sample. Returns a NearFall or Fall classification when a
    /// threshold is crossed outside the cooldown window, `None` otherwise.
    pub fn observe(&mut self, sample: &Sample) -> Option<Classification> {
        // ---
        if sample.kind != SensorKind::Accelerometer {
            return None;
        }

        let magnitude_g = sample.magnitude_g();
        if !magnitude_g.is_finite() {
            debug!(?sample.values, "Ignoring non-finite acceleration");
            return None;
        }

        let now = sample.timestamp;
        if self.in_cooldown(now) {
            return None;
        }

        let kind = if magnitude_g > self.config.fall_threshold_g {
            ClassificationKind::Fall
        } else if magnitude_g > self.config.near_fall_threshold_g {
            ClassificationKind::NearFall
        } else {
            return None;
        };

        self.last_trigger = Some(now);
        info!(?kind, magnitude_g, "Motion event classified");

        Some(Classification {
            kind,
            magnitude_g,
            timestamp: now,
        })
    }

    fn in_cooldown(&self, now: DateTime<Utc>) -> bool {
        // A timestamp earlier than the last trigger counts as inside the window.
        self.last_trigger
            .is_some_and(|last| now - last < self.config.cooldown)
    }
}

impl Default for Classifier {
    fn default() -> Self {
        Self::new(ClassifierConfig::default())
    }
}
