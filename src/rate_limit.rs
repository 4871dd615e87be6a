//! Per-stream minimum-interval gate.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Mutex;

use chrono::{DateTime, TimeDelta, Utc};

// ---

/// Telemetry streams the wearable rate-limits before sending to peers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StreamKey {
    Location,
    SensorSnapshot,
}

/// Admits at most one event per stream per configured interval.
///
/// The check and the update happen under one lock, so two producers racing on
/// the same stream cannot both pass.
#[derive(Debug)]
pub struct RateLimiter<K = StreamKey> {
    // ---
    intervals: HashMap<K, TimeDelta>,
    last_admitted: Mutex<HashMap<K, DateTime<Utc>>>,
}

impl<K> RateLimiter<K>
where
    K: Copy + Eq + Hash,
{
    // ---
    pub fn new() -> Self {
        Self {
            intervals: HashMap::new(),
            last_admitted: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_interval(mut self, key: K, min_interval: TimeDelta) -> Self {
        self.intervals.insert(key, min_interval);
        self
    }

    pub fn min_interval(&self, key: K) -> Option<TimeDelta> {
        self.intervals.get(&key).copied()
    }

    /// Returns true and records `now` iff the stream's interval has elapsed
    /// since its last admission. Unconfigured streams are always admitted.
    pub fn try_admit(&self, key: K, now: DateTime<Utc>) -> bool {
        // ---
        let min_interval = self.min_interval(key).unwrap_or(TimeDelta::zero());

        // A poisoned lock only means another producer panicked mid-update;
        // the timestamps themselves are still usable.
        let mut last = match self.last_admitted.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };

        match last.get(&key) {
            Some(prev) if now - *prev < min_interval => false,
            _ => {
                last.insert(key, now);
                true
            }
        }
    }
}

impl<K> Default for RateLimiter<K>
where
    K: Copy + Eq + Hash,
{
    fn default() -> Self {
        Self::new()
    }
}
