//! Link state, backoff ladder and the actor-owned relay state.

use std::time::Duration;

use serde::Serialize;

use crate::models::{LocationFix, SensorSnapshot};

/// Reconnect delays, indexed by the reconnect attempt counter.
pub const BACKOFF_LADDER: [Duration; 6] = [
    Duration::from_secs(1),
    Duration::from_secs(2),
    Duration::from_secs(4),
    Duration::from_secs(8),
    Duration::from_secs(16),
    Duration::from_secs(30),
];

/// Upper bound for the reconnect attempt counter.
pub const MAX_RECONNECT_ATTEMPT: u32 = 10;

/// Delay before the next reconnect; saturates at the last rung.
pub fn backoff_delay(attempt: u32) -> Duration {
    let idx = (attempt as usize).min(BACKOFF_LADDER.len() - 1);
    BACKOFF_LADDER[idx]
}

// ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LinkState {
    Uninitialized,
    Starting,
    Ready,
    /// The transport refused to start; a reconnect is pending.
    Degraded,
    Reconnecting,
}

/// Snapshot of the link published to observers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LinkStatus {
    // ---
    pub state: LinkState,
    pub reconnect_attempt: u32,
    pub reconnect_pending: bool,
    pub location_pending: bool,
    pub snapshot_pending: bool,
}

impl Default for LinkStatus {
    fn default() -> Self {
        Self {
            state: LinkState::Uninitialized,
            reconnect_attempt: 0,
            reconnect_pending: false,
            location_pending: false,
            snapshot_pending: false,
        }
    }
}

/// Everything the link actor mutates. Owned by exactly one task.
#[derive(Debug)]
pub struct RelayState {
    // ---
    pub state: LinkState,
    pub reconnect_attempt: u32,
    pub ready_polls: u32,
    pub pending_location: Option<LocationFix>,
    pub pending_snapshot: Option<SensorSnapshot>,
}

impl RelayState {
    // ---
    pub fn new() -> Self {
        Self {
            state: LinkState::Uninitialized,
            reconnect_attempt: 0,
            ready_polls: 0,
            pending_location: None,
            pending_snapshot: None,
        }
    }

    pub fn is_ready(&self) -> bool {
        self.state == LinkState::Ready
    }

    pub fn bump_attempt(&mut self) {
        self.reconnect_attempt = (self.reconnect_attempt + 1).min(MAX_RECONNECT_ATTEMPT);
    }

    pub fn status(&self, reconnect_pending: bool) -> LinkStatus {
        LinkStatus {
            state: self.state,
            reconnect_attempt: self.reconnect_attempt,
            reconnect_pending,
            location_pending: self.pending_location.is_some(),
            snapshot_pending: self.pending_snapshot.is_some(),
        }
    }
}

impl Default for RelayState {
    fn default() -> Self {
        Self::new()
    }
}
