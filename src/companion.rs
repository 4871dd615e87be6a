//! Companion-side handling of envelopes received from the wearable.
//!
//! Fall events are published to the gateway immediately. Location and sensor
//! payloads go into the link's latest-value-wins slots and leave on the next
//! flush tick.

use std::sync::RwLock;

use tracing::{debug, error, info, warn};

use crate::envelope::{EnvelopeBuilder, EventEnvelope, EventType, Payload};
use crate::error::{RelayError, Result};
use crate::gateway::GatewayLink;
use crate::monitor::EnvelopeCallback;
use crate::peer::PeerPath;

// ---

pub struct CompanionRelay {
    // ---
    builder: EnvelopeBuilder,
    link: GatewayLink,
    subscribers: RwLock<Vec<EnvelopeCallback>>,
}

impl CompanionRelay {
    // ---
    pub fn new(builder: EnvelopeBuilder, link: GatewayLink) -> Self {
        Self {
            builder,
            link,
            subscribers: RwLock::new(Vec::new()),
        }
    }

    pub fn link(&self) -> &GatewayLink {
        &self.link
    }

    /// Called with every valid inbound envelope, for presentation and storage.
    pub fn on_envelope_ready<F>(&self, callback: F)
    where
        F: Fn(&EventEnvelope) + Send + Sync + 'static,
    {
        match self.subscribers.write() {
            Ok(mut subs) => subs.push(Box::new(callback)),
            Err(poisoned) => poisoned.into_inner().push(Box::new(callback)),
        }
    }

    /// Handle one peer message.
    ///
    /// Only malformed input is reported back. Gateway trouble is logged and
    /// the event dropped; the peer path is never blocked by the gateway.
    pub async fn on_peer_message(&self, path: PeerPath, bytes: &[u8]) -> Result<()> {
        // ---
        let inbound = EventEnvelope::from_slice(bytes)
            .inspect_err(|e| warn!(%path, error = %e, "Rejecting peer message"))?;

        let expected = match path {
            PeerPath::FallEvent => EventType::FallDetected,
            PeerPath::Location => EventType::LocationUpdate,
            PeerPath::Sensors => EventType::SensorSnapshot,
        };
        if inbound.event_type != expected {
            return Err(RelayError::Validation(format!(
                "{:?} envelope received on {path}",
                inbound.event_type
            )));
        }

        let payload = inbound.payload();
        payload.validate()?;
        self.notify(&inbound);

        match payload {
            Payload::Fall(report) => {
                let origin = inbound
                    .origin
                    .clone()
                    .unwrap_or_else(|| inbound.source.device_type.as_str().to_string());
                self.publish_fall(&Payload::Fall(report), origin).await?
            }
            Payload::Location(fix) => {
                debug!(event_id = %inbound.event_id, "Buffering location");
                self.link.buffer_location(fix);
            }
            Payload::Sensors(snapshot) => {
                debug!(event_id = %inbound.event_id, "Buffering sensor snapshot");
                self.link.buffer_snapshot(snapshot);
            }
        }
        Ok(())
    }

    async fn publish_fall(&self, payload: &Payload, origin: String) -> Result<()> {
        // ---
        let mut envelope = self.builder.build(payload)?;
        envelope.origin = Some(origin);
        let event_id = envelope.event_id;

        match self.link.publish(envelope).await {
            Ok(()) => info!(%event_id, "Fall event published to gateway"),
            Err(RelayError::LinkNotReady) => {
                warn!(%event_id, "Gateway not ready, fall event dropped")
            }
            Err(e) => error!(%event_id, error = %e, "Fall event not published"),
        }
        Ok(())
    }

    fn notify(&self, envelope: &EventEnvelope) {
        let subs = match self.subscribers.read() {
            Ok(subs) => subs,
            Err(poisoned) => poisoned.into_inner(),
        };
        for callback in subs.iter() {
            callback(envelope);
        }
    }
}
