//! Resilient link to the downstream event-ingestion gateway.
//!
//! # Architecture
//!
//! ```text
//!  producers (peer messages, HTTP ingress)          timers
//!        │  GatewayLink (Clone handle)      flush · ready-poll · reconnect
//!        ▼                                               │
//!  ┌──────────── mpsc command queue ─────────────┐       │
//!  │                 LinkActor                   │◄──────┘
//!  │  RelayState { state, attempt, slots }       │
//!  │  GatewayTransport (start/is_ready/publish)  │
//!  └──────────────────────┬──────────────────────┘
//!                         ▼ watch::Sender<LinkStatus>
//! ```
//!
//! A single task owns all mutable link state, so "state is READY, about to
//! publish" can never interleave with "reconnect timer flips to RECONNECTING".
//!
//! # Lifecycle
//!
//! ```text
//! UNINITIALIZED ─start/publish/flush─► STARTING ─poll ok─► READY
//!                                        │  │                │
//!                        start() error ──┘  └─ poll budget   │ publish error /
//!                              ▼               exhausted     │ health desync
//!                          DEGRADED            ▼             ▼
//!                              └────────► RECONNECTING ◄─────┘
//!                                  backoff elapsed ─► STARTING
//! ```

mod state;
mod transport;

pub use state::{
    backoff_delay, LinkState, LinkStatus, RelayState, BACKOFF_LADDER, MAX_RECONNECT_ATTEMPT,
};
pub use transport::{GatewayTarget, GatewayTransport, HttpGatewayTransport};

use std::future::pending;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::{self, Instant, Interval, MissedTickBehavior, Sleep};
use tracing::{debug, error, info, warn};

use crate::envelope::{EnvelopeBuilder, EventEnvelope, Payload};
use crate::error::{RelayError, Result};
use crate::models::{LocationFix, SensorSnapshot};

// ---

/// Timing and target for a [`GatewayLink`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkConfig {
    // ---
    pub target: GatewayTarget,
    pub flush_interval: Duration,
    pub ready_poll_interval: Duration,
    pub ready_poll_attempts: u32,
}

/// Floor for the flush and readiness-poll periods; tokio intervals reject zero.
const MIN_TIMER_PERIOD: Duration = Duration::from_millis(1);

impl LinkConfig {
    pub fn new(target: GatewayTarget) -> Self {
        Self {
            target,
            flush_interval: Duration::from_secs(5),
            ready_poll_interval: Duration::from_millis(500),
            ready_poll_attempts: 20,
        }
    }

    /// Raise zero periods to [`MIN_TIMER_PERIOD`] and a zero poll budget to one.
    fn sanitized(mut self) -> Self {
        // ---
        if self.flush_interval < MIN_TIMER_PERIOD {
            warn!(?self.flush_interval, "Flush interval too small, using 1ms");
            self.flush_interval = MIN_TIMER_PERIOD;
        }
        if self.ready_poll_interval < MIN_TIMER_PERIOD {
            warn!(?self.ready_poll_interval, "Ready-poll interval too small, using 1ms");
            self.ready_poll_interval = MIN_TIMER_PERIOD;
        }
        if self.ready_poll_attempts == 0 {
            warn!("Ready-poll budget of zero, using 1");
            self.ready_poll_attempts = 1;
        }
        self
    }
}

enum Command {
    Start,
    Publish {
        envelope: Box<EventEnvelope>,
        reply: oneshot::Sender<Result<()>>,
    },
    BufferLocation(LocationFix),
    BufferSnapshot(SensorSnapshot),
    Shutdown {
        done: oneshot::Sender<()>,
    },
}

/// Handle to a running link actor. Cheap to clone; all clones drive the same
/// link. Buffer writes never block the caller.
#[derive(Clone)]
pub struct GatewayLink {
    commands: mpsc::UnboundedSender<Command>,
    status: watch::Receiver<LinkStatus>,
}

impl GatewayLink {
    // ---
    /// Spawn the link actor on the current tokio runtime. The link stays
    /// UNINITIALIZED until started, published to, or flushed. Zero timer
    /// periods in `config` are raised to 1ms.
    pub fn spawn(
        config: LinkConfig,
        transport: Arc<dyn GatewayTransport>,
        builder: EnvelopeBuilder,
    ) -> Self {
        // ---
        let (commands, rx) = mpsc::unbounded_channel();
        let (status_tx, status) = watch::channel(LinkStatus::default());

        let actor = LinkActor {
            config: config.sanitized(),
            transport,
            builder,
            relay: RelayState::new(),
            ready_poll: None,
            reconnect: None,
            status_tx,
        };
        tokio::spawn(actor.run(rx));

        Self { commands, status }
    }

    /// Explicitly start the link. No-op unless UNINITIALIZED.
    pub fn start(&self) {
        let _ = self.commands.send(Command::Start);
    }

    /// Publish one envelope immediately. Fails fast with `LinkNotReady`
    /// unless the link is READY.
    pub async fn publish(&self, envelope: EventEnvelope) -> Result<()> {
        // ---
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(Command::Publish {
                envelope: Box::new(envelope),
                reply,
            })
            .map_err(|_| RelayError::LinkClosed)?;
        rx.await.map_err(|_| RelayError::LinkClosed)?
    }

    /// Replace the pending location. Published on the next flush tick.
    pub fn buffer_location(&self, fix: LocationFix) {
        if self.commands.send(Command::BufferLocation(fix)).is_err() {
            debug!("Location dropped, gateway link closed");
        }
    }

    /// Replace the pending sensor snapshot. Published on the next flush tick.
    pub fn buffer_snapshot(&self, snapshot: SensorSnapshot) {
        if self.commands.send(Command::BufferSnapshot(snapshot)).is_err() {
            debug!("Snapshot dropped, gateway link closed");
        }
    }

    pub fn status(&self) -> LinkStatus {
        *self.status.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<LinkStatus> {
        self.status.clone()
    }

    /// Stop the actor, cancelling every pending timer, and wait for it.
    pub async fn shutdown(&self) {
        let (done, rx) = oneshot::channel();
        if self.commands.send(Command::Shutdown { done }).is_ok() {
            let _ = rx.await;
        }
    }
}

// ---

struct LinkActor {
    // ---
    config: LinkConfig,
    transport: Arc<dyn GatewayTransport>,
    builder: EnvelopeBuilder,
    relay: RelayState,
    /// Armed only while STARTING.
    ready_poll: Option<Interval>,
    /// At most one reconnect may be pending.
    reconnect: Option<Pin<Box<Sleep>>>,
    status_tx: watch::Sender<LinkStatus>,
}

impl LinkActor {
    // ---
    async fn run(mut self, mut commands: mpsc::UnboundedReceiver<Command>) {
        // ---
        let period = self.config.flush_interval;
        let mut flush = time::interval_at(Instant::now() + period, period);
        flush.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                cmd = commands.recv() => match cmd {
                    Some(Command::Start) => self.check_readiness("start requested").await,
                    Some(Command::Publish { envelope, reply }) => {
                        let result = self.publish(&envelope).await;
                        let _ = reply.send(result);
                    }
                    Some(Command::BufferLocation(fix)) => {
                        self.relay.pending_location = Some(fix);
                    }
                    Some(Command::BufferSnapshot(snapshot)) => {
                        self.relay.pending_snapshot = Some(snapshot);
                    }
                    Some(Command::Shutdown { done }) => {
                        self.shutdown().await;
                        let _ = done.send(());
                        return;
                    }
                    None => {
                        self.shutdown().await;
                        return;
                    }
                },
                _ = flush.tick() => self.flush().await,
                _ = tick_if_armed(&mut self.ready_poll) => self.on_ready_poll().await,
                _ = sleep_if_armed(&mut self.reconnect) => self.on_reconnect_due().await,
            }
            self.publish_status();
        }
    }

    fn publish_status(&self) {
        self.status_tx
            .send_replace(self.relay.status(self.reconnect.is_some()));
    }

    /// Start if never started; catch a READY link whose transport dropped.
    async fn check_readiness(&mut self, reason: &str) {
        // ---
        match self.relay.state {
            LinkState::Uninitialized => {
                debug!(reason, "Gateway link not started yet");
                self.begin_start().await;
            }
            LinkState::Ready => {
                if !self.transport.is_ready().await {
                    warn!(reason, "Transport not ready while link READY");
                    self.schedule_reconnect("transport reported not ready", LinkState::Reconnecting);
                }
            }
            LinkState::Starting | LinkState::Reconnecting | LinkState::Degraded => {
                debug!(reason, state = ?self.relay.state, "Gateway link recovery already in progress");
            }
        }
    }

    async fn begin_start(&mut self) {
        // ---
        let target = &self.config.target;
        info!(host = %target.host, port = target.port, auto_connect = target.auto_connect,
            "Starting gateway link");

        self.relay.state = LinkState::Starting;
        self.relay.ready_polls = 0;
        self.publish_status();

        match self.transport.start(&self.config.target).await {
            Ok(()) => {
                let mut poll = time::interval(self.config.ready_poll_interval);
                poll.set_missed_tick_behavior(MissedTickBehavior::Delay);
                self.ready_poll = Some(poll);
                debug!("Gateway start issued, waiting for readiness");
            }
            Err(e) => {
                error!(error = %e, "Gateway transport failed to start");
                self.schedule_reconnect("transport start failed", LinkState::Degraded);
            }
        }
    }

    async fn on_ready_poll(&mut self) {
        // ---
        self.relay.ready_polls += 1;

        if self.transport.is_ready().await {
            self.ready_poll = None;
            self.relay.state = LinkState::Ready;
            self.relay.reconnect_attempt = 0;
            info!(polls = self.relay.ready_polls, "Gateway link READY");
            return;
        }

        if self.relay.ready_polls >= self.config.ready_poll_attempts {
            warn!(polls = self.relay.ready_polls, "Gateway did not become ready in time");
            self.schedule_reconnect("readiness timeout", LinkState::Reconnecting);
        } else {
            debug!(poll = self.relay.ready_polls, "Gateway not ready yet");
        }
    }

    fn schedule_reconnect(&mut self, reason: &str, next: LinkState) {
        // ---
        self.ready_poll = None;

        if self.reconnect.is_some() {
            debug!(reason, "Reconnect already scheduled");
            return;
        }

        let delay = backoff_delay(self.relay.reconnect_attempt);
        warn!(reason, ?delay, attempt = self.relay.reconnect_attempt, "Scheduling gateway reconnect");

        self.relay.state = next;
        self.reconnect = Some(Box::pin(time::sleep(delay)));
    }

    async fn on_reconnect_due(&mut self) {
        // ---
        self.reconnect = None;
        self.transport.stop().await;
        self.relay.bump_attempt();
        self.begin_start().await;
    }

    async fn publish(&mut self, envelope: &EventEnvelope) -> Result<()> {
        // ---
        if !self.relay.is_ready() {
            self.check_readiness("publish while not ready").await;
            return Err(RelayError::LinkNotReady);
        }

        let body = envelope.to_bytes()?;
        match self.transport.publish(&body).await {
            Ok(()) => {
                debug!(event_id = %envelope.event_id, event_type = ?envelope.event_type,
                    "Published to gateway");
                Ok(())
            }
            Err(e) => {
                error!(event_id = %envelope.event_id, error = %e, "Gateway publish failed");
                self.schedule_reconnect("publish failed", LinkState::Reconnecting);
                Err(RelayError::PublishFailed(e.to_string()))
            }
        }
    }

    async fn flush(&mut self) {
        // ---
        if !self.relay.is_ready() {
            self.check_readiness("flush tick").await;
            debug!(state = ?self.relay.state, "Skipping flush, link not ready");
            return;
        }

        self.check_readiness("flush health check").await;
        if !self.relay.is_ready() {
            return;
        }

        let location = self.relay.pending_location.take();
        let snapshot = self.relay.pending_snapshot.take();

        if let Some(fix) = location {
            if self.flush_payload(Payload::Location(fix.clone())).await {
                self.relay.pending_location.get_or_insert(fix);
            }
        }

        if let Some(snapshot) = snapshot {
            if !self.relay.is_ready() || self.flush_payload(Payload::Sensors(snapshot)).await {
                self.relay.pending_snapshot.get_or_insert(snapshot);
            }
        }
    }

    /// Returns true when the value should be kept for the next tick.
    async fn flush_payload(&mut self, payload: Payload) -> bool {
        // ---
        let envelope = match self.builder.build(&payload) {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!(error = %e, "Dropping invalid buffered payload");
                return false;
            }
        };

        match self.publish(&envelope).await {
            Ok(()) => {
                debug!(event_type = ?envelope.event_type, "Flushed buffered value");
                false
            }
            Err(_) => true,
        }
    }

    async fn shutdown(&mut self) {
        // ---
        self.ready_poll = None;
        self.reconnect = None;
        self.transport.stop().await;
        info!("Gateway link shut down");
    }
}

async fn tick_if_armed(poll: &mut Option<Interval>) {
    match poll {
        Some(interval) => {
            interval.tick().await;
        }
        None => pending().await,
    }
}

async fn sleep_if_armed(timer: &mut Option<Pin<Box<Sleep>>>) {
    match timer {
        Some(sleep) => sleep.as_mut().await,
        None => pending().await,
    }
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;
    use crate::envelope::{DeviceType, EventType, Source};
    use crate::models::{FallReport, Vec3};
    use async_trait::async_trait;
    use chrono::Utc;
    use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
    use std::sync::Mutex;
    use tokio_test::{assert_err, assert_ok};

    #[derive(Default)]
    struct MockGateway {
        ready_on_start: AtomicBool,
        fail_start: AtomicBool,
        fail_publish: AtomicBool,
        ready: AtomicBool,
        publish_delay: Mutex<Option<Duration>>,
        starts: AtomicU32,
        stops: AtomicU32,
        published: Mutex<Vec<EventEnvelope>>,
    }

    impl MockGateway {
        fn healthy() -> Arc<Self> {
            let mock = Self::default();
            mock.ready_on_start.store(true, Ordering::SeqCst);
            Arc::new(mock)
        }

        fn published(&self) -> Vec<EventEnvelope> {
            self.published.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl GatewayTransport for MockGateway {
        async fn start(&self, _target: &GatewayTarget) -> anyhow::Result<()> {
            self.starts.fetch_add(1, Ordering::SeqCst);
            if self.fail_start.load(Ordering::SeqCst) {
                anyhow::bail!("bad address");
            }
            self.ready
                .store(self.ready_on_start.load(Ordering::SeqCst), Ordering::SeqCst);
            Ok(())
        }

        async fn is_ready(&self) -> bool {
            self.ready.load(Ordering::SeqCst)
        }

        async fn publish(&self, body: &[u8]) -> anyhow::Result<()> {
            let delay = *self.publish_delay.lock().unwrap();
            if let Some(delay) = delay {
                time::sleep(delay).await;
            }
            if self.fail_publish.load(Ordering::SeqCst) {
                anyhow::bail!("connection reset");
            }
            let envelope = EventEnvelope::from_slice(body)?;
            self.published.lock().unwrap().push(envelope);
            Ok(())
        }

        async fn stop(&self) {
            self.stops.fetch_add(1, Ordering::SeqCst);
            self.ready.store(false, Ordering::SeqCst);
        }
    }

    fn builder() -> EnvelopeBuilder {
        EnvelopeBuilder::new(
            Source {
                platform: "wearos".to_string(),
                device_type: DeviceType::Watch,
            },
            "watch-local",
        )
    }

    fn spawn_link(mock: &Arc<MockGateway>) -> GatewayLink {
        let target = GatewayTarget {
            host: "gateway.test".to_string(),
            port: 6200,
            auto_connect: true,
        };
        GatewayLink::spawn(LinkConfig::new(target), mock.clone(), builder())
    }

    fn fall_envelope() -> EventEnvelope {
        builder()
            .build(&Payload::Fall(FallReport {
                near_fall: false,
                location: None,
            }))
            .unwrap()
    }

    fn fix(lat: f64) -> LocationFix {
        LocationFix {
            latitude: lat,
            longitude: -43.17,
            accuracy: 5.0,
            provider: "gps".to_string(),
            timestamp: Utc::now(),
        }
    }

    fn snapshot() -> SensorSnapshot {
        SensorSnapshot::from_readings(Vec3::new(0.0, 9.81, 0.0), Vec3::default(), Utc::now())
    }

    async fn advance(ms: u64) {
        time::sleep(Duration::from_millis(ms)).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_then_ready() {
        // ---
        let mock = MockGateway::healthy();
        let link = spawn_link(&mock);
        assert_eq!(link.status().state, LinkState::Uninitialized);

        link.start();
        advance(10).await;

        assert_eq!(link.status().state, LinkState::Ready);
        assert_eq!(mock.starts.load(Ordering::SeqCst), 1);
        assert_ok!(link.publish(fall_envelope()).await);
        assert_eq!(mock.published().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_publish_before_ready_fails_fast_and_starts() {
        // ---
        let mock = Arc::new(MockGateway::default());
        let link = spawn_link(&mock);

        let err = assert_err!(link.publish(fall_envelope()).await);
        assert_eq!(err, RelayError::LinkNotReady);
        assert_eq!(link.status().state, LinkState::Starting);
        assert_eq!(mock.starts.load(Ordering::SeqCst), 1);

        // A second attempt while STARTING does not restart the transport.
        assert_err!(link.publish(fall_envelope()).await);
        assert_eq!(mock.starts.load(Ordering::SeqCst), 1);
        assert!(mock.published().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_readiness_timeout_escalates_to_reconnect() {
        // ---
        let mock = Arc::new(MockGateway::default());
        let link = spawn_link(&mock);
        link.start();

        // 20 polls, 500 ms apart: budget runs out at 9.5 s.
        advance(9_000).await;
        assert_eq!(link.status().state, LinkState::Starting);

        advance(1_000).await;
        let status = link.status();
        assert_eq!(status.state, LinkState::Reconnecting);
        assert!(status.reconnect_pending);
        assert_eq!(mock.starts.load(Ordering::SeqCst), 1);

        // First rung is 1 s; the old connection is torn down first.
        advance(1_000).await;
        assert_eq!(link.status().state, LinkState::Starting);
        assert_eq!(link.status().reconnect_attempt, 1);
        assert_eq!(mock.starts.load(Ordering::SeqCst), 2);
        assert_eq!(mock.stops.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_backoff_follows_ladder_then_resets() {
        // ---
        let mock = Arc::new(MockGateway::default());
        mock.fail_start.store(true, Ordering::SeqCst);
        let link = spawn_link(&mock);

        let t0 = Instant::now();
        let at = |ms: u64| time::sleep_until(t0 + Duration::from_millis(ms));

        link.start();
        at(1).await;
        assert_eq!(link.status().state, LinkState::Degraded);
        assert!(link.status().reconnect_pending);

        // Failed starts are retried 1, 2, 4 and 8 s apart.
        for (before, after, starts) in [
            (900, 1_100, 2),
            (2_900, 3_100, 3),
            (6_900, 7_100, 4),
            (14_900, 15_100, 5),
        ] {
            at(before).await;
            assert_eq!(mock.starts.load(Ordering::SeqCst), starts - 1);
            at(after).await;
            assert_eq!(mock.starts.load(Ordering::SeqCst), starts);
            assert_eq!(link.status().state, LinkState::Degraded);
        }
        assert_eq!(link.status().reconnect_attempt, 4);

        // Next rung is 16 s. Once the transport recovers, READY resets the counter.
        mock.fail_start.store(false, Ordering::SeqCst);
        mock.ready_on_start.store(true, Ordering::SeqCst);
        at(31_100).await;
        let status = link.status();
        assert_eq!(status.state, LinkState::Ready);
        assert_eq!(status.reconnect_attempt, 0);
        assert!(!status.reconnect_pending);
    }

    #[tokio::test(start_paused = true)]
    async fn test_publish_failure_reconnects_once() {
        // ---
        let mock = MockGateway::healthy();
        let link = spawn_link(&mock);
        link.start();
        advance(10).await;

        mock.fail_publish.store(true, Ordering::SeqCst);
        let err = assert_err!(link.publish(fall_envelope()).await);
        assert!(matches!(err, RelayError::PublishFailed(_)));
        assert_eq!(link.status().state, LinkState::Reconnecting);
        mock.fail_publish.store(false, Ordering::SeqCst);

        // While reconnecting, publishes fail fast and no second timer is armed.
        let err = assert_err!(link.publish(fall_envelope()).await);
        assert_eq!(err, RelayError::LinkNotReady);

        advance(1_100).await;
        assert_eq!(mock.starts.load(Ordering::SeqCst), 2);
        assert_eq!(link.status().state, LinkState::Ready);
        assert_ok!(link.publish(fall_envelope()).await);
        assert_eq!(mock.published().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_health_check_catches_desync() {
        // ---
        let mock = MockGateway::healthy();
        let link = spawn_link(&mock);
        let t0 = Instant::now();
        link.start();
        advance(10).await;

        mock.ready.store(false, Ordering::SeqCst);
        time::sleep_until(t0 + Duration::from_millis(4_900)).await;
        assert_eq!(link.status().state, LinkState::Ready);

        time::sleep_until(t0 + Duration::from_millis(5_100)).await;
        assert_eq!(link.status().state, LinkState::Reconnecting);
    }

    #[tokio::test(start_paused = true)]
    async fn test_flush_publishes_buffered_location_once() {
        // ---
        let mock = MockGateway::healthy();
        let link = spawn_link(&mock);
        let t0 = Instant::now();
        link.start();
        advance(10).await;

        link.buffer_location(fix(1.0));
        advance(10).await;
        assert!(link.status().location_pending);
        assert!(mock.published().is_empty());

        time::sleep_until(t0 + Duration::from_millis(5_100)).await;
        let published = mock.published();
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].event_type, EventType::LocationUpdate);
        assert!(!link.status().location_pending);

        time::sleep_until(t0 + Duration::from_millis(10_100)).await;
        assert_eq!(mock.published().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_buffer_keeps_latest_value_only() {
        // ---
        let mock = MockGateway::healthy();
        let link = spawn_link(&mock);
        link.start();
        for lat in [1.0, 2.0, 3.0] {
            link.buffer_location(fix(lat));
        }
        link.buffer_snapshot(snapshot());
        link.buffer_snapshot(snapshot());

        advance(5_100).await;
        let published = mock.published();
        assert_eq!(published.len(), 2);

        match published[0].payload() {
            Payload::Location(fix) => assert!((fix.latitude - 3.0).abs() < 1e-9),
            other => panic!("expected location, got {other:?}"),
        }
        assert_eq!(published[1].event_type, EventType::SensorSnapshot);
    }

    #[tokio::test(start_paused = true)]
    async fn test_snapshot_arriving_mid_flush_is_kept() {
        // ---
        let mock = MockGateway::healthy();
        *mock.publish_delay.lock().unwrap() = Some(Duration::from_secs(1));
        let link = spawn_link(&mock);
        let t0 = Instant::now();
        let at = |ms: u64| time::sleep_until(t0 + Duration::from_millis(ms));

        link.start();
        link.buffer_location(fix(1.0));

        // Tick at 5 s; the location publish is in flight until 6 s.
        at(5_500).await;
        link.buffer_snapshot(snapshot());

        at(6_500).await;
        assert_eq!(mock.published().len(), 1);
        assert!(link.status().snapshot_pending);

        at(11_500).await;
        let published = mock.published();
        assert_eq!(published.len(), 2);
        assert_eq!(published[1].event_type, EventType::SensorSnapshot);
        assert!(!link.status().snapshot_pending);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_flush_retries_next_tick() {
        // ---
        let mock = MockGateway::healthy();
        let link = spawn_link(&mock);
        let t0 = Instant::now();
        let at = |ms: u64| time::sleep_until(t0 + Duration::from_millis(ms));

        link.start();
        link.buffer_location(fix(1.0));
        at(10).await;
        mock.fail_publish.store(true, Ordering::SeqCst);

        at(5_100).await;
        assert_eq!(link.status().state, LinkState::Reconnecting);
        assert!(link.status().location_pending);
        mock.fail_publish.store(false, Ordering::SeqCst);

        // Reconnect at 6 s, next tick at 10 s.
        at(10_100).await;
        assert_eq!(link.status().state, LinkState::Ready);
        assert_eq!(mock.published().len(), 1);
        assert!(!link.status().location_pending);
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_periods_do_not_kill_the_link() {
        // ---
        let mock = MockGateway::healthy();
        let target = GatewayTarget {
            host: "gateway.test".to_string(),
            port: 6200,
            auto_connect: true,
        };
        let config = LinkConfig {
            flush_interval: Duration::ZERO,
            ready_poll_interval: Duration::ZERO,
            ready_poll_attempts: 0,
            ..LinkConfig::new(target)
        };
        let link = GatewayLink::spawn(config, mock.clone(), builder());

        link.start();
        advance(10).await;
        assert_eq!(link.status().state, LinkState::Ready);

        link.buffer_location(fix(-22.9));
        advance(10).await;
        assert_eq!(mock.published().len(), 1);
        assert_ok!(link.publish(fall_envelope()).await);
        link.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_cancels_timers() {
        // ---
        let mock = Arc::new(MockGateway::default());
        mock.fail_start.store(true, Ordering::SeqCst);
        let link = spawn_link(&mock);
        link.start();
        advance(10).await;
        assert!(link.status().reconnect_pending);

        link.shutdown().await;
        assert_eq!(mock.stops.load(Ordering::SeqCst), 1);

        advance(60_000).await;
        assert_eq!(mock.starts.load(Ordering::SeqCst), 1);

        let err = assert_err!(link.publish(fall_envelope()).await);
        assert_eq!(err, RelayError::LinkClosed);
        link.buffer_location(fix(1.0));
    }
}
