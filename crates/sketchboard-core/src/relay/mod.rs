//! Transport-agnostic relay between the local bus and remote peers.
//!
//! Outbound, a catch-all observer queues every durable event that did not
//! arrive over this relay's own transport. Inbound, frames are parsed, tagged
//! with the transport's origin flag and dispatched on the local bus.
//!
//! The relay is driven by [`Relay::next_activity`] and [`Relay::apply`], or by
//! [`Relay::pump`] when nothing else needs the bus.

mod memory;
mod stream;
mod transport;
mod websocket;

pub use memory::{MemoryPeer, MemoryTransport};
pub use stream::{DEFAULT_MAX_FRAME_LEN, Dial, Established, FrameBuffer, StreamTransport, TcpDialer};
pub use transport::{Transport, TransportError, TransportKind};
pub use websocket::WebSocketTransport;

use serde::{Deserialize, Serialize};
use std::cell::Cell;
use std::rc::Rc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::time::{Instant, Interval, MissedTickBehavior};

use crate::bus::{EventBus, HandlerResult, SubscriptionId};
use crate::events::{DomainEvent, EventError};
use crate::wire::{Frame, parse_frames};

/// Errors that end a relay session.
#[derive(Debug, Error)]
pub enum RelayError {
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("registration failed: {0}")]
    Register(#[source] TransportError),
    #[error("encoding failed: {0}")]
    Encode(#[from] EventError),
    #[error("no frame received for {0:?}")]
    Stalled(Duration),
    #[error("gave up after {0} reconnect attempts")]
    ReconnectExhausted(u32),
}

/// Receives send failures. The failed frame is dropped.
pub type ErrorSink = Rc<dyn Fn(&TransportError)>;

/// Relay timing and limits.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    /// Interval between PING frames while streaming.
    pub keepalive_interval_ms: u64,
    /// Silence after which the link counts as stalled.
    pub idle_timeout_ms: u64,
    pub reconnect_delay_ms: u64,
    /// Zero retries forever.
    pub max_reconnect_attempts: u32,
    pub max_frame_len: usize,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            keepalive_interval_ms: 15_000,
            idle_timeout_ms: 45_000,
            reconnect_delay_ms: 2_000,
            max_reconnect_attempts: 5,
            max_frame_len: DEFAULT_MAX_FRAME_LEN,
        }
    }
}

impl RelayConfig {
    pub fn keepalive_interval(&self) -> Duration {
        Duration::from_millis(self.keepalive_interval_ms)
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_millis(self.idle_timeout_ms)
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayState {
    Disconnected,
    Connecting,
    Registered,
    Streaming,
}

/// What woke the relay up.
#[derive(Debug)]
pub enum Activity {
    /// A frame from the transport, an error, or `None` on close.
    Inbound(Option<Result<String, TransportError>>),
    /// A queued outbound frame.
    Outbound(String),
    Keepalive,
    Stalled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkStatus {
    Open,
    Closed,
}

/// True if `event` may be sent over a transport of `kind`.
pub fn should_forward(event: &DomainEvent, kind: TransportKind) -> bool {
    !event.is_temporary() && !event.annotations().is_from(kind)
}

pub struct Relay<T: Transport> {
    transport: T,
    canvas_id: String,
    config: RelayConfig,
    state: Rc<Cell<RelayState>>,
    outbound_tx: mpsc::UnboundedSender<String>,
    outbound_rx: mpsc::UnboundedReceiver<String>,
    subscription: Option<SubscriptionId>,
    errors: ErrorSink,
    keepalive: Option<Interval>,
    last_seen: Instant,
}

impl<T: Transport> Relay<T> {
    pub fn new(transport: T, canvas_id: impl Into<String>, config: RelayConfig) -> Self {
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        Self {
            transport,
            canvas_id: canvas_id.into(),
            config,
            state: Rc::new(Cell::new(RelayState::Disconnected)),
            outbound_tx,
            outbound_rx,
            subscription: None,
            errors: Rc::new(|err: &TransportError| log::error!("Relay send failed: {err}")),
            keepalive: None,
            last_seen: Instant::now(),
        }
    }

    /// Replace the default error sink, which only logs.
    pub fn with_error_sink(mut self, sink: impl Fn(&TransportError) + 'static) -> Self {
        self.errors = Rc::new(sink);
        self
    }

    pub fn state(&self) -> RelayState {
        self.state.get()
    }

    pub fn kind(&self) -> TransportKind {
        self.transport.kind()
    }

    pub fn canvas_id(&self) -> &str {
        &self.canvas_id
    }

    pub fn config(&self) -> &RelayConfig {
        &self.config
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    /// Open the transport, register for the canvas and start forwarding.
    pub async fn connect(&mut self, bus: &mut EventBus) -> Result<(), RelayError> {
        if self.state.get() != RelayState::Disconnected {
            return Ok(());
        }
        self.state.set(RelayState::Connecting);
        if let Err(err) = self.transport.connect().await {
            self.state.set(RelayState::Disconnected);
            return Err(err.into());
        }

        let register = Frame::Register {
            canvas_id: self.canvas_id.clone(),
        }
        .to_json()?;
        if let Err(err) = self.transport.send(&register).await {
            self.transport.disconnect().await.ok();
            self.state.set(RelayState::Disconnected);
            return Err(RelayError::Register(err));
        }
        self.state.set(RelayState::Registered);

        // Frames queued while the link was down belong to a dead session.
        while self.outbound_rx.try_recv().is_ok() {}

        self.subscription = Some(bus.subscribe_to_all(outbound_observer(
            self.kind(),
            self.state.clone(),
            self.errors.clone(),
            self.outbound_tx.clone(),
        )));

        let period = self.config.keepalive_interval();
        if !period.is_zero() {
            let mut interval = tokio::time::interval_at(Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            self.keepalive = Some(interval);
        }
        self.last_seen = Instant::now();
        self.state.set(RelayState::Streaming);
        log::info!("Streaming canvas {} over {}", self.canvas_id, self.kind());
        Ok(())
    }

    /// Stop forwarding and close the transport. Safe to call repeatedly.
    pub async fn disconnect(&mut self, bus: &mut EventBus) {
        if let Some(id) = self.subscription.take() {
            bus.unsubscribe(id);
        }
        self.keepalive = None;
        if self.state.get() != RelayState::Disconnected {
            if let Err(err) = self.transport.disconnect().await {
                log::warn!("Error while closing {} transport: {err}", self.kind());
            }
            self.state.set(RelayState::Disconnected);
            log::info!("Disconnected from canvas {}", self.canvas_id);
        }
    }

    /// Wait for the next thing to do. Cancel safe.
    pub async fn next_activity(&mut self) -> Activity {
        let idle_deadline = self.last_seen + self.config.idle_timeout();
        let idle_enabled = !self.config.idle_timeout().is_zero();
        tokio::select! {
            frame = self.transport.next_frame() => Activity::Inbound(frame),
            Some(frame) = self.outbound_rx.recv() => Activity::Outbound(frame),
            _ = tick(&mut self.keepalive) => Activity::Keepalive,
            _ = tokio::time::sleep_until(idle_deadline), if idle_enabled => Activity::Stalled,
        }
    }

    /// Act on an activity returned by [`Self::next_activity`].
    pub async fn apply(&mut self, activity: Activity, bus: &mut EventBus) -> Result<LinkStatus, RelayError> {
        match activity {
            Activity::Inbound(None) => {
                log::info!("Peer closed the {} link", self.kind());
                self.disconnect(bus).await;
                Ok(LinkStatus::Closed)
            }
            Activity::Inbound(Some(Err(err))) => {
                self.disconnect(bus).await;
                Err(err.into())
            }
            Activity::Inbound(Some(Ok(text))) => {
                self.last_seen = Instant::now();
                self.handle_inbound(&text, bus).await;
                Ok(LinkStatus::Open)
            }
            Activity::Outbound(frame) => {
                log::debug!("-> {frame}");
                self.send_or_report(&frame).await;
                Ok(LinkStatus::Open)
            }
            Activity::Keepalive => {
                let ping = Frame::Ping {
                    canvas_id: Some(self.canvas_id.clone()),
                }
                .to_json()?;
                self.send_or_report(&ping).await;
                Ok(LinkStatus::Open)
            }
            Activity::Stalled => {
                let timeout = self.config.idle_timeout();
                log::warn!("No frame from peer for {timeout:?}, dropping link");
                self.disconnect(bus).await;
                Err(RelayError::Stalled(timeout))
            }
        }
    }

    /// Drive the link until it closes.
    pub async fn pump(&mut self, bus: &mut EventBus) -> Result<(), RelayError> {
        loop {
            let activity = self.next_activity().await;
            if self.apply(activity, bus).await? == LinkStatus::Closed {
                return Ok(());
            }
        }
    }

    /// Retry [`Self::connect`] after the configured delay until it succeeds or
    /// the attempt limit is reached.
    pub async fn reconnect(&mut self, bus: &mut EventBus) -> Result<(), RelayError> {
        let max = self.config.max_reconnect_attempts;
        let mut attempt = 0;
        loop {
            if max > 0 && attempt >= max {
                return Err(RelayError::ReconnectExhausted(max));
            }
            attempt += 1;
            tokio::time::sleep(self.config.reconnect_delay()).await;
            log::info!("Reconnect attempt {attempt} for canvas {}", self.canvas_id);
            match self.connect(bus).await {
                Ok(()) => return Ok(()),
                Err(err) => log::warn!("Reconnect attempt {attempt} failed: {err}"),
            }
        }
    }

    /// Connect and pump, reconnecting whenever the link drops.
    ///
    /// Only returns once reconnecting gives up. Events dropped while the link
    /// was down are not re-sent.
    pub async fn run_with_reconnect(&mut self, bus: &mut EventBus) -> RelayError {
        if let Err(err) = self.connect(bus).await {
            log::warn!("Connect failed: {err}");
            if let Err(err) = self.reconnect(bus).await {
                return err;
            }
        }
        loop {
            match self.pump(bus).await {
                Ok(()) => log::info!("Link closed"),
                Err(err) => log::warn!("Link lost: {err}"),
            }
            self.disconnect(bus).await;
            if let Err(err) = self.reconnect(bus).await {
                return err;
            }
        }
    }

    /// Send every queued outbound frame now.
    pub async fn flush(&mut self) {
        while let Ok(frame) = self.outbound_rx.try_recv() {
            log::debug!("-> {frame}");
            self.send_or_report(&frame).await;
        }
    }

    async fn send_or_report(&mut self, frame: &str) {
        if let Err(err) = self.transport.send(frame).await {
            (self.errors)(&err);
        }
    }

    async fn handle_inbound(&mut self, text: &str, bus: &mut EventBus) {
        let kind = self.kind();
        for frame in parse_frames(text) {
            match frame {
                Ok(Frame::Event(mut event)) => {
                    log::debug!("<- {} tagged {}", event.kind(), kind.origin_tag());
                    event.payload.annotations_mut().mark_from(kind);
                    bus.dispatch(event);
                }
                Ok(Frame::Ping { canvas_id }) => {
                    let pong = Frame::Pong {
                        canvas_id: canvas_id.or_else(|| Some(self.canvas_id.clone())),
                    };
                    match pong.to_json() {
                        Ok(pong) => self.send_or_report(&pong).await,
                        Err(err) => log::error!("Failed to encode PONG: {err}"),
                    }
                }
                Ok(Frame::Pong { .. }) => log::debug!("PONG on canvas {}", self.canvas_id),
                Ok(Frame::Register { canvas_id }) => log::debug!("Server registered canvas {canvas_id}"),
                Ok(Frame::Error { message }) => log::warn!("Server error: {message}"),
                Err(err) => log::warn!("Dropping malformed frame: {err}"),
            }
        }
    }
}

/// Queue every forwardable event while the relay is streaming.
fn outbound_observer(
    kind: TransportKind,
    state: Rc<Cell<RelayState>>,
    errors: ErrorSink,
    tx: mpsc::UnboundedSender<String>,
) -> impl FnMut(&DomainEvent) -> HandlerResult {
    move |event| {
        if !should_forward(event, kind) {
            return Ok(());
        }
        if state.get() != RelayState::Streaming {
            errors(&TransportError::NotConnected);
            return Ok(());
        }
        let frame = event.without_origin().to_json()?;
        if tx.send(frame).is_err() {
            errors(&TransportError::Closed);
        }
        Ok(())
    }
}

async fn tick(interval: &mut Option<Interval>) {
    match interval {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{AddShapePayload, Annotations, EventKind, Geometry, Origin};
    use crate::identity::ShapeId;
    use kurbo::Point;
    use std::cell::RefCell;

    fn line(id: &str) -> DomainEvent {
        DomainEvent::add_shape(AddShapePayload {
            id: ShapeId::from(id),
            geometry: Geometry::Line {
                from: Point::new(0.0, 0.0),
                to: Point::new(1.0, 1.0),
            },
            background_color: None,
            border_color: None,
            annotations: Annotations::default(),
        })
    }

    fn quiet_config() -> RelayConfig {
        RelayConfig {
            keepalive_interval_ms: 0,
            idle_timeout_ms: 0,
            ..RelayConfig::default()
        }
    }

    async fn connected(kind: TransportKind) -> (Relay<MemoryTransport>, MemoryPeer, EventBus) {
        let (transport, mut peer) = MemoryTransport::pair(kind);
        let mut relay = Relay::new(transport, "canvas-1", quiet_config());
        let mut bus = EventBus::new();
        relay.connect(&mut bus).await.unwrap();
        let register = peer.recv().await.unwrap();
        assert_eq!(register, r#"{"type":"register","canvas_id":"canvas-1"}"#);
        (relay, peer, bus)
    }

    #[test]
    fn test_should_forward() {
        let local = line("a:0");
        assert!(should_forward(&local, TransportKind::WebSocket));
        assert!(!should_forward(&local.clone().temporary(), TransportKind::WebSocket));

        let mut from_ws = line("a:0");
        from_ws.payload.annotations_mut().mark_from(TransportKind::WebSocket);
        assert!(!should_forward(&from_ws, TransportKind::WebSocket));
        assert!(should_forward(&from_ws, TransportKind::Stream));
    }

    #[tokio::test]
    async fn test_state_machine() {
        let (transport, _peer) = MemoryTransport::pair(TransportKind::Stream);
        let mut relay = Relay::new(transport, "c", quiet_config());
        let mut bus = EventBus::new();
        assert_eq!(relay.state(), RelayState::Disconnected);

        relay.connect(&mut bus).await.unwrap();
        assert_eq!(relay.state(), RelayState::Streaming);
        assert_eq!(bus.observer_count(), 1);

        relay.disconnect(&mut bus).await;
        relay.disconnect(&mut bus).await;
        assert_eq!(relay.state(), RelayState::Disconnected);
        assert_eq!(bus.observer_count(), 0);
    }

    #[tokio::test]
    async fn test_outbound_filters_temporary_and_strips_origin() {
        let (mut relay, mut peer, mut bus) = connected(TransportKind::WebSocket).await;

        bus.dispatch(line("a:0").temporary());
        bus.dispatch(line("a:1"));
        let mut bridged = line("a:2");
        bridged.payload.annotations_mut().mark_from(TransportKind::Stream);
        bus.dispatch(bridged);
        relay.flush().await;

        let sent = peer.drain();
        assert_eq!(sent.len(), 2);
        let first = DomainEvent::from_json(&sent[0]).unwrap();
        assert_eq!(first.payload.shape_id(), Some(&ShapeId::from("a:1")));
        assert!(first.timestamp.is_some());
        assert!(!sent[1].contains("from_wtrans"));
    }

    #[tokio::test]
    async fn test_inbound_tagged_and_not_echoed() {
        let (mut relay, mut peer, mut bus) = connected(TransportKind::Stream).await;
        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = seen.clone();
        bus.subscribe(EventKind::AddShape, move |event| {
            sink.borrow_mut().push(event.origin());
            Ok(())
        });

        peer.send(line("p2:0").to_json().unwrap());
        let activity = relay.next_activity().await;
        assert_eq!(relay.apply(activity, &mut bus).await.unwrap(), LinkStatus::Open);
        relay.flush().await;

        assert_eq!(*seen.borrow(), vec![Origin::Remote(TransportKind::Stream)]);
        assert!(peer.drain().is_empty());
    }

    #[tokio::test]
    async fn test_ping_answered_with_pong() {
        let (mut relay, mut peer, mut bus) = connected(TransportKind::WebSocket).await;
        peer.send(r#"{"type":"PING","canvas_id":"canvas-1"}"#);
        let activity = relay.next_activity().await;
        relay.apply(activity, &mut bus).await.unwrap();
        assert_eq!(
            peer.drain(),
            vec![r#"{"type":"PONG","canvas_id":"canvas-1"}"#.to_string()]
        );
    }

    #[tokio::test]
    async fn test_malformed_frames_are_dropped() {
        let (mut relay, mut peer, mut bus) = connected(TransportKind::WebSocket).await;
        let count = Rc::new(Cell::new(0));
        let counter = count.clone();
        bus.subscribe_to_all(move |_| {
            counter.set(counter.get() + 1);
            Ok(())
        });

        peer.send(r#"[{"type":"NOPE"},"{broken",{"type":"REDRAW","payload":{}}]"#);
        let activity = relay.next_activity().await;
        assert_eq!(relay.apply(activity, &mut bus).await.unwrap(), LinkStatus::Open);
        assert_eq!(count.get(), 1);
    }

    #[tokio::test]
    async fn test_send_failure_goes_to_error_sink() {
        let (transport, peer) = MemoryTransport::pair(TransportKind::WebSocket);
        let failures = Rc::new(Cell::new(0));
        let counter = failures.clone();
        let mut relay = Relay::new(transport, "c", quiet_config())
            .with_error_sink(move |_| counter.set(counter.get() + 1));
        let mut bus = EventBus::new();
        relay.connect(&mut bus).await.unwrap();
        drop(peer);

        bus.dispatch(line("a:0"));
        relay.flush().await;
        assert_eq!(failures.get(), 1);
    }

    #[tokio::test]
    async fn test_peer_close_disconnects() {
        let (mut relay, peer, mut bus) = connected(TransportKind::Stream).await;
        drop(peer);
        let activity = relay.next_activity().await;
        assert_eq!(relay.apply(activity, &mut bus).await.unwrap(), LinkStatus::Closed);
        assert_eq!(relay.state(), RelayState::Disconnected);
        assert_eq!(bus.observer_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_keepalive_and_idle_timeout() {
        let (transport, mut peer) = MemoryTransport::pair(TransportKind::WebSocket);
        let config = RelayConfig {
            keepalive_interval_ms: 1_000,
            idle_timeout_ms: 2_500,
            ..RelayConfig::default()
        };
        let mut relay = Relay::new(transport, "c", config);
        let mut bus = EventBus::new();
        relay.connect(&mut bus).await.unwrap();
        peer.drain();

        let err = relay.pump(&mut bus).await.unwrap_err();
        assert!(matches!(err, RelayError::Stalled(_)));
        let pings = peer.drain();
        assert_eq!(pings.len(), 2);
        assert!(pings.iter().all(|p| p.contains("PING")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconnect_gives_up() {
        let (transport, peer) = MemoryTransport::pair(TransportKind::Stream);
        drop(peer);
        let config = RelayConfig {
            max_reconnect_attempts: 3,
            ..quiet_config()
        };
        let mut relay = Relay::new(transport, "c", config);
        let mut bus = EventBus::new();
        let err = relay.run_with_reconnect(&mut bus).await;
        assert!(matches!(err, RelayError::ReconnectExhausted(3)));
    }
}
