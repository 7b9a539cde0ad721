//! Broadcast fan-out hub
//!
//! Viewer connections register one outbound channel each. A published event
//! is written to every channel without waiting: slow viewers lose frames,
//! closed ones are dropped from the registry, and the producer never sees
//! either.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::RwLock;
use scenecast_core::{BroadcastEvent, EventEmitter, EventKind, EventLog, SceneSnapshot, SseFrame};
use scenecast_session::{FrameSender, SessionManager, TransportError};
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tracing::{debug, error, trace, warn};

/// JSON-RPC method used to push scene events to protocol sessions.
pub const SCENE_NOTIFICATION: &str = "notifications/scene";

pub type ViewerId = u64;

/// Viewer connection classes. A connection belongs to exactly one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Audience {
    /// Bidirectional socket, JSON text frames `{"type", "data"}`.
    Socket,
    /// Server-sent events stream.
    Stream,
}

/// Outcome of a single publish.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeliveryReport {
    pub delivered: usize,
    /// Frames dropped because the viewer's buffer was full.
    pub dropped: usize,
    /// Viewers found closed and unregistered.
    pub closed: usize,
    /// Protocol sessions that accepted the notification.
    pub protocol_sessions: usize,
}

/// Receives scene events for the tool-calling audience.
pub trait ProtocolSink: Send + Sync {
    /// Returns the number of sessions the frame was written to.
    fn notify(&self, frame: &SseFrame) -> usize;
}

impl ProtocolSink for SessionManager {
    fn notify(&self, frame: &SseFrame) -> usize {
        self.notify_all(frame)
    }
}

#[derive(Default)]
struct Registry {
    sockets: HashMap<ViewerId, FrameSender>,
    streams: HashMap<ViewerId, FrameSender>,
}

impl Registry {
    fn set_mut(&mut self, audience: Audience) -> &mut HashMap<ViewerId, FrameSender> {
        match audience {
            Audience::Socket => &mut self.sockets,
            Audience::Stream => &mut self.streams,
        }
    }
}

#[derive(Debug, Clone)]
pub struct HubConfig {
    /// Outbound frames buffered per viewer connection.
    pub channel_capacity: usize,
    /// Reconnect delay advertised to SSE clients, in milliseconds.
    pub retry_ms: u64,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            channel_capacity: 256,
            retry_ms: 3000,
        }
    }
}

pub struct BroadcastHub {
    registry: RwLock<Registry>,
    next_id: AtomicU64,
    event_log: Arc<EventLog>,
    protocol_sink: RwLock<Option<Weak<dyn ProtocolSink>>>,
    config: HubConfig,
}

impl std::fmt::Debug for BroadcastHub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BroadcastHub")
            .field("sockets", &self.audience_count(Audience::Socket))
            .field("streams", &self.audience_count(Audience::Stream))
            .field("config", &self.config)
            .finish()
    }
}

impl BroadcastHub {
    pub fn new(config: HubConfig, event_log: Arc<EventLog>) -> Self {
        Self {
            registry: RwLock::new(Registry::default()),
            next_id: AtomicU64::new(1),
            event_log,
            protocol_sink: RwLock::new(None),
            config,
        }
    }

    pub fn event_log(&self) -> &Arc<EventLog> {
        &self.event_log
    }

    /// Attach the protocol audience. Set once the session manager exists.
    ///
    /// Only a weak reference is kept: the sink owns the scene, which owns
    /// this hub. Once the owner drops the sink, publishes skip it.
    pub fn set_protocol_sink<S: ProtocolSink + 'static>(&self, sink: &Arc<S>) {
        let sink: Weak<dyn ProtocolSink> = Arc::downgrade(sink) as Weak<S>;
        *self.protocol_sink.write() = Some(sink);
    }

    pub fn register(&self, audience: Audience, sender: FrameSender) -> ViewerId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.registry.write().set_mut(audience).insert(id, sender);
        debug!(viewer_id = id, ?audience, "viewer registered");
        id
    }

    pub fn unregister(&self, id: ViewerId) -> bool {
        let mut registry = self.registry.write();
        let removed = registry.sockets.remove(&id).is_some() || registry.streams.remove(&id).is_some();
        if removed {
            debug!(viewer_id = id, "viewer unregistered");
        }
        removed
    }

    /// Open a viewer SSE connection. The `retry` hint and the `init`
    /// snapshot are queued before the connection can see any event.
    pub fn register_stream(&self, snapshot: &SceneSnapshot) -> (ViewerId, mpsc::Receiver<String>) {
        let (sender, frames) = FrameSender::channel(self.config.channel_capacity);
        let init = init_event(snapshot);
        let _ = sender.send_frame(&SseFrame::Retry(self.config.retry_ms));
        match SseFrame::from_broadcast(&init) {
            Ok(frame) => {
                let _ = sender.send_frame(&frame);
            }
            Err(e) => error!(error = %e, "failed to encode init frame"),
        }
        (self.register(Audience::Stream, sender), frames)
    }

    /// Open a viewer socket connection. `init` is the first frame.
    pub fn register_socket(&self, snapshot: &SceneSnapshot) -> (ViewerId, mpsc::Receiver<String>) {
        let (sender, frames) = FrameSender::channel(self.config.channel_capacity);
        match serde_json::to_string(&init_event(snapshot)) {
            Ok(text) => {
                let _ = sender.send_raw(text);
            }
            Err(e) => error!(error = %e, "failed to encode init frame"),
        }
        (self.register(Audience::Socket, sender), frames)
    }

    pub fn audience_count(&self, audience: Audience) -> usize {
        let registry = self.registry.read();
        match audience {
            Audience::Socket => registry.sockets.len(),
            Audience::Stream => registry.streams.len(),
        }
    }

    pub fn viewer_count(&self) -> usize {
        let registry = self.registry.read();
        registry.sockets.len() + registry.streams.len()
    }

    /// Deliver one event to every viewer and to attached protocol sessions.
    pub fn publish(&self, event: &BroadcastEvent) -> DeliveryReport {
        let socket_text = match serde_json::to_string(event) {
            Ok(text) => text,
            Err(e) => {
                error!(event = event.event_type(), error = %e, "failed to encode event");
                return DeliveryReport::default();
            }
        };
        let stream_text = match SseFrame::from_broadcast(event) {
            Ok(frame) => frame.encode(),
            Err(e) => {
                error!(event = event.event_type(), error = %e, "failed to encode event");
                return DeliveryReport::default();
            }
        };

        let mut report = DeliveryReport::default();
        let mut closed = Vec::new();
        {
            let registry = self.registry.read();
            let targets = registry
                .sockets
                .iter()
                .map(|(id, tx)| (id, tx, &socket_text))
                .chain(registry.streams.iter().map(|(id, tx)| (id, tx, &stream_text)));
            for (id, sender, payload) in targets {
                match sender.send_raw(payload.clone()) {
                    Ok(()) => report.delivered += 1,
                    Err(TransportError::Full) => {
                        trace!(viewer_id = id, "viewer buffer full, frame dropped");
                        report.dropped += 1;
                    }
                    Err(TransportError::Closed) => closed.push(*id),
                }
            }
        }

        if !closed.is_empty() {
            let mut registry = self.registry.write();
            for id in &closed {
                registry.sockets.remove(id);
                registry.streams.remove(id);
            }
            report.closed = closed.len();
            debug!(count = closed.len(), "removed closed viewers");
        }

        let sink = self.protocol_sink.read().as_ref().and_then(Weak::upgrade);
        if let Some(sink) = sink {
            report.protocol_sessions = sink.notify(&scene_notification(event));
        }

        trace!(
            event = event.event_type(),
            delivered = report.delivered,
            dropped = report.dropped,
            closed = report.closed,
            "event published"
        );
        report
    }
}

impl EventEmitter for BroadcastHub {
    fn emit(&self, kind: EventKind, data: Value) {
        for event in kind.expand(&data) {
            self.event_log.append(event.event_type(), event.data().clone());
            let report = self.publish(&event);
            if report.dropped > 0 {
                warn!(event = event.event_type(), dropped = report.dropped, "slow viewers missed an event");
            }
        }
    }
}

fn init_event(snapshot: &SceneSnapshot) -> BroadcastEvent {
    BroadcastEvent::new(EventKind::Init.primary_name(), snapshot.init_payload())
}

fn scene_notification(event: &BroadcastEvent) -> SseFrame {
    let notification = json!({
        "jsonrpc": "2.0",
        "method": SCENE_NOTIFICATION,
        "params": { "type": event.event_type(), "data": event.data() },
    });
    SseFrame::event("message", notification.to_string())
}
