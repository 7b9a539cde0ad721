//! # Session Manager
//!
//! Protocol sessions held by this process: establish, heartbeat, dispatch
//! and teardown.
//!
//! The local table is authoritative. The store mirror only answers whether
//! a session lives on another instance.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use scenecast_core::{EventLog, SseFrame};
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::error::{HandlerError, SessionError, SessionResult};
use crate::heartbeat::{run_heartbeat, HeartbeatResult};
use crate::session::{Session, SessionInfo, SessionState};
use crate::store::{SessionRecord, StoreHandle};
use crate::transport::FrameSender;

/// Processes one inbound protocol message for a session.
///
/// `Ok(Some(reply))` is written back on the session's stream as a
/// `message` event; `Ok(None)` means nothing to send (notifications).
#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn handle(&self, session_id: &str, message: Value)
        -> Result<Option<Value>, HandlerError>;
}

/// SessionManager settings.
#[derive(Debug, Clone)]
pub struct SessionManagerConfig {
    /// Time between heartbeats.
    pub heartbeat_interval: Duration,
    /// TTL of the store mirror, renewed on every heartbeat.
    pub store_ttl: Duration,
    /// Outbound frames buffered per session.
    pub outbound_buffer: usize,
    /// Path clients post messages to, announced in the `endpoint` event.
    pub endpoint_path: String,
}

impl Default for SessionManagerConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval: Duration::from_secs(30),
            store_ttl: Duration::from_secs(120),
            outbound_buffer: 256,
            endpoint_path: "/messages".to_string(),
        }
    }
}

/// Result of a successful dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispatchAck {
    /// Whether a reply frame was written to the session stream.
    pub replied: bool,
}

/// A freshly established session together with the receiving half of its
/// transport and the guard that tears it down when dropped.
#[derive(Debug)]
pub struct EstablishedSession {
    pub info: SessionInfo,
    pub frames: mpsc::Receiver<String>,
    pub guard: SessionGuard,
}

/// Tears the session down when the owning connection goes away.
#[derive(Debug)]
pub struct SessionGuard {
    manager: SessionManager,
    session_id: String,
}

impl SessionGuard {
    pub fn session_id(&self) -> &str {
        &self.session_id
    }
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        if !self.manager.contains(&self.session_id) {
            return;
        }
        let manager = self.manager.clone();
        let session_id = std::mem::take(&mut self.session_id);
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    manager.teardown(&session_id).await;
                });
            }
            Err(_) => {
                // No runtime left: drop the local entry, the store mirror expires on its own.
                manager.sessions.remove(&session_id);
            }
        }
    }
}

/// Owns every protocol session held by this process.
#[derive(Clone)]
pub struct SessionManager {
    sessions: Arc<DashMap<String, Arc<Session>>>,
    store: Arc<StoreHandle>,
    handler: Arc<dyn MessageHandler>,
    event_log: Option<Arc<EventLog>>,
    config: SessionManagerConfig,
}

impl std::fmt::Debug for SessionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionManager")
            .field("sessions", &self.sessions.len())
            .field("store", &self.store)
            .field("config", &self.config)
            .finish()
    }
}

impl SessionManager {
    pub fn new(
        config: SessionManagerConfig,
        store: Arc<StoreHandle>,
        handler: Arc<dyn MessageHandler>,
    ) -> Self {
        Self {
            sessions: Arc::new(DashMap::new()),
            store,
            handler,
            event_log: None,
            config,
        }
    }

    /// Record lifecycle events in the diagnostic log.
    pub fn with_event_log(mut self, event_log: Arc<EventLog>) -> Self {
        self.event_log = Some(event_log);
        self
    }

    pub fn store(&self) -> &StoreHandle {
        &self.store
    }

    fn record(&self, event: &str, data: Value) {
        if let Some(log) = &self.event_log {
            log.append(event, data);
        }
    }

    /// Open a new session: register it, mirror it to the store, announce
    /// the message endpoint and start the heartbeat.
    ///
    /// Access control runs before this is called.
    pub async fn establish(&self) -> EstablishedSession {
        let (transport, frames) = FrameSender::channel(self.config.outbound_buffer);

        let session = loop {
            let id = Uuid::new_v4().to_string();
            match self.sessions.entry(id) {
                Entry::Occupied(_) => continue,
                Entry::Vacant(slot) => {
                    let session = Arc::new(Session::new(slot.key().clone(), transport.clone()));
                    slot.insert(Arc::clone(&session));
                    break session;
                }
            }
        };
        let session_id = session.id().to_string();

        let record = SessionRecord::new(session.created_at());
        if self.store.is_available()
            && !self
                .store
                .save(&session_id, &record, self.config.store_ttl)
                .await
        {
            debug!(session_id = %session_id, "session mirror not written");
        }

        let endpoint = format!("{}?sessionId={}", self.config.endpoint_path, session_id);
        if let Err(e) = transport.send_frame(&SseFrame::event("endpoint", endpoint)) {
            warn!(session_id = %session_id, error = %e, "failed to announce endpoint");
        }

        self.spawn_heartbeat(Arc::clone(&session));
        session.transition(SessionState::Active);

        info!(session_id = %session_id, sessions = self.sessions.len(), "session established");
        self.record("session_established", json!({ "sessionId": session_id }));

        EstablishedSession {
            info: session.info(),
            frames,
            guard: SessionGuard {
                manager: self.clone(),
                session_id,
            },
        }
    }

    fn spawn_heartbeat(&self, session: Arc<Session>) {
        let manager = self.clone();
        let store = Arc::clone(&self.store);
        let interval = self.config.heartbeat_interval;
        let ttl = self.config.store_ttl;
        tokio::spawn(async move {
            let session_id = session.id().to_string();
            let result = run_heartbeat(session, store, interval, ttl).await;
            if result == HeartbeatResult::TransportClosed {
                manager.teardown(&session_id).await;
            }
        });
    }

    /// Remove a session. Returns `false` if it was already gone.
    pub async fn teardown(&self, session_id: &str) -> bool {
        let Some((_, session)) = self.sessions.remove(session_id) else {
            return false;
        };

        session.cancel_heartbeat();
        session.transition(SessionState::Closed);
        if self.store.is_available() && !self.store.delete(session_id).await {
            debug!(session_id, "session mirror not deleted, it will expire");
        }

        info!(
            session_id,
            age_secs = session.age().num_seconds(),
            sessions = self.sessions.len(),
            "session closed"
        );
        self.record("session_closed", json!({ "sessionId": session_id }));
        true
    }

    /// Forward a message to a session owned by this process.
    pub async fn dispatch(&self, session_id: &str, message: Value) -> SessionResult<DispatchAck> {
        let session = self
            .sessions
            .get(session_id)
            .map(|entry| Arc::clone(entry.value()));

        let Some(session) = session else {
            let owned_elsewhere = self.store.get(session_id).await.is_some();
            let reason = if owned_elsewhere { "foreign" } else { "unknown" };
            debug!(session_id, reason, "dispatch to session not held locally");
            self.record(
                "session_dispatch_rejected",
                json!({ "sessionId": session_id, "reason": reason }),
            );
            return Err(if owned_elsewhere {
                SessionError::foreign(session_id)
            } else {
                SessionError::not_found(session_id)
            });
        };

        let reply = self
            .handler
            .handle(session_id, message)
            .await
            .map_err(|e| {
                error!(session_id, error = %e, "message handler failed");
                SessionError::internal(e.to_string())
            })?;

        let Some(reply) = reply else {
            return Ok(DispatchAck { replied: false });
        };

        let payload = serde_json::to_string(&reply).map_err(|e| {
            error!(session_id, error = %e, "failed to serialize reply");
            SessionError::internal(e.to_string())
        })?;
        session
            .transport()
            .send_frame(&SseFrame::event("message", payload))
            .map_err(|e| {
                warn!(session_id, error = %e, "failed to write reply to session stream");
                SessionError::internal(e.to_string())
            })?;

        Ok(DispatchAck { replied: true })
    }

    /// Write a frame to every active session. Failures are skipped; returns
    /// the number of sessions that accepted the frame.
    pub fn notify_all(&self, frame: &SseFrame) -> usize {
        let encoded = frame.encode();
        let mut delivered = 0;
        for entry in self.sessions.iter() {
            let session = entry.value();
            if !session.is_active() {
                continue;
            }
            match session.transport().send_raw(encoded.clone()) {
                Ok(()) => delivered += 1,
                Err(e) => debug!(session_id = session.id(), error = %e, "notification not delivered"),
            }
        }
        delivered
    }

    pub fn get(&self, session_id: &str) -> Option<SessionInfo> {
        self.sessions.get(session_id).map(|entry| entry.value().info())
    }

    pub fn contains(&self, session_id: &str) -> bool {
        self.sessions.contains_key(session_id)
    }

    pub fn session_ids(&self) -> Vec<String> {
        self.sessions.iter().map(|entry| entry.key().clone()).collect()
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    /// Tear down every session, e.g. on shutdown.
    pub async fn close_all(&self) -> usize {
        let mut closed = 0;
        for id in self.session_ids() {
            if self.teardown(&id).await {
                closed += 1;
            }
        }
        closed
    }
}
