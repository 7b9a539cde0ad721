//! Protocol session state.

use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::transport::FrameSender;

/// Lifecycle: `Connecting -> Active -> Closed`. `Closed` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Connecting,
    Active,
    Closed,
}

/// One live protocol session. Owned by the session manager.
#[derive(Debug)]
pub struct Session {
    id: String,
    created_at: DateTime<Utc>,
    state: Mutex<SessionState>,
    transport: FrameSender,
    heartbeat: CancellationToken,
}

impl Session {
    pub(crate) fn new(id: String, transport: FrameSender) -> Self {
        Self {
            id,
            created_at: Utc::now(),
            state: Mutex::new(SessionState::Connecting),
            transport,
            heartbeat: CancellationToken::new(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn state(&self) -> SessionState {
        *self.state.lock()
    }

    pub fn is_active(&self) -> bool {
        self.state() == SessionState::Active
    }

    /// Session age
    pub fn age(&self) -> Duration {
        Utc::now() - self.created_at
    }

    pub(crate) fn transport(&self) -> &FrameSender {
        &self.transport
    }

    pub(crate) fn heartbeat_token(&self) -> CancellationToken {
        self.heartbeat.clone()
    }

    /// Advance the lifecycle. Returns `false` if the transition is not allowed.
    pub(crate) fn transition(&self, next: SessionState) -> bool {
        let mut state = self.state.lock();
        let allowed = matches!(
            (*state, next),
            (SessionState::Connecting, SessionState::Active)
                | (SessionState::Connecting, SessionState::Closed)
                | (SessionState::Active, SessionState::Closed)
        );
        if allowed {
            *state = next;
        }
        allowed
    }

    /// Stop the heartbeat. Safe to call any number of times.
    pub(crate) fn cancel_heartbeat(&self) {
        self.heartbeat.cancel();
    }

    pub fn info(&self) -> SessionInfo {
        SessionInfo {
            id: self.id.clone(),
            created_at: self.created_at,
            state: self.state(),
        }
    }
}

/// Read-only view handed out to callers. The transport stays with the manager.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionInfo {
    pub id: String,
    pub created_at: DateTime<Utc>,
    pub state: SessionState,
}
