//! Per-session keep-alive.

use std::sync::Arc;
use std::time::Duration;

use scenecast_core::SseFrame;
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::{debug, trace};

use crate::session::Session;
use crate::store::StoreHandle;
use crate::transport::TransportError;

/// Outcome of the heartbeat loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeartbeatResult {
    /// The transport stopped accepting writes. The session must be torn down.
    TransportClosed,
    /// The heartbeat was cancelled by teardown.
    Cancelled,
}

/// Run the heartbeat for one session until it is cancelled or the
/// transport closes.
///
/// Every `interval` a `: ping` comment is written and the store TTL is
/// renewed. A full outbound buffer skips the ping but keeps the session;
/// a closed one cancels the heartbeat and returns `TransportClosed`.
pub async fn run_heartbeat(
    session: Arc<Session>,
    store: Arc<StoreHandle>,
    interval: Duration,
    ttl: Duration,
) -> HeartbeatResult {
    let cancel = session.heartbeat_token();
    let mut ticker = time::interval_at(Instant::now() + interval, interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            () = cancel.cancelled() => {
                return HeartbeatResult::Cancelled;
            }
            _ = ticker.tick() => {
                match session.transport().send_frame(&SseFrame::ping()) {
                    Ok(()) => trace!(session_id = session.id(), "heartbeat ping"),
                    Err(TransportError::Full) => {
                        debug!(session_id = session.id(), "outbound buffer full, skipping ping");
                    }
                    Err(TransportError::Closed) => {
                        debug!(session_id = session.id(), "transport closed, stopping heartbeat");
                        session.cancel_heartbeat();
                        return HeartbeatResult::TransportClosed;
                    }
                }
                store.extend(session.id(), ttl).await;
            }
        }
    }
}
