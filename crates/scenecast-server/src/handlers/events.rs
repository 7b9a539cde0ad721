//! Viewer event stream and the event log tail.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::{ConnectInfo, Query, State};
use axum::http::HeaderMap;
use axum::response::{IntoResponse, Json, Response};
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, info};

use super::{access_request, frame_stream, sse_response, GateQuery};
use crate::access::AuthRequirement;
use crate::error::ApiError;
use crate::hub::{Audience, BroadcastHub, ViewerId};
use crate::state::AppState;

const DEFAULT_RECENT_LIMIT: usize = 20;

/// Unregisters a viewer when its connection goes away.
pub(crate) struct ViewerGuard {
    hub: Arc<BroadcastHub>,
    id: ViewerId,
}

impl ViewerGuard {
    pub(crate) fn new(hub: Arc<BroadcastHub>, id: ViewerId) -> Self {
        Self { hub, id }
    }
}

impl Drop for ViewerGuard {
    fn drop(&mut self) {
        if self.hub.unregister(self.id) {
            debug!(viewer_id = self.id, "viewer disconnected");
        }
    }
}

/// `GET /events`
pub async fn stream(
    State(state): State<Arc<AppState>>,
    Query(query): Query<GateQuery>,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
) -> Response {
    let request = access_request(&headers, &query, connect_info);
    let grant = match state.gate.check(&request, AuthRequirement::Skip) {
        Ok(grant) => grant,
        Err(e) => return ApiError::from(e).into_response(),
    };

    let (id, frames) = state.open_viewer(Audience::Stream);
    info!(viewer_id = id, peer = ?request.peer, "viewer stream opened");

    let guard = ViewerGuard::new(Arc::clone(&state.hub), id);
    sse_response(
        &grant,
        frame_stream(frames, guard, Some(state.heartbeat_interval())),
    )
}

#[derive(Debug, Deserialize)]
pub struct RecentQuery {
    pub limit: Option<usize>,
    #[serde(rename = "apiKey")]
    pub api_key: Option<String>,
}

/// `GET /api/events/recent?limit=n`
pub async fn recent(
    State(state): State<Arc<AppState>>,
    Query(query): Query<RecentQuery>,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
) -> Response {
    let gate_query = GateQuery {
        api_key: query.api_key.clone(),
        session_id: None,
    };
    let request = access_request(&headers, &gate_query, connect_info);
    let grant = match state.gate.check(&request, AuthRequirement::Required) {
        Ok(grant) => grant,
        Err(e) => return ApiError::from(e).into_response(),
    };

    let limit = query.limit.unwrap_or(DEFAULT_RECENT_LIMIT);
    let events = state.event_log.recent(limit);
    let mut response = Json(json!({
        "events": events,
        "count": events.len(),
        "capacity": state.event_log.capacity(),
    }))
    .into_response();
    grant.apply(response.headers_mut());
    response
}
