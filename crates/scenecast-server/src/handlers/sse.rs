//! `GET /sse`: opens a protocol session.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::{ConnectInfo, Query, State};
use axum::http::HeaderMap;
use axum::response::{IntoResponse, Response};
use tracing::{debug, info};

use super::{access_request, frame_stream, sse_response, GateQuery};
use crate::access::AuthRequirement;
use crate::error::ApiError;
use crate::state::AppState;

pub async fn handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<GateQuery>,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
) -> Response {
    let request = access_request(&headers, &query, connect_info);
    let grant = match state.gate.check(&request, AuthRequirement::Required) {
        Ok(grant) => grant,
        Err(e) => {
            debug!(error = %e, "protocol stream rejected");
            return ApiError::from(e).into_response();
        }
    };

    let established = state.sessions.establish().await;
    info!(
        session_id = %established.info.id,
        peer = ?request.peer,
        "protocol stream opened"
    );

    // The guard tears the session down once the body is dropped.
    let stream = frame_stream(established.frames, established.guard, None);
    sse_response(&grant, stream)
}
