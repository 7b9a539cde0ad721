//! `POST /messages?sessionId=<id>`: forwards one protocol message.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{ConnectInfo, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use serde_json::Value;
use tracing::debug;

use super::{access_request, GateQuery};
use crate::access::AuthRequirement;
use crate::error::ApiError;
use crate::state::AppState;

pub async fn handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<GateQuery>,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let request = access_request(&headers, &query, connect_info);
    let grant = match state.gate.check(&request, AuthRequirement::Required) {
        Ok(grant) => grant,
        Err(e) => return ApiError::from(e).into_response(),
    };

    let Some(session_id) = query.session_id.as_deref().filter(|id| !id.is_empty()) else {
        return ApiError::bad_request("Missing sessionId").with_cors(Some(&grant));
    };

    let message: Value = match serde_json::from_slice(&body) {
        Ok(message) => message,
        Err(e) => {
            debug!(session_id, error = %e, "malformed message body");
            return ApiError::bad_request(format!("Invalid JSON body: {}", e)).with_cors(Some(&grant));
        }
    };

    match state.sessions.dispatch(session_id, message).await {
        Ok(_) => {
            let mut response = (StatusCode::ACCEPTED, "Accepted").into_response();
            grant.apply(response.headers_mut());
            response
        }
        Err(e) => ApiError::from(e).with_cors(Some(&grant)),
    }
}
