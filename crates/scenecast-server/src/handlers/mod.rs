//! HTTP handlers

pub mod events;
pub mod health;
pub mod messages;
pub mod sse;
pub mod ws;

use std::convert::Infallible;
use std::net::SocketAddr;
use std::time::Duration;

use axum::body::{Body, Bytes};
use axum::extract::ConnectInfo;
use axum::http::{header, HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use futures::Stream;
use scenecast_core::SseFrame;
use serde::Deserialize;
use tokio::sync::mpsc;

use crate::access::{AccessRequest, CorsGrant};
use crate::error::ApiError;
use crate::state::AppState;

/// Query parameters shared by the gated endpoints.
#[derive(Debug, Default, Deserialize)]
pub struct GateQuery {
    #[serde(rename = "apiKey")]
    pub api_key: Option<String>,
    #[serde(rename = "sessionId")]
    pub session_id: Option<String>,
}

pub(crate) fn access_request(
    headers: &HeaderMap,
    query: &GateQuery,
    connect_info: Option<ConnectInfo<SocketAddr>>,
) -> AccessRequest {
    AccessRequest::from_parts(
        headers,
        query.api_key.as_deref(),
        connect_info.map(|ConnectInfo(addr)| addr),
    )
}

/// Forward encoded frames until the sender side closes. `guard` lives as
/// long as the response body, so dropping the connection drops it too.
/// With `keep_alive` set, a `: ping` comment is interleaved at that interval.
pub(crate) fn frame_stream<G: Send + 'static>(
    mut frames: mpsc::Receiver<String>,
    guard: G,
    keep_alive: Option<Duration>,
) -> impl Stream<Item = Result<Bytes, Infallible>> {
    async_stream::stream! {
        let _guard = guard;
        match keep_alive {
            None => {
                while let Some(frame) = frames.recv().await {
                    yield Ok(Bytes::from(frame));
                }
            }
            Some(period) => {
                let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
                loop {
                    let next = tokio::select! {
                        frame = frames.recv() => frame,
                        _ = ticker.tick() => Some(SseFrame::ping().encode()),
                    };
                    match next {
                        Some(frame) => yield Ok(Bytes::from(frame)),
                        None => break,
                    }
                }
            }
        }
    }
}

pub(crate) fn sse_response<S>(grant: &CorsGrant, stream: S) -> Response
where
    S: Stream<Item = Result<Bytes, Infallible>> + Send + 'static,
{
    let mut response = Response::new(Body::from_stream(stream));
    let headers = response.headers_mut();
    headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("text/event-stream"));
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    headers.insert("x-accel-buffering", HeaderValue::from_static("no"));
    grant.apply(headers);
    response
}

/// `OPTIONS` for the protocol endpoints: origin check only.
pub async fn preflight(
    axum::extract::State(state): axum::extract::State<std::sync::Arc<AppState>>,
    headers: HeaderMap,
) -> Response {
    let origin = headers.get(header::ORIGIN).and_then(|v| v.to_str().ok());
    match state.gate.preflight(origin) {
        Ok(grant) => {
            let mut response = StatusCode::NO_CONTENT.into_response();
            grant.apply(response.headers_mut());
            response
        }
        Err(e) => {
            tracing::debug!(origin, "preflight rejected");
            ApiError::from(e).into_response()
        }
    }
}
