//! `GET /ws`: viewer WebSocket.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{ConnectInfo, Query, State, WebSocketUpgrade};
use axum::http::HeaderMap;
use axum::response::{IntoResponse, Response};
use futures_util::{SinkExt, StreamExt};
use tracing::{debug, info};

use super::events::ViewerGuard;
use super::{access_request, GateQuery};
use crate::access::AuthRequirement;
use crate::error::ApiError;
use crate::hub::Audience;
use crate::state::AppState;

pub async fn handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<GateQuery>,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> Response {
    let request = access_request(&headers, &query, connect_info);
    if let Err(e) = state.gate.check(&request, AuthRequirement::Skip) {
        return ApiError::from(e).into_response();
    }
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: Arc<AppState>) {
    let (id, mut frames) = state.open_viewer(Audience::Socket);
    let _guard = ViewerGuard::new(Arc::clone(&state.hub), id);
    info!(viewer_id = id, "viewer socket connected");

    let (mut sender, mut receiver) = socket.split();
    let interval = state.heartbeat_interval();

    let send_task = async {
        let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + interval, interval);
        loop {
            let message = tokio::select! {
                frame = frames.recv() => match frame {
                    Some(text) => Message::Text(text),
                    None => break,
                },
                _ = ticker.tick() => Message::Ping(Vec::new()),
            };
            if sender.send(message).await.is_err() {
                break;
            }
        }
    };

    // Viewers do not send commands; only close frames matter here.
    let recv_task = async {
        while let Some(Ok(message)) = receiver.next().await {
            if let Message::Close(_) = message {
                break;
            }
        }
    };

    tokio::select! {
        _ = send_task => {},
        _ = recv_task => {},
    }

    debug!(viewer_id = id, "viewer socket closed");
}
