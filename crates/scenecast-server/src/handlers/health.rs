//! `GET /health`

use std::sync::Arc;

use axum::extract::State;
use axum::response::{IntoResponse, Json};
use serde_json::json;

use crate::hub::Audience;
use crate::state::AppState;

pub async fn handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let store = state.sessions.store();
    Json(json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "sessions": state.sessions.session_count(),
        "viewers": {
            "socket": state.hub.audience_count(Audience::Socket),
            "stream": state.hub.audience_count(Audience::Stream),
        },
        "store": {
            "available": store.is_available(),
            "backend": store.backend_name(),
        },
        "rateBuckets": state.limiter.bucket_count(),
    }))
}
