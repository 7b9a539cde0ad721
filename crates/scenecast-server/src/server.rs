//! HTTP 服务器

use std::net::SocketAddr;
use std::sync::Arc;

use axum::routing::get;
use axum::Router;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;

use crate::handlers;
use crate::state::{AppState, MESSAGES_PATH};

/// 创建路由
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        // 协议会话
        .route("/sse", get(handlers::sse::handler).options(handlers::preflight))
        .route(
            MESSAGES_PATH,
            axum::routing::post(handlers::messages::handler).options(handlers::preflight),
        )
        // 观众
        .route("/events", get(handlers::events::stream))
        .route("/ws", get(handlers::ws::handler))
        // 诊断
        .route("/health", get(handlers::health::handler))
        .route("/api/events/recent", get(handlers::events::recent))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// 运行 HTTP 服务器，直到 `shutdown` 被取消
pub async fn run_server(
    state: Arc<AppState>,
    shutdown: CancellationToken,
) -> anyhow::Result<()> {
    let addr: SocketAddr = format!("{}:{}", state.config.server.host, state.config.server.port)
        .parse()
        .map_err(|e| anyhow::anyhow!("Invalid address: {}", e))?;

    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("Scenecast server listening on http://{}", addr);

    let sessions = state.sessions.clone();
    let app = create_router(state);
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async move { shutdown.cancelled().await })
    .await?;

    let closed = sessions.close_all().await;
    tracing::info!(closed, "server stopped");
    Ok(())
}
