use std::sync::Arc;
use std::time::Duration;

use axum::body::{Body, BodyDataStream};
use axum::http::{header, Method, Request, StatusCode};
use axum::Router;
use futures::StreamExt;
use scenecast_config::Config;
use scenecast_server::{create_router, AppState};
use scenecast_session::{MemorySessionStore, SessionRecord, SessionStore, StoreHandle};
use serde_json::{json, Value};
use tower::ServiceExt;

const ALLOWED_ORIGIN: &str = "http://localhost:3000";

fn test_config() -> Config {
    let mut config = Config::default();
    config.access.allowed_origins = vec![ALLOWED_ORIGIN.to_string()];
    config
}

fn app_with(config: Config, store: StoreHandle) -> (Router, Arc<AppState>) {
    let state = Arc::new(AppState::new(config, store));
    (create_router(Arc::clone(&state)), state)
}

fn app() -> (Router, Arc<AppState>) {
    app_with(test_config(), StoreHandle::unavailable())
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

fn post_json(uri: &str, body: &str) -> Request<Body> {
    Request::builder()
        .method(Method::POST)
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

async fn json_body(response: axum::response::Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), 1024 * 1024)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

/// Splits a streaming response body into SSE frames.
struct FrameReader {
    stream: BodyDataStream,
    buffer: String,
}

impl FrameReader {
    fn new(response: axum::response::Response) -> Self {
        Self {
            stream: response.into_body().into_data_stream(),
            buffer: String::new(),
        }
    }

    async fn next_frame(&mut self) -> String {
        loop {
            if let Some(pos) = self.buffer.find("\n\n") {
                let frame: String = self.buffer.drain(..pos + 2).collect();
                return frame;
            }
            let chunk = tokio::time::timeout(Duration::from_secs(2), self.stream.next())
                .await
                .expect("frame in time")
                .expect("stream open")
                .expect("body chunk");
            self.buffer.push_str(std::str::from_utf8(&chunk).unwrap());
        }
    }

    async fn assert_idle(&mut self, wait: Duration) {
        assert!(self.buffer.is_empty(), "unexpected data: {:?}", self.buffer);
        let next = tokio::time::timeout(wait, self.stream.next()).await;
        assert!(next.is_err(), "unexpected frame: {:?}", next);
    }
}

fn frame_data(frame: &str) -> Value {
    let data: Vec<&str> = frame
        .lines()
        .filter_map(|line| line.strip_prefix("data: "))
        .collect();
    serde_json::from_str(&data.join("\n")).unwrap()
}

async fn open_protocol_session(app: &Router) -> (String, FrameReader) {
    let response = app.clone().oneshot(get("/sse")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()[header::CONTENT_TYPE], "text/event-stream");

    let mut reader = FrameReader::new(response);
    let endpoint = reader.next_frame().await;
    let session_id = endpoint
        .strip_prefix("event: endpoint\ndata: /messages?sessionId=")
        .and_then(|rest| rest.strip_suffix("\n\n"))
        .expect("endpoint frame")
        .to_string();
    (session_id, reader)
}

#[tokio::test]
async fn test_preflight_allows_listed_origin() {
    let mut config = test_config();
    config.access.api_key = Some("secret".to_string());
    config.rate_limit.capacity = 1;
    let (app, state) = app_with(config, StoreHandle::unavailable());

    for path in ["/messages", "/sse", "/messages"] {
        let request = Request::builder()
            .method(Method::OPTIONS)
            .uri(path)
            .header(header::ORIGIN, ALLOWED_ORIGIN)
            .body(Body::empty())
            .unwrap();

        let response = app.clone().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::NO_CONTENT);
        let headers = response.headers();
        assert_eq!(headers[header::ACCESS_CONTROL_ALLOW_ORIGIN], ALLOWED_ORIGIN);
        assert_eq!(headers[header::ACCESS_CONTROL_ALLOW_METHODS], "GET, POST, OPTIONS");
        assert_eq!(headers[header::ACCESS_CONTROL_ALLOW_HEADERS], "Content-Type, x-api-key");
    }

    // No key was sent and the bucket holds one token: neither check ran.
    assert_eq!(state.limiter.bucket_count(), 0);
}

#[tokio::test]
async fn test_unknown_origin_is_forbidden() {
    let (app, _) = app();

    let preflight = Request::builder()
        .method(Method::OPTIONS)
        .uri("/sse")
        .header(header::ORIGIN, "http://evil.example")
        .body(Body::empty())
        .unwrap();
    let response = app.clone().oneshot(preflight).await.unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    let stream = Request::builder()
        .uri("/sse")
        .header(header::ORIGIN, "http://evil.example")
        .body(Body::empty())
        .unwrap();
    let response = app.oneshot(stream).await.unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    let body = json_body(response).await;
    assert_eq!(body["error"]["type"], "permission_error");
    assert_eq!(body["error"]["code"], "origin_not_allowed");
}

#[tokio::test]
async fn test_api_key_guards_protocol_but_not_viewers() {
    let mut config = test_config();
    config.access.api_key = Some("s3cret".to_string());
    let (app, _) = app_with(config, StoreHandle::unavailable());

    let response = app.clone().oneshot(get("/sse")).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(json_body(response).await["error"]["code"], "invalid_api_key");

    let response = app.clone().oneshot(get("/sse?apiKey=s3cret")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let with_header = Request::builder()
        .uri("/sse")
        .header("x-api-key", "s3cret")
        .body(Body::empty())
        .unwrap();
    let response = app.clone().oneshot(with_header).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = app.oneshot(get("/events")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_rate_limit_denies_then_recovers() {
    let mut config = test_config();
    config.rate_limit.capacity = 2;
    config.rate_limit.refill_per_sec = 1.0;
    let (app, _) = app_with(config, StoreHandle::unavailable());

    let mut statuses = Vec::new();
    for _ in 0..3 {
        statuses.push(app.clone().oneshot(get("/events")).await.unwrap().status());
    }
    assert_eq!(
        statuses,
        vec![StatusCode::OK, StatusCode::OK, StatusCode::TOO_MANY_REQUESTS]
    );

    tokio::time::sleep(Duration::from_millis(1100)).await;
    let response = app.oneshot(get("/events")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_message_round_trip_on_session_stream() {
    let (app, state) = app();
    let (session_id, mut reader) = open_protocol_session(&app).await;
    assert_eq!(state.sessions.session_count(), 1);

    let response = app
        .clone()
        .oneshot(post_json(
            &format!("/messages?sessionId={}", session_id),
            r#"{"jsonrpc":"2.0","id":1,"method":"initialize"}"#,
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::ACCEPTED);

    let reply = reader.next_frame().await;
    assert!(reply.starts_with("event: message\n"));
    let reply = frame_data(&reply);
    assert_eq!(reply["id"], 1);
    assert!(reply["result"]["serverInfo"]["name"].is_string());
}

#[tokio::test]
async fn test_dispatch_outcomes() {
    let shared = MemorySessionStore::new();
    let handle = || StoreHandle::new(Arc::new(shared.clone()), Duration::from_secs(1));
    let (instance_a, _) = app_with(test_config(), handle());
    let (instance_b, _) = app_with(test_config(), handle());

    let (session_id, _reader) = open_protocol_session(&instance_a).await;
    let ping = r#"{"jsonrpc":"2.0","id":9,"method":"ping"}"#;

    let local = instance_a
        .clone()
        .oneshot(post_json(&format!("/messages?sessionId={}", session_id), ping))
        .await
        .unwrap();
    assert_eq!(local.status(), StatusCode::ACCEPTED);

    let foreign = instance_b
        .clone()
        .oneshot(post_json(&format!("/messages?sessionId={}", session_id), ping))
        .await
        .unwrap();
    assert_eq!(foreign.status(), StatusCode::SERVICE_UNAVAILABLE);

    let unknown = instance_b
        .clone()
        .oneshot(post_json("/messages?sessionId=does-not-exist", ping))
        .await
        .unwrap();
    assert_eq!(unknown.status(), StatusCode::NOT_FOUND);
    assert_eq!(json_body(unknown).await["error"]["code"], "session_not_found");

    // Mirrors written by another process count as foreign too.
    shared
        .save("elsewhere", &SessionRecord::new(chrono::Utc::now()), Duration::from_secs(60))
        .await
        .unwrap();
    let response = instance_a
        .oneshot(post_json("/messages?sessionId=elsewhere", ping))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
}

#[tokio::test]
async fn test_bad_message_requests() {
    let (app, _) = app();
    let (session_id, _reader) = open_protocol_session(&app).await;

    let missing_id = app
        .clone()
        .oneshot(post_json("/messages", r#"{"jsonrpc":"2.0","id":1,"method":"ping"}"#))
        .await
        .unwrap();
    assert_eq!(missing_id.status(), StatusCode::BAD_REQUEST);

    let bad_json = app
        .oneshot(post_json(&format!("/messages?sessionId={}", session_id), "{not json"))
        .await
        .unwrap();
    assert_eq!(bad_json.status(), StatusCode::BAD_REQUEST);
    assert_eq!(json_body(bad_json).await["error"]["type"], "invalid_request_error");
}

#[tokio::test]
async fn test_session_closes_when_stream_dropped() {
    let (app, state) = app();
    let (session_id, reader) = open_protocol_session(&app).await;
    drop(reader);

    for _ in 0..50 {
        if state.sessions.get(&session_id).is_none() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(state.sessions.get(&session_id).is_none());

    let response = app
        .oneshot(post_json(
            &format!("/messages?sessionId={}", session_id),
            r#"{"jsonrpc":"2.0","id":1,"method":"ping"}"#,
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_viewer_gets_init_then_one_event_per_alias() {
    let (app, state) = app();
    state.scene.load_asset("models/robot.glb").unwrap();

    let response = app.clone().oneshot(get("/events")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let mut reader = FrameReader::new(response);

    assert_eq!(reader.next_frame().await, "retry: 3000\n\n");
    let init = reader.next_frame().await;
    assert!(init.starts_with("event: init\n"));
    assert_eq!(
        frame_data(&init),
        json!({"currentAssetPath": "models/robot.glb", "isLoaded": true})
    );
    reader.assert_idle(Duration::from_millis(100)).await;

    state.scene.load_animation("walk").unwrap();
    let event = reader.next_frame().await;
    assert!(event.starts_with("event: animationLoaded\n"));
    assert_eq!(
        frame_data(&event),
        json!({"name": "walk", "assetPath": "models/robot.glb"})
    );
    reader.assert_idle(Duration::from_millis(100)).await;

    state.scene.play_animation(None).unwrap();
    assert!(reader.next_frame().await.starts_with("event: animationPlayed\n"));
    assert!(reader.next_frame().await.starts_with("event: animationStarted\n"));
    reader.assert_idle(Duration::from_millis(100)).await;
}

#[tokio::test]
async fn test_tool_call_reaches_viewers_and_protocol_sessions() {
    let (app, _) = app();
    let viewer = app.clone().oneshot(get("/events")).await.unwrap();
    let mut viewer = FrameReader::new(viewer);
    viewer.next_frame().await;
    let init = viewer.next_frame().await;
    assert_eq!(frame_data(&init)["isLoaded"], false);

    let (session_id, mut session) = open_protocol_session(&app).await;
    let call = json!({
        "jsonrpc": "2.0", "id": 2, "method": "tools/call",
        "params": {"name": "load_asset", "arguments": {"path": "duck.glb"}}
    });
    let response = app
        .oneshot(post_json(
            &format!("/messages?sessionId={}", session_id),
            &call.to_string(),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::ACCEPTED);

    assert!(viewer.next_frame().await.starts_with("event: assetLoaded\n"));
    assert!(viewer.next_frame().await.starts_with("event: modelLoaded\n"));

    // Scene notifications are written before the tool reply.
    let mut notified = Vec::new();
    let reply = loop {
        let frame = frame_data(&session.next_frame().await);
        if frame.get("id").is_some() {
            break frame;
        }
        notified.push(frame["params"]["type"].as_str().unwrap().to_string());
    };
    assert_eq!(notified, vec!["assetLoaded", "modelLoaded"]);
    assert_eq!(reply["result"]["isError"], false);
}

#[tokio::test]
async fn test_health_and_recent_events() {
    let (app, state) = app();
    state.scene.load_asset("a.glb").unwrap();

    let response = app.clone().oneshot(get("/health")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let health = json_body(response).await;
    assert_eq!(health["status"], "healthy");
    assert_eq!(health["sessions"], 0);
    assert_eq!(health["store"]["available"], false);

    let response = app.oneshot(get("/api/events/recent?limit=5")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let recent = json_body(response).await;
    let names: Vec<_> = recent["events"]
        .as_array()
        .unwrap()
        .iter()
        .map(|e| e["event"].as_str().unwrap().to_string())
        .collect();
    assert_eq!(names, vec!["assetLoaded", "modelLoaded"]);
    assert_eq!(recent["capacity"], 100);
}
