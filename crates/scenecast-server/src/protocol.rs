//! Tool-calling protocol
//!
//! JSON-RPC 2.0 carried over a protocol session. Requests arrive through
//! `POST /messages`; replies are written back on the session's stream.

use std::sync::Arc;

use async_trait::async_trait;
use scenecast_core::{SceneError, SceneState};
use scenecast_session::{HandlerError, MessageHandler};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, info};

pub const PROTOCOL_VERSION: &str = "2024-11-05";

pub const INVALID_REQUEST: i32 = -32600;
pub const METHOD_NOT_FOUND: i32 = -32601;
pub const INVALID_PARAMS: i32 = -32602;

/// JSON-RPC 2.0 request. A missing `id` marks a notification.
#[derive(Debug, Deserialize)]
pub struct RpcRequest {
    #[serde(default)]
    pub jsonrpc: Option<String>,
    pub method: String,
    #[serde(default)]
    pub params: Option<Value>,
    #[serde(default)]
    pub id: Option<Value>,
}

#[derive(Debug, Serialize)]
pub struct RpcResponse {
    pub jsonrpc: &'static str,
    pub id: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcError>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RpcError {
    pub code: i32,
    pub message: String,
}

impl RpcError {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn method_not_found(method: &str) -> Self {
        Self::new(METHOD_NOT_FOUND, format!("Method not found: {method}"))
    }

    pub fn invalid_params(message: impl Into<String>) -> Self {
        Self::new(INVALID_PARAMS, message)
    }
}

impl RpcResponse {
    pub fn success(id: Value, result: Value) -> Self {
        Self {
            jsonrpc: "2.0",
            id,
            result: Some(result),
            error: None,
        }
    }

    pub fn failure(id: Value, error: RpcError) -> Self {
        Self {
            jsonrpc: "2.0",
            id,
            result: None,
            error: Some(error),
        }
    }
}

fn require_str<'a>(params: &'a Value, key: &str) -> Result<&'a str, RpcError> {
    params
        .get(key)
        .and_then(Value::as_str)
        .ok_or_else(|| RpcError::invalid_params(format!("Missing required parameter: {key}")))
}

fn optional_str<'a>(params: &'a Value, key: &str) -> Option<&'a str> {
    params.get(key).and_then(Value::as_str)
}

/// Tool catalogue returned by `tools/list`.
pub fn tool_definitions() -> Value {
    json!([
        {
            "name": "load_asset",
            "description": "Load a 3D asset into the scene, replacing the current one.",
            "inputSchema": {
                "type": "object",
                "properties": { "path": { "type": "string", "description": "Asset path or URL" } },
                "required": ["path"]
            }
        },
        {
            "name": "load_animation",
            "description": "Select an animation clip on the current asset.",
            "inputSchema": {
                "type": "object",
                "properties": { "name": { "type": "string", "description": "Animation clip name" } },
                "required": ["name"]
            }
        },
        {
            "name": "play_animation",
            "description": "Start playback, optionally selecting a clip first.",
            "inputSchema": {
                "type": "object",
                "properties": { "name": { "type": "string", "description": "Animation clip name" } }
            }
        },
        {
            "name": "stop_animation",
            "description": "Stop the playing animation.",
            "inputSchema": { "type": "object", "properties": {} }
        },
        {
            "name": "get_scene_state",
            "description": "Return the current scene state.",
            "inputSchema": { "type": "object", "properties": {} }
        }
    ])
}

/// Handles protocol messages against the shared scene.
pub struct SceneProtocol {
    scene: Arc<SceneState>,
    server_name: String,
    server_version: String,
}

impl SceneProtocol {
    pub fn new(scene: Arc<SceneState>) -> Self {
        Self {
            scene,
            server_name: env!("CARGO_PKG_NAME").to_string(),
            server_version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }

    fn initialize(&self) -> Value {
        json!({
            "protocolVersion": PROTOCOL_VERSION,
            "capabilities": { "tools": { "listChanged": false } },
            "serverInfo": { "name": self.server_name, "version": self.server_version },
        })
    }

    fn call_tool(&self, params: Option<Value>) -> Result<Value, RpcError> {
        let params = params.unwrap_or(Value::Null);
        let name = require_str(&params, "name")?;
        let args = params.get("arguments").cloned().unwrap_or_else(|| json!({}));

        info!(tool = name, "tool call");
        let outcome = match name {
            "load_asset" => self.scene.load_asset(require_str(&args, "path")?),
            "load_animation" => self.scene.load_animation(require_str(&args, "name")?),
            "play_animation" => self.scene.play_animation(optional_str(&args, "name")),
            "stop_animation" => self.scene.stop_animation(),
            "get_scene_state" => Ok(self.scene.snapshot()),
            other => return Err(RpcError::invalid_params(format!("Unknown tool: {other}"))),
        };

        Ok(match outcome {
            Ok(snapshot) => tool_result(
                serde_json::to_string(&snapshot).unwrap_or_default(),
                false,
            ),
            Err(SceneError::InvalidArgument(message)) => {
                return Err(RpcError::invalid_params(message));
            }
            // Scene precondition failures are reported to the caller as tool errors.
            Err(e) => tool_result(e.to_string(), true),
        })
    }

    /// Route one request. Returns `None` for notifications.
    pub fn handle_request(&self, request: RpcRequest) -> Option<RpcResponse> {
        let Some(id) = request.id else {
            debug!(method = %request.method, "notification received");
            return None;
        };

        let result = match request.method.as_str() {
            "initialize" => Ok(self.initialize()),
            "ping" => Ok(json!({})),
            "tools/list" => Ok(json!({ "tools": tool_definitions() })),
            "tools/call" => self.call_tool(request.params),
            other => Err(RpcError::method_not_found(other)),
        };

        Some(match result {
            Ok(value) => RpcResponse::success(id, value),
            Err(error) => RpcResponse::failure(id, error),
        })
    }
}

fn tool_result(text: String, is_error: bool) -> Value {
    json!({
        "content": [{ "type": "text", "text": text }],
        "isError": is_error,
    })
}

#[async_trait]
impl MessageHandler for SceneProtocol {
    async fn handle(
        &self,
        session_id: &str,
        message: Value,
    ) -> Result<Option<Value>, HandlerError> {
        let request = match serde_json::from_value::<RpcRequest>(message.clone()) {
            Ok(request) => request,
            Err(e) => {
                debug!(session_id, error = %e, "invalid JSON-RPC request");
                let id = message.get("id").cloned().unwrap_or(Value::Null);
                let response =
                    RpcResponse::failure(id, RpcError::new(INVALID_REQUEST, "Invalid request"));
                return serde_json::to_value(response)
                    .map(Some)
                    .map_err(|e| HandlerError::new(e.to_string()));
            }
        };

        match self.handle_request(request) {
            Some(response) => serde_json::to_value(response)
                .map(Some)
                .map_err(|e| HandlerError::new(e.to_string())),
            None => Ok(None),
        }
    }
}
